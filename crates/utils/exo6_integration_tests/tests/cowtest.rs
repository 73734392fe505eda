#![cfg(test)]

use exo6_integration_tests::{
    BOOT_FRAMES, STACK, TEXT, boot, fork_and_resume, helper, map_pages, read_bytes,
};
use exo6_kernel::MachineConfig;
use exo6_syscall::PteFlags;
use exo6_types::{
    addr::VirtAddr,
    layout::{PAGE_SIZE, PFTEMP, UXSTACK_BOTTOM},
};

const A: VirtAddr = VirtAddr::new(0x1000);
const B: VirtAddr = VirtAddr::new(0x2000);

#[test]
fn child_writes_are_private() -> Result<(), anyhow::Error> {
    let (machine, mut parent) = boot(MachineConfig::default())?;
    map_pages(&parent, A, 2)?;
    parent.write(A, b"A")?;
    parent.write(B, b"B")?;

    let mut child = fork_and_resume(&machine, &mut parent)?;
    assert_eq!(read_bytes(&mut child, A, 1)?, b"A");
    child.write(A, b"X")?;
    assert_eq!(read_bytes(&mut parent, A, 1)?, b"A");
    assert_eq!(read_bytes(&mut child, A, 1)?, b"X");
    assert_eq!(read_bytes(&mut child, B, 1)?, b"B");
    assert_eq!(read_bytes(&mut parent, B, 1)?, b"B");
    Ok(())
}

#[test]
fn parent_writes_are_private() -> Result<(), anyhow::Error> {
    let (machine, mut parent) = boot(MachineConfig::default())?;
    map_pages(&parent, A, 1)?;
    parent.write(A, b"before")?;

    let mut child = fork_and_resume(&machine, &mut parent)?;
    parent.write(A, b"parent")?;
    assert_eq!(read_bytes(&mut child, A, 6)?, b"before");
    child.write(A, b"child!")?;
    assert_eq!(read_bytes(&mut parent, A, 6)?, b"parent");
    assert_eq!(read_bytes(&mut child, A, 6)?, b"child!");
    Ok(())
}

#[test]
fn every_page_reads_identically_after_fork() -> Result<(), anyhow::Error> {
    const NPAGES: usize = 8;

    let (machine, mut parent) = boot(MachineConfig::default())?;
    // spans a page table boundary
    let base = VirtAddr::new(0x0040_0000 - 3 * PAGE_SIZE);
    map_pages(&parent, base, NPAGES)?;
    let data = helper::random_bytes(NPAGES * PAGE_SIZE);
    parent.write(base, &data)?;
    let stack = helper::random_bytes(PAGE_SIZE);
    parent.write(STACK, &stack)?;

    let mut child = fork_and_resume(&machine, &mut parent)?;
    assert_eq!(read_bytes(&mut child, base, data.len())?, data);
    assert_eq!(read_bytes(&mut child, STACK, PAGE_SIZE)?, stack);
    assert_eq!(read_bytes(&mut parent, base, data.len())?, data);

    // the child's writes fault page by page; the parent never sees them
    let scribble = helper::random_bytes(NPAGES * PAGE_SIZE);
    child.write(base, &scribble)?;
    assert_eq!(read_bytes(&mut child, base, scribble.len())?, scribble);
    assert_eq!(read_bytes(&mut parent, base, data.len())?, data);
    Ok(())
}

#[test]
fn fault_privatizes_only_the_faulting_mapping() -> Result<(), anyhow::Error> {
    let (machine, mut parent) = boot(MachineConfig::default())?;
    map_pages(&parent, A, 1)?;
    let mut child = fork_and_resume(&machine, &mut parent)?;

    let shared = machine.page_desc(parent.id(), A).unwrap();
    assert!(shared.is_cow());
    assert!(!shared.is_writable());
    assert_eq!(machine.page_desc(child.id(), A), Some(shared));
    assert_eq!(machine.frame_ref_count(shared.frame), 2);

    child.write(A, b"c")?;
    let private = machine.page_desc(child.id(), A).unwrap();
    assert_ne!(private.frame, shared.frame);
    assert_eq!(private.perm, PteFlags::UWP);
    assert_eq!(machine.page_desc(parent.id(), A), Some(shared));
    assert_eq!(machine.frame_ref_count(shared.frame), 1);
    assert!(machine.page_desc(child.id(), PFTEMP).is_none());

    // the last sharer still takes a private copy on its first write
    parent.write(A, b"p")?;
    let parent_private = machine.page_desc(parent.id(), A).unwrap();
    assert_eq!(parent_private.perm, PteFlags::UWP);
    assert_eq!(machine.frame_ref_count(shared.frame), 0);
    Ok(())
}

#[test]
fn exception_stacks_are_never_shared() -> Result<(), anyhow::Error> {
    let (machine, mut parent) = boot(MachineConfig::default())?;
    let child = fork_and_resume(&machine, &mut parent)?;

    let parent_xstack = machine.page_desc(parent.id(), UXSTACK_BOTTOM).unwrap();
    let child_xstack = machine.page_desc(child.id(), UXSTACK_BOTTOM).unwrap();
    assert_ne!(parent_xstack.frame, child_xstack.frame);
    for xstack in [parent_xstack, child_xstack] {
        assert_eq!(xstack.perm, PteFlags::UWP);
        assert_eq!(machine.frame_ref_count(xstack.frame), 1);
    }
    Ok(())
}

#[test]
fn read_only_pages_are_shared_without_cow() -> Result<(), anyhow::Error> {
    let (machine, mut parent) = boot(MachineConfig::default())?;
    let child = fork_and_resume(&machine, &mut parent)?;

    let text = machine.page_desc(parent.id(), TEXT).unwrap();
    assert_eq!(text.perm, PteFlags::UP);
    assert_eq!(machine.page_desc(child.id(), TEXT), Some(text));
    assert_eq!(machine.frame_ref_count(text.frame), 2);
    Ok(())
}

#[test]
fn grandchild_sees_its_parents_copy() -> Result<(), anyhow::Error> {
    let (machine, mut root) = boot(MachineConfig::default())?;
    map_pages(&root, A, 1)?;
    root.write(A, b"root")?;

    let mut child = fork_and_resume(&machine, &mut root)?;
    child.write(A, b"kid1")?;
    let mut grandchild = fork_and_resume(&machine, &mut child)?;
    assert_eq!(grandchild.this_env().parent, Some(child.id()));

    assert_eq!(read_bytes(&mut grandchild, A, 4)?, b"kid1");
    grandchild.write(A, b"kid2")?;
    assert_eq!(read_bytes(&mut root, A, 4)?, b"root");
    assert_eq!(read_bytes(&mut child, A, 4)?, b"kid1");
    assert_eq!(read_bytes(&mut grandchild, A, 4)?, b"kid2");
    Ok(())
}

#[test]
fn frames_are_released_when_children_exit() -> Result<(), anyhow::Error> {
    let config = MachineConfig::default();
    let (machine, mut parent) = boot(config)?;
    map_pages(&parent, A, 2)?;
    let mut child = fork_and_resume(&machine, &mut parent)?;
    child.write(A, b"x")?;

    // parent: stack, text, A, B, exception stack
    // child: private copy of A, exception stack
    assert_eq!(machine.free_frames(), config.frames - BOOT_FRAMES - 5);
    child.exit()?;
    assert_eq!(machine.free_frames(), config.frames - BOOT_FRAMES - 3);
    parent.exit()?;
    assert_eq!(machine.free_frames(), config.frames);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn parent_and_child_run_concurrently() -> Result<(), anyhow::Error> {
    const NPAGES: usize = 16;
    const ROUNDS: usize = 8;

    let (machine, mut parent) = boot(MachineConfig::default())?;
    map_pages(&parent, A, NPAGES)?;
    let initial = helper::random_bytes(NPAGES * PAGE_SIZE);
    parent.write(A, &initial)?;
    let child = fork_and_resume(&machine, &mut parent)?;

    let tasks = [parent, child].map(|mut env| {
        let initial = initial.clone();
        tokio::task::spawn_blocking(move || -> Result<(), anyhow::Error> {
            assert_eq!(read_bytes(&mut env, A, initial.len())?, initial);
            let mut last = initial;
            for _ in 0..ROUNDS {
                let data = helper::random_bytes(NPAGES * PAGE_SIZE);
                env.write(A, &data)?;
                assert_eq!(read_bytes(&mut env, A, data.len())?, data);
                last = data;
            }
            assert_eq!(read_bytes(&mut env, A, last.len())?, last);
            Ok(())
        })
    });
    for task in tasks {
        task.await??;
    }
    Ok(())
}
