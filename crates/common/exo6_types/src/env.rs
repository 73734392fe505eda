use core::{fmt, num::NonZero};

/// Identifier of an environment (a process, in exokernel terms).
///
/// The kernel never hands out zero, so "no environment" is spelled
/// `Option<EnvId>` instead of a sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct EnvId(NonZero<u32>);

impl fmt::Display for EnvId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08x}", self.0.get())
    }
}

impl fmt::LowerHex for EnvId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::LowerHex::fmt(&self.0.get(), f)
    }
}

impl From<EnvId> for u32 {
    fn from(value: EnvId) -> Self {
        value.0.get()
    }
}

impl EnvId {
    /// Builds an id from its raw encoding, rejecting zero.
    #[must_use]
    pub const fn from_raw(value: u32) -> Option<Self> {
        match NonZero::new(value) {
            Some(value) => Some(Self(value)),
            None => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_is_not_an_env_id() {
        assert!(EnvId::from_raw(0).is_none());
        assert_eq!(EnvId::from_raw(0x1001).map(u32::from), Some(0x1001));
    }

    #[test]
    fn display_is_zero_padded_hex() {
        let id = EnvId::from_raw(0x1001).unwrap();
        assert_eq!(id.to_string(), "00001001");
        assert_eq!(format!("{id:x}"), "1001");
    }
}
