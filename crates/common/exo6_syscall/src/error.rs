use strum::FromRepr;

/// Errors returned by kernel primitives.
///
/// On the raw system call boundary an error travels as the negated
/// discriminant, see [`SyscallError::code`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromRepr, thiserror::Error)]
#[repr(isize)]
pub enum SyscallError {
    // E_UNSPECIFIED
    #[error("unspecified error")]
    Unspecified = 1,
    // E_BAD_ENV
    #[error("bad environment")]
    BadEnv = 2,
    // E_INVAL
    #[error("invalid parameter")]
    Invalid = 3,
    // E_NO_MEM
    #[error("out of memory")]
    NoMemory = 4,
    // E_NO_FREE_ENV
    #[error("out of environments")]
    NoFreeEnv = 5,
}

impl SyscallError {
    /// Returns the raw (negative) return value encoding this error.
    #[must_use]
    pub const fn code(self) -> isize {
        -(self as isize)
    }

    /// Decodes a raw negative return value.
    #[must_use]
    pub fn from_code(code: isize) -> Option<Self> {
        Self::from_repr(code.checked_neg()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_negative() {
        assert_eq!(SyscallError::NoMemory.code(), -4);
        assert_eq!(SyscallError::from_code(-2), Some(SyscallError::BadEnv));
    }

    #[test]
    fn non_error_codes_do_not_decode() {
        assert_eq!(SyscallError::from_code(0), None);
        assert_eq!(SyscallError::from_code(4), None);
        assert_eq!(SyscallError::from_code(-100), None);
        assert_eq!(SyscallError::from_code(isize::MIN), None);
    }

    #[test]
    fn display() {
        assert_eq!(SyscallError::NoMemory.to_string(), "out of memory");
    }
}
