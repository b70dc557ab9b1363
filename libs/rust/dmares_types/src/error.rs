use core::fmt;

macro_rules! define_errors {
    ($($name:ident = $value:expr),* $(,)?) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(isize)]
        pub enum ErrorCode {
            $($name = $value,)*
        }

        impl From<isize> for ErrorCode {
            fn from(value: isize) -> Self {
                match value {
                    $($value => ErrorCode::$name,)*
                    _ => ErrorCode::InvalidErrorCode,
                }
            }
        }
    };
}

define_errors!(
    NotSupported = -1,
    InvalidArg = -2,
    InvalidAlignment = -3,
    InvalidSize = -4,
    NullAddress = -5,
    MisalignedAddress = -6,
    UnsupportedDomain = -7,
    UnsupportedTag = -8,
    UnsupportedSize = -9,
    OutOfRange = -10,
    OutOfHandles = -11,
    TableOverflow = -12,
    OutOfBlocks = -13,
    BankLocked = -14,
    BankInUse = -15,
    OutOfMemory = -16,
    InvalidHandle = -17,
    NoMapping = -18,
    NoParent = -19,
    UnknownBank = -20,
    NotCheckedOut = -21,
    AlreadyReleased = -22,
    MapFailed = -23,
    InvalidErrorCode = -24,
);

impl ErrorCode {
    pub const fn as_isize(self) -> isize {
        self as isize
    }

    /// Returns `true` for errors caused by a temporarily exhausted resource.
    ///
    /// Callers may retry these later, or fall back to bouncing the data
    /// through a buffer that is not managed here.
    pub const fn is_capacity(self) -> bool {
        matches!(
            self,
            ErrorCode::OutOfHandles
                | ErrorCode::TableOverflow
                | ErrorCode::OutOfBlocks
                | ErrorCode::BankLocked
                | ErrorCode::BankInUse
                | ErrorCode::OutOfMemory
        )
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl core::error::Error for ErrorCode {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_isize() {
        assert_eq!(ErrorCode::from(-13), ErrorCode::OutOfBlocks);
        assert_eq!(ErrorCode::from(ErrorCode::NoParent.as_isize()), ErrorCode::NoParent);
        assert_eq!(ErrorCode::from(0), ErrorCode::InvalidErrorCode);
        assert_eq!(ErrorCode::from(-1000), ErrorCode::InvalidErrorCode);
    }

    #[test]
    fn test_capacity_errors() {
        assert!(ErrorCode::OutOfBlocks.is_capacity());
        assert!(ErrorCode::BankLocked.is_capacity());
        assert!(!ErrorCode::InvalidHandle.is_capacity());
        assert!(!ErrorCode::InvalidSize.is_capacity());
    }
}
