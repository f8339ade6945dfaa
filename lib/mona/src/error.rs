use std::io;
use thiserror::Error as ThisError;

pub type Result<T> = std::result::Result<T, Error>;

/// Classifies a failure for routing and reporting purposes.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ErrorKind {
    Network,
    Permission,
    Unfound,
    System,
    Intern,
    Format,
    Argument,
}

/// A structured error carried across thread boundaries inside completions.
/// Workers never unwind; they record one of these and hand it to the owner
/// handler, which surfaces it through the subject's error event.
#[derive(Debug, Clone, ThisError)]
#[error("{message}")]
pub struct Error {
    kind: ErrorKind,
    code: Option<i32>,
    message: String,
}

impl Error {
    #[inline]
    pub fn new<M: Into<String>>(kind: ErrorKind, message: M) -> Error {
        Error {
            kind,
            code: None,
            message: message.into(),
        }
    }

    #[inline]
    pub fn with_code<M: Into<String>>(kind: ErrorKind, code: i32, message: M) -> Error {
        Error {
            kind,
            code: Some(code),
            message: message.into(),
        }
    }

    /// The taxonomy bucket of the failure.
    #[inline]
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// The OS error number, when the failure originated in a syscall.
    #[inline]
    pub fn code(&self) -> Option<i32> {
        self.code
    }

    #[inline]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<io::Error> for Error {
    fn from(io_error: io::Error) -> Self {
        let kind = match io_error.kind() {
            io::ErrorKind::NotFound => ErrorKind::Unfound,
            io::ErrorKind::PermissionDenied => ErrorKind::Permission,
            io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::NotConnected
            | io::ErrorKind::AddrInUse
            | io::ErrorKind::AddrNotAvailable
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::UnexpectedEof => ErrorKind::Network,
            io::ErrorKind::InvalidInput => ErrorKind::Argument,
            io::ErrorKind::InvalidData => ErrorKind::Format,
            _ => ErrorKind::System,
        };

        Error {
            kind,
            code: io_error.raw_os_error(),
            message: io_error.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_kind_mapping() {
        let unfound = Error::from(io::Error::from(io::ErrorKind::NotFound));
        assert_eq!(unfound.kind(), ErrorKind::Unfound);

        let permission = Error::from(io::Error::from(io::ErrorKind::PermissionDenied));
        assert_eq!(permission.kind(), ErrorKind::Permission);

        let network = Error::from(io::Error::from(io::ErrorKind::ConnectionRefused));
        assert_eq!(network.kind(), ErrorKind::Network);

        let system = Error::from(io::Error::from(io::ErrorKind::TimedOut));
        assert_eq!(system.kind(), ErrorKind::System);
    }

    #[test]
    fn test_os_code_preserved() {
        let refused = Error::from(io::Error::from_raw_os_error(libc_econnrefused()));
        assert_eq!(refused.code(), Some(libc_econnrefused()));
    }

    #[cfg(unix)]
    fn libc_econnrefused() -> i32 {
        111
    }

    #[cfg(not(unix))]
    fn libc_econnrefused() -> i32 {
        10061
    }

    #[test]
    fn test_display_carries_message() {
        let err = Error::new(ErrorKind::Argument, "socket already open");
        assert_eq!(err.to_string(), "socket already open");
        assert_eq!(err.message(), "socket already open");
    }
}
