use std::fmt;

/// The three error kinds the simulator can surface. `UnknownException` is the
/// only one the default supervisor auto-recovers from (via re-initialize).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidResponse,
    ConnectionError,
    UnknownException,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::InvalidResponse => write!(f, "InvalidResponse"),
            ErrorKind::ConnectionError => write!(f, "ConnectionError"),
            ErrorKind::UnknownException => write!(f, "UnknownException"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ErrorEvent {
    pub description: String,
    pub kind: ErrorKind,
}

impl ErrorEvent {
    pub fn new(description: impl Into<String>, kind: ErrorKind) -> Self {
        Self {
            description: description.into(),
            kind,
        }
    }

    pub fn timeout(action: &str, seconds: u64) -> Self {
        Self::new(
            format!("Action {action} Response Failed: response timeout, {seconds} seconds passed"),
            ErrorKind::InvalidResponse,
        )
    }
}

impl fmt::Display for ErrorEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.kind, self.description)
    }
}

impl std::error::Error for ErrorEvent {}
