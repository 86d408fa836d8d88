use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors raised by the IR, the pass drivers and evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// An operator rejected its input shapes.
    #[error("{op}: {message}")]
    Shape { op: String, message: String },

    /// A query that is not meaningful for the current state (e.g. `lens()` of a dynamic shape).
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// A module failed `validate()` or `find_dangling_reference()`.
    #[error("module `{module}`: instruction at position {position} is invalid: {message}")]
    Structural {
        module: String,
        position: usize,
        message: String,
    },

    /// A name was requested that was never bound, or a parameter binding is missing/mismatched.
    #[error("lookup failed: {0}")]
    Lookup(String),

    /// An erase was attempted on an instruction that still has users.
    #[error("cannot erase instruction at position {position}: it still has {users} user(s)")]
    Use { position: usize, users: usize },

    /// An operator failed while computing its value.
    #[error("{op} failed: {message}")]
    Compute { op: String, message: String },
}

impl Error {
    pub fn shape(op: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Shape {
            op: op.into(),
            message: message.into(),
        }
    }

    pub fn invalid_state(message: impl Into<String>) -> Self {
        Error::InvalidState(message.into())
    }

    pub fn lookup(message: impl Into<String>) -> Self {
        Error::Lookup(message.into())
    }

    pub fn compute(op: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Compute {
            op: op.into(),
            message: message.into(),
        }
    }

    pub fn structural(module: impl Into<String>, position: usize, message: impl Into<String>) -> Self {
        Error::Structural {
            module: module.into(),
            position,
            message: message.into(),
        }
    }
}
