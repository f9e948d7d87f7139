//! Common error types for stereohook.

use thiserror::Error;

/// Result type alias using stereohook's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type for plugin operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error (bad pattern, bad setting value)
    #[error("configuration error: {0}")]
    Config(String),

    /// Installing an interception failed
    #[error("hook error: {0}")]
    Hook(String),

    /// Resource not found (module, export, signature)
    #[error("not found: {0}")]
    NotFound(String),

    /// A host graphics object could not be queried
    #[error("graphics error: {0}")]
    Graphics(String),
}

impl Error {
    /// Create a config error from any displayable type.
    pub fn config(msg: impl std::fmt::Display) -> Self {
        Self::Config(msg.to_string())
    }

    /// Create a hook error from any displayable type.
    pub fn hook(msg: impl std::fmt::Display) -> Self {
        Self::Hook(msg.to_string())
    }

    /// Create a not found error from any displayable type.
    pub fn not_found(msg: impl std::fmt::Display) -> Self {
        Self::NotFound(msg.to_string())
    }

    /// Create a graphics error from any displayable type.
    pub fn graphics(msg: impl std::fmt::Display) -> Self {
        Self::Graphics(msg.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constructors_prefix_the_category() {
        assert_eq!(
            Error::config("bad token 'zz'").to_string(),
            "configuration error: bad token 'zz'"
        );
        assert_eq!(Error::hook("slot taken").to_string(), "hook error: slot taken");
        assert_eq!(Error::not_found("XInput").to_string(), "not found: XInput");
        assert!(matches!(Error::graphics(42), Error::Graphics(msg) if msg == "42"));
    }
}
