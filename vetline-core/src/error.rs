use thiserror::Error;

#[derive(Error, Debug)]
pub enum VetlineError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("No candidates: {0}")]
    NoCandidates(String),

    /// Internal only; the gateway masks it with the assistant fallback reply.
    #[error("Assistant unavailable: {0}")]
    AssistantUnavailable(String),

    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("IPC error: {0}")]
    Ipc(String),

    #[error("Other error: {0}")]
    Other(String),
}

impl VetlineError {
    /// Stable machine-readable code carried in gateway responses.
    pub fn code(&self) -> &'static str {
        match self {
            VetlineError::Validation(_) => "validation_error",
            VetlineError::NotFound(_) => "not_found",
            VetlineError::Conflict(_) => "conflict",
            VetlineError::NoCandidates(_) => "no_candidates",
            VetlineError::AssistantUnavailable(_) => "assistant_unavailable",
            VetlineError::Config(_) => "config_error",
            VetlineError::Io(_) => "io_error",
            VetlineError::Ipc(_) => "ipc_error",
            VetlineError::Other(_) => "internal_error",
        }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        VetlineError::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        VetlineError::NotFound(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        VetlineError::Conflict(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_stable() {
        assert_eq!(VetlineError::validation("x").code(), "validation_error");
        assert_eq!(VetlineError::not_found("x").code(), "not_found");
        assert_eq!(VetlineError::conflict("x").code(), "conflict");
        assert_eq!(
            VetlineError::NoCandidates("x".into()).code(),
            "no_candidates"
        );
    }

    #[test]
    fn test_display_includes_message() {
        let err = VetlineError::not_found("request 42");
        assert_eq!(err.to_string(), "Not found: request 42");
    }
}
