use thiserror::Error;

/// Why a single completion attempt failed. Every variant is retried the
/// same way by the broker.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AttemptError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("remote error: {0}")]
    Remote(String),
    #[error("malformed response: {0}")]
    Malformed(String),
}

/// The only failure callers of the broker ever see.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("completion unavailable after {attempts} attempts: {cause}")]
pub struct CompletionError {
    pub attempts: u32,
    pub cause: AttemptError,
}

#[derive(Debug, Error)]
pub enum PlanError {
    #[error(transparent)]
    Completion(#[from] CompletionError),
    #[error("no JSON object found in planning response")]
    MissingJson,
    #[error("could not parse project plan: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
#[error("template rendering failed: {0}")]
pub struct TemplateError(#[from] pub minijinja::Error);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_completion_error_message_carries_cause() {
        let err = CompletionError {
            attempts: 5,
            cause: AttemptError::Remote("quota exceeded".to_string()),
        };
        assert_eq!(
            err.to_string(),
            "completion unavailable after 5 attempts: remote error: quota exceeded"
        );
    }
}
