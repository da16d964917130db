/// Failure taxonomy for one design request.
///
/// `Configuration` and `InvalidRequest` are raised before any model call is
/// made. `Generation` and `Extraction` are terminal for the request that
/// produced them; nothing in the pipeline retries them.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecorError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("invalid design request: {0}")]
    InvalidRequest(String),

    #[error("redesign failed: {0}")]
    Generation(String),

    #[error("furniture extraction failed: {0}")]
    Extraction(String),
}

impl DecorError {
    /// Stage label used in `design_failed` events.
    pub fn stage(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "configuration",
            Self::InvalidRequest(_) => "intake",
            Self::Generation(_) => "synthesis",
            Self::Extraction(_) => "extraction",
        }
    }

    /// True for failures the user must fix before any request can run.
    pub fn is_setup_error(&self) -> bool {
        matches!(self, Self::Configuration(_) | Self::InvalidRequest(_))
    }

    pub fn message(&self) -> &str {
        match self {
            Self::Configuration(message)
            | Self::InvalidRequest(message)
            | Self::Generation(message)
            | Self::Extraction(message) => message,
        }
    }
}

pub type DecorResult<T> = Result<T, DecorError>;

#[cfg(test)]
mod tests {
    use super::DecorError;

    #[test]
    fn display_names_the_failed_stage() {
        let err = DecorError::Generation("Gemini returned no images".to_string());
        assert_eq!(err.to_string(), "redesign failed: Gemini returned no images");
        assert_eq!(err.stage(), "synthesis");
        assert_eq!(err.message(), "Gemini returned no images");

        let err = DecorError::Extraction("response is not a JSON array".to_string());
        assert_eq!(
            err.to_string(),
            "furniture extraction failed: response is not a JSON array"
        );
        assert_eq!(err.stage(), "extraction");
    }

    #[test]
    fn setup_errors_are_configuration_and_intake_only() {
        assert!(DecorError::Configuration("GEMINI_API_KEY not set".into()).is_setup_error());
        assert!(DecorError::InvalidRequest("style directive is blank".into()).is_setup_error());
        assert!(!DecorError::Generation("timeout".into()).is_setup_error());
        assert!(!DecorError::Extraction("not json".into()).is_setup_error());
    }
}
