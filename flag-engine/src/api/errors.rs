use thiserror::Error;

/// Errors raised while parsing or evaluating a segmentation DSL node.
///
/// These never escape evaluation: whichever predicate produced one is
/// treated as `false` and the surrounding tree keeps evaluating.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SegmentationError {
    #[error("malformed segment node: {0}")]
    MalformedNode(String),
    #[error("unknown segment operator: {0}")]
    UnknownOperator(String),
    #[error("invalid regex pattern {pattern}: {reason}")]
    InvalidRegex { pattern: String, reason: String },
    #[error("value is not a number: {0}")]
    InvalidNumber(String),
    #[error("can't match without a value, missing property: {0}")]
    MissingProperty(String),
}

#[derive(Error, Debug)]
pub enum FlagError {
    #[error("invalid settings: {0}")]
    ConfigurationError(String),
    #[error("failed to parse settings: {0}")]
    SettingsParsingError(#[from] serde_json::Error),
    #[error("invalid input: {0}")]
    InputValidationError(String),
    #[error(transparent)]
    SegmentationError(#[from] SegmentationError),
    #[error("enrichment unavailable: {0}")]
    EnrichmentUnavailable(&'static str),
    #[error("failed to hash bucketing key: {0}")]
    HashingError(String),
}

impl FlagError {
    /// Returns a short error code for logging and metric labels.
    pub fn error_code(&self) -> &'static str {
        match self {
            FlagError::ConfigurationError(_) => "configuration_error",
            FlagError::SettingsParsingError(_) => "settings_parsing_error",
            FlagError::InputValidationError(_) => "input_validation_error",
            FlagError::SegmentationError(_) => "segmentation_error",
            FlagError::EnrichmentUnavailable(_) => "enrichment_unavailable",
            FlagError::HashingError(_) => "hashing_error",
        }
    }
}
