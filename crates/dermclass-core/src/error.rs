//! Error types for dermclass

/// Result type alias using dermclass's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for dermclass operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Malformed input rejected at a component boundary
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A vector or table does not have the length the catalog requires
    #[error("dimension mismatch for {what}: expected {expected}, got {actual}")]
    DimensionMismatch {
        what: String,
        expected: usize,
        actual: usize,
    },

    /// Catalog, checkpoint, or threshold artifacts were produced for different versions
    #[error("version mismatch in {artifact}: expected {expected}, found {found}")]
    VersionMismatch {
        artifact: String,
        expected: String,
        found: String,
    },

    /// Configuration errors
    #[error("configuration error: {0}")]
    Config(String),

    /// Model loading or scoring errors
    #[error("model error: {0}")]
    Model(String),

    /// Filesystem errors
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization errors
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML serialization errors
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Generic internal errors
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a new invalid input error
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Create a new dimension mismatch error
    pub fn dimension(what: impl Into<String>, expected: usize, actual: usize) -> Self {
        Self::DimensionMismatch {
            what: what.into(),
            expected,
            actual,
        }
    }

    /// Create a new version mismatch error
    pub fn version_mismatch(
        artifact: impl Into<String>,
        expected: impl Into<String>,
        found: impl Into<String>,
    ) -> Self {
        Self::VersionMismatch {
            artifact: artifact.into(),
            expected: expected.into(),
            found: found.into(),
        }
    }

    /// Create a new configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a new model error
    pub fn model(msg: impl Into<String>) -> Self {
        Self::Model(msg.into())
    }

    /// Create a new internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Whether this error signals mismatched artifact versions
    pub fn is_version_mismatch(&self) -> bool {
        matches!(self, Self::VersionMismatch { .. })
    }
}
