#[derive(thiserror::Error, Debug)]
pub enum CtcError {
    /// Misuse of the kernel: bad shapes, bad labels, not enough time.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Worker error: {0}")]
    Worker(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CtcError {
    pub fn invalid_argument<S: Into<String>>(msg: S) -> Self {
        CtcError::InvalidArgument(msg.into())
    }

    pub fn is_invalid_argument(&self) -> bool {
        matches!(self, CtcError::InvalidArgument(_))
    }
}

pub type Result<T> = core::result::Result<T, CtcError>;
