#[derive(Debug, Clone)]
pub enum SourceError {
    NotConnected,
    Transport(String),
    Status(u16),
    MalformedBody(String),
}

impl SourceError {
    /// Transport problems and bad statuses are worth retrying; a body
    /// that does not match the contract is not, retrying cannot fix it.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, SourceError::MalformedBody(_))
    }
}

impl std::fmt::Display for SourceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceError::NotConnected => write!(f, "ad source not connected"),
            SourceError::Transport(msg) => write!(f, "transport error: {}", msg),
            SourceError::Status(code) => write!(f, "unexpected status: {}", code),
            SourceError::MalformedBody(msg) => write!(f, "malformed body: {}", msg),
        }
    }
}

impl std::error::Error for SourceError {}
