use std::fmt;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug)]
pub enum ApiError {
    Network(reqwest::Error, String),
    Parsing(reqwest::Error, String),
    Status(u16, String),
    /// A required key or field was absent from the input.
    Lookup(String),
    /// A value had the wrong shape for the step consuming it.
    Coercion(String),
    /// The store rejected an entity that would duplicate an existing key.
    Conflict(String),
    NotFound(String),
    Storage(String),
    Other(String),
}

impl ApiError {
    /// Errors raised while fetching or decoding a remote document.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            ApiError::Network(..) | ApiError::Parsing(..) | ApiError::Status(..)
        )
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiError::Network(e, url) => write!(f, "Network error for {url}: {e}"),
            ApiError::Parsing(e, url) => write!(f, "Parse error for {url}: {e}"),
            ApiError::Status(code, url) => write!(f, "HTTP {code} for {url}"),
            ApiError::Lookup(msg) => write!(f, "Lookup error: {msg}"),
            ApiError::Coercion(msg) => write!(f, "Type error: {msg}"),
            ApiError::Conflict(msg) => write!(f, "Conflict: {msg}"),
            ApiError::NotFound(msg) => write!(f, "Not found: {msg}"),
            ApiError::Storage(msg) => write!(f, "Storage error: {msg}"),
            ApiError::Other(msg) => write!(f, "Error: {msg}"),
        }
    }
}

impl std::error::Error for ApiError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ApiError::Network(e, _) | ApiError::Parsing(e, _) => Some(e),
            _ => None,
        }
    }
}
