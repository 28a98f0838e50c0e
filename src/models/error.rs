use std::fmt;

/// Failure to decode a replicated blob.
#[derive(Debug)]
pub enum WireError {
    Malformed(String),
    InvalidPeerId(String),
    InvalidOffset(String),
    NotAnObject,
    Json(serde_json::Error),
}

impl fmt::Display for WireError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WireError::Malformed(blob) => write!(f, "Malformed token '{}'", blob),
            WireError::InvalidPeerId(id) => write!(f, "Invalid peer id '{}'", id),
            WireError::InvalidOffset(offset) => write!(f, "Invalid offset '{}'", offset),
            WireError::NotAnObject => write!(f, "Sync data is not a JSON object"),
            WireError::Json(e) => write!(f, "JSON error: {}", e),
        }
    }
}

impl std::error::Error for WireError {}

/// Failure to load the timezone definition document.
#[derive(Debug)]
pub enum DefinitionError {
    Io(std::io::Error),
    Http(reqwest::Error),
    Json(serde_json::Error),
}

impl fmt::Display for DefinitionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DefinitionError::Io(e) => write!(f, "Failed to read definitions: {}", e),
            DefinitionError::Http(e) => write!(f, "Failed to download definitions: {}", e),
            DefinitionError::Json(e) => write!(f, "Failed to parse definitions: {}", e),
        }
    }
}

impl std::error::Error for DefinitionError {}

impl From<std::io::Error> for DefinitionError {
    fn from(e: std::io::Error) -> Self {
        DefinitionError::Io(e)
    }
}

impl From<reqwest::Error> for DefinitionError {
    fn from(e: reqwest::Error) -> Self {
        DefinitionError::Http(e)
    }
}

impl From<serde_json::Error> for DefinitionError {
    fn from(e: serde_json::Error) -> Self {
        DefinitionError::Json(e)
    }
}
