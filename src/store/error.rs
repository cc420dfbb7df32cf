use std::fmt;

#[derive(Debug)]
pub enum StoreError {
    Sqlite(rusqlite::Error),
    Io(std::io::Error),
    Encode(serde_json::Error),
    Decode { key: String, source: serde_json::Error },
    /// Stored value was written for a different type or schema version.
    SchemaMismatch {
        key: String,
        kind: String,
        version: u32,
    },
    /// Key is absent.
    NotFound(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Sqlite(e) => write!(f, "SQLite error: {e}"),
            StoreError::Io(e) => write!(f, "IO error: {e}"),
            StoreError::Encode(e) => write!(f, "encode error: {e}"),
            StoreError::Decode { key, source } => write!(f, "decode error for key '{key}': {source}"),
            StoreError::SchemaMismatch { key, kind, version } => write!(
                f,
                "key '{key}' holds a '{kind}' value at schema version {version}"
            ),
            StoreError::NotFound(key) => write!(f, "key not found: {key}"),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StoreError::Sqlite(e) => Some(e),
            StoreError::Io(e) => Some(e),
            StoreError::Encode(e) => Some(e),
            StoreError::Decode { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Sqlite(e)
    }
}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        StoreError::Io(e)
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
