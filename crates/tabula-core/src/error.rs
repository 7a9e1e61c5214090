use thiserror::Error;

/// Canonical result for core.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// A named key/field is absent from the header.
    #[error("field selection error: no field {0}")]
    FieldSelection(String),

    /// Key extraction indexed past the end of a short row.
    #[error("row too short for key: position {position} but row has {len} values")]
    ShortRow { position: usize, len: usize },

    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Programmer error: invalid key arity, unsupported operator combination.
    #[error("contract violation: {0}")]
    Contract(String),

    #[error("Hashing error: {0}")]
    Hash(String),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Hash(e.to_string())
    }
}
