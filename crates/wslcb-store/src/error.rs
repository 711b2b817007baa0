#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("invalid domain value: {0}")]
    Domain(#[from] wslcb_model::DomainError),

    #[error("record is missing required field {field}")]
    MissingField { field: &'static str },
}

pub type Result<T> = std::result::Result<T, Error>;
