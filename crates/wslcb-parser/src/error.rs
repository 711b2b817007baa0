use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("no recognized section table found in document")]
    SectionNotFound,
}

pub type Result<T> = std::result::Result<T, Error>;
