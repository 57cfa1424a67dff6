use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid session: {0}")]
    InvalidSession(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
