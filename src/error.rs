use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Corruption detected: {0}")]
    Corruption(String),
}

pub type Result<T> = std::result::Result<T, Error>;
