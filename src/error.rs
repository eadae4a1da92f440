use crate::concurrency::TransactionId;
use crate::storage::PageId;
use std::io;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The lock wait of a transaction ran past its timeout. Fatal to the
    /// whole transaction: roll it back and release everything it holds.
    #[error("transaction {0} aborted")]
    TransactionAborted(TransactionId),

    #[error("transaction {0} is not active")]
    TransactionNotActive(TransactionId),

    #[error("{0}")]
    Io(#[from] io::Error),

    #[error("{0}")]
    Codec(#[from] bincode::Error),

    #[error("unknown table {0}")]
    UnknownTable(u32),

    #[error("page {0} is out of range")]
    PageOutOfRange(PageId),

    #[error("buffer pool is full of dirty pages")]
    BufferPoolFull,

    #[error("invalid config: {0}")]
    InvalidConfig(String),
}

impl Error {
    pub fn is_aborted(&self) -> bool {
        matches!(self, Error::TransactionAborted(_))
    }
}

impl PartialEq for Error {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::TransactionAborted(a), Self::TransactionAborted(b))
            | (Self::TransactionNotActive(a), Self::TransactionNotActive(b)) => a == b,
            (Self::UnknownTable(a), Self::UnknownTable(b)) => a == b,
            (Self::PageOutOfRange(a), Self::PageOutOfRange(b)) => a == b,
            (Self::BufferPoolFull, Self::BufferPoolFull) => true,
            (Self::InvalidConfig(a), Self::InvalidConfig(b)) => a == b,
            _ => false,
        }
    }
}
