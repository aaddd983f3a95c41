use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("rocksdb: {0}")]
    Rocks(#[from] rocksdb::Error),

    /// The store was opened without this column family.
    #[error("column family `{0}` is not open")]
    MissingColumnFamily(&'static str),

    /// A batch was refused as a whole; none of its ops were applied.
    #[error("batch of {ops} ops refused: {reason}")]
    BatchRefused { ops: usize, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;
