pub type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
  #[error("index is at capacity (max_elements={max_elements})")]
  OutOfCapacity { max_elements: usize },

  #[error("unsupported space {0:?}, supported: l2, ip")]
  UnsupportedSpace(String),

  #[error("dimension mismatch: expected {expected}, got {actual}")]
  DimensionMismatch { expected: usize, actual: usize },

  #[error("no indexed attribute inside the requested range")]
  RangeEmpty,

  #[error("corrupt index file: {0}")]
  CorruptFile(String),

  #[error("allocation of {0} bytes failed")]
  AllocFailed(usize),

  #[error("internal invariant violated: {0}")]
  InternalInvariant(String),

  #[error("replace_deleted is reserved and must be false; deletion is not implemented")]
  ReplaceDeletedUnsupported,

  #[error(transparent)]
  Io(#[from] std::io::Error),
}
