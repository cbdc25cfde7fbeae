use substrate::StorageError;

/// Outcome kinds surfaced to the shell. `Ok(_)` plays the role of a
/// success code; everything here maps to a single human-readable line.
#[derive(Debug)]
pub enum DbError {
    Failed(String),
    AlreadyExist,
    NotExist,
    TableAlreadyExist,
    TableNotExist,
    IndexAlreadyExist,
    IndexNotFound,
    ColumnNameNotExist,
    KeyNotFound,
    Quit,
    /// Disk or buffer-pool failure. Recovery is out of scope, so the
    /// shell reports it and exits non-zero.
    Storage(StorageError),
    Parse(String),
}

impl From<StorageError> for DbError {
    fn from(err: StorageError) -> Self {
        DbError::Storage(err)
    }
}

impl From<std::io::Error> for DbError {
    fn from(err: std::io::Error) -> Self {
        DbError::Storage(StorageError::Io(err))
    }
}

impl std::fmt::Display for DbError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DbError::Failed(msg) => write!(f, "Error: {msg}"),
            DbError::AlreadyExist => write!(f, "Database already exists."),
            DbError::NotExist => write!(f, "Database not exists."),
            DbError::TableAlreadyExist => write!(f, "Table already exists."),
            DbError::TableNotExist => write!(f, "Table not exists."),
            DbError::IndexAlreadyExist => write!(f, "Index already exists."),
            DbError::IndexNotFound => write!(f, "Index not exists."),
            DbError::ColumnNameNotExist => write!(f, "Column not exists."),
            DbError::KeyNotFound => write!(f, "Key not exists."),
            DbError::Quit => write!(f, "Bye."),
            DbError::Storage(err) => write!(f, "Storage failure: {err}"),
            DbError::Parse(msg) => write!(f, "Syntax error: {msg}"),
        }
    }
}
