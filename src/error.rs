use thiserror::Error;

/// Primary SQLite result codes that signal lock contention rather than a bad statement.
const SQLITE_BUSY: i64 = 5;
const SQLITE_LOCKED: i64 = 6;

#[derive(Debug, Error)]
pub enum DocError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Transient lock contention reported by the storage engine.
    #[error("storage busy: {0}")]
    Busy(String),

    /// The retry budget for a store write ran out while the engine stayed busy.
    #[error("storage unavailable: {operation} still busy after {attempts} attempts")]
    StorageUnavailable { operation: &'static str, attempts: u32 },

    #[error("constraint violation: {0}")]
    Constraint(String),

    #[error("Database error: {0}")]
    Db(sqlx::Error),

    #[error("document not found: {0}")]
    NotFound(String),

    #[error("watch failed: {0}")]
    Watch(#[from] notify::Error),

    #[error("invalid config: {0}")]
    Config(String),

    #[error("watcher service is not running")]
    Closed,

    #[error("watch loop task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl DocError {
    /// Whether the failure is worth retrying. Only engine lock contention qualifies.
    pub fn is_transient(&self) -> bool {
        matches!(self, DocError::Busy(_))
    }
}

impl From<sqlx::Error> for DocError {
    fn from(err: sqlx::Error) -> Self {
        if matches!(err, sqlx::Error::PoolTimedOut) {
            return DocError::Busy("connection pool timed out".into());
        }

        if let Some(db) = err.as_database_error() {
            let primary = db
                .code()
                .and_then(|code| code.parse::<i64>().ok())
                .map(|code| code & 0xff);
            if matches!(primary, Some(SQLITE_BUSY) | Some(SQLITE_LOCKED)) {
                return DocError::Busy(db.message().to_string());
            }
            if matches!(
                db.kind(),
                sqlx::error::ErrorKind::UniqueViolation
                    | sqlx::error::ErrorKind::ForeignKeyViolation
                    | sqlx::error::ErrorKind::NotNullViolation
                    | sqlx::error::ErrorKind::CheckViolation
            ) {
                return DocError::Constraint(db.message().to_string());
            }
        }

        DocError::Db(err)
    }
}

pub type DocResult<T> = Result<T, DocError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_busy_is_transient() {
        assert!(DocError::Busy("database is locked".into()).is_transient());
        assert!(!DocError::Constraint("UNIQUE constraint failed".into()).is_transient());
        assert!(
            !DocError::StorageUnavailable {
                operation: "create",
                attempts: 3
            }
            .is_transient()
        );
        assert!(!DocError::Db(sqlx::Error::RowNotFound).is_transient());
    }

    #[test]
    fn pool_timeout_is_treated_as_busy() {
        let err = DocError::from(sqlx::Error::PoolTimedOut);
        assert!(err.is_transient());
    }

    #[test]
    fn non_database_sqlx_errors_stay_fatal() {
        let err = DocError::from(sqlx::Error::RowNotFound);
        assert!(matches!(err, DocError::Db(_)));
    }
}
