#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("corrupt row in {table}.{column}: {detail}")]
    CorruptRow {
        table: &'static str,
        column: &'static str,
        detail: String,
    },

    #[error("IO error: {0}")]
    Io(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rusqlite_errors_map_to_database() {
        let err: StoreError = rusqlite::Error::InvalidQuery.into();
        assert!(matches!(err, StoreError::Database(_)));
    }

    #[test]
    fn display_includes_context() {
        let err = StoreError::CorruptRow {
            table: "sessions",
            column: "status",
            detail: "unknown session status: bogus".into(),
        };
        assert_eq!(
            err.to_string(),
            "corrupt row in sessions.status: unknown session status: bogus"
        );
        assert_eq!(
            StoreError::NotFound("session acme-default".into()).to_string(),
            "not found: session acme-default"
        );
    }
}
