use thiserror::Error;

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("unique constraint violated: {0}")]
    Conflict(String),
    #[error("referenced record does not exist: {0}")]
    MissingReference(String),
    #[error("database error: {0}")]
    Database(sqlx::Error),
}

pub type RepoResult<T> = Result<T, RepoError>;

impl From<sqlx::Error> for RepoError {
    fn from(err: sqlx::Error) -> Self {
        let classified = match &err {
            sqlx::Error::RowNotFound => Some(RepoError::NotFound("record")),
            sqlx::Error::Database(db_err) => {
                let constraint = db_err.constraint().unwrap_or("unknown").to_string();
                match db_err.code().as_deref() {
                    Some("23505") => Some(RepoError::Conflict(constraint)),
                    Some("23503") => Some(RepoError::MissingReference(constraint)),
                    _ => None,
                }
            }
            _ => None,
        };
        classified.unwrap_or(RepoError::Database(err))
    }
}

pub trait OrNotFound<T> {
    /// Turns an empty lookup into `RepoError::NotFound`.
    fn or_not_found(self, entity: &'static str) -> RepoResult<T>;
}

impl<T> OrNotFound<T> for Option<T> {
    fn or_not_found(self, entity: &'static str) -> RepoResult<T> {
        self.ok_or(RepoError::NotFound(entity))
    }
}

impl<T> OrNotFound<T> for RepoResult<Option<T>> {
    fn or_not_found(self, entity: &'static str) -> RepoResult<T> {
        self?.or_not_found(entity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_not_found_maps_to_not_found() {
        let err: RepoError = sqlx::Error::RowNotFound.into();
        assert!(matches!(err, RepoError::NotFound(_)));
    }

    #[test]
    fn empty_lookup_names_entity() {
        let missing: Option<u8> = None;
        let err = missing.or_not_found("lead").unwrap_err();
        assert_eq!(err.to_string(), "lead not found");

        let found: RepoResult<Option<u8>> = Ok(Some(7));
        assert_eq!(found.or_not_found("lead").unwrap(), 7);
    }
}
