//! Row mapping helpers shared by the `SQLite` repositories.

use chrono::{DateTime, Utc};
use sqlx::Row;
use sqlx::sqlite::SqliteRow;

use voxrelay_core::RepositoryError;

/// Encode a timestamp as epoch milliseconds.
pub fn to_millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

pub fn from_millis(column: &str, millis: i64) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::from_timestamp_millis(millis).ok_or_else(|| {
        RepositoryError::Serialization(format!("{column}: timestamp {millis} out of range"))
    })
}

pub fn opt_from_millis(
    column: &str,
    millis: Option<i64>,
) -> Result<Option<DateTime<Utc>>, RepositoryError> {
    millis.map(|ms| from_millis(column, ms)).transpose()
}

/// Read a required epoch-millisecond column.
pub fn get_timestamp(row: &SqliteRow, column: &str) -> Result<DateTime<Utc>, RepositoryError> {
    let millis: i64 = row.try_get(column).map_err(map_column_error)?;
    from_millis(column, millis)
}

/// Read a nullable epoch-millisecond column.
pub fn get_opt_timestamp(
    row: &SqliteRow,
    column: &str,
) -> Result<Option<DateTime<Utc>>, RepositoryError> {
    let millis: Option<i64> = row.try_get(column).map_err(map_column_error)?;
    opt_from_millis(column, millis)
}

/// Convert an unsigned size to the signed representation `SQLite` stores.
pub fn to_sql_u64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

pub fn map_column_error(e: sqlx::Error) -> RepositoryError {
    RepositoryError::Storage(format!("Column read error: {e}"))
}

pub fn map_storage_error(e: sqlx::Error) -> RepositoryError {
    RepositoryError::Storage(e.to_string())
}

/// Map errors from INSERT statements, surfacing unique violations.
pub fn map_insert_error(what: &str, e: sqlx::Error) -> RepositoryError {
    match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            RepositoryError::AlreadyExists(format!("{what}: {}", db.message()))
        }
        _ => RepositoryError::Storage(e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_millis_round_trip_truncates_to_millis() {
        let at = DateTime::from_timestamp_millis(1_700_000_000_123).unwrap();
        assert_eq!(from_millis("t", to_millis(at)).unwrap(), at);
    }

    #[test]
    fn test_out_of_range_timestamp() {
        assert!(matches!(
            from_millis("created_at", i64::MAX),
            Err(RepositoryError::Serialization(_))
        ));
    }
}
