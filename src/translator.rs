//! Pluggable translation of driver failures into domain errors.

use crate::error::{DriverError, TransactionError};

/// Maps a driver failure to a domain error.
///
/// Arguments are the task the coordinator was performing (e.g. `"commit"`),
/// the SQL statement involved if any, and the driver error. Returning `None`
/// lets the coordinator fall back to
/// [`TransactionError::TransactionSystem`].
pub type ExceptionTranslator =
    dyn Fn(&str, Option<&str>, &DriverError) -> Option<TransactionError> + Send + Sync;

/// The default translation, applied when no translator is configured:
/// SQLSTATE class `40` (serialization failure, deadlock) becomes a
/// [`TransactionError::ConcurrencyFailure`]; anything else is left for the
/// generic fallback.
pub fn default_translate(
    task: &str,
    _sql: Option<&str>,
    error: &DriverError,
) -> Option<TransactionError> {
    if error.sqlstate_class() == Some("40") {
        return Some(TransactionError::ConcurrencyFailure {
            task: task.to_string(),
            cause: error.clone(),
        });
    }
    None
}
