//! Conversions from external infrastructure errors into domain errors.

use reqwest::Error as HttpError;
use rusqlite::Error as SqlError;
use tether_domain::{NetworkErrorKind, TetherError};

use crate::http::classify_status;

/// Error newtype that keeps conversions on the infrastructure side and can be
/// converted back into the domain error.
#[derive(Debug)]
pub struct InfraError(pub TetherError);

impl From<InfraError> for TetherError {
    fn from(value: InfraError) -> Self {
        value.0
    }
}

impl From<TetherError> for InfraError {
    fn from(value: TetherError) -> Self {
        InfraError(value)
    }
}

trait IntoTetherError {
    fn into_tether(self) -> TetherError;
}

/* -------------------------------------------------------------------------- */
/* rusqlite::Error → TetherError */
/* -------------------------------------------------------------------------- */

impl IntoTetherError for SqlError {
    fn into_tether(self) -> TetherError {
        use rusqlite::ffi::ErrorCode;
        use rusqlite::Error as RE;

        match self {
            RE::SqliteFailure(err, maybe_message) => {
                let message = maybe_message.unwrap_or_default();
                match (err.code, err.extended_code) {
                    (ErrorCode::DatabaseBusy, _) => TetherError::Database("database is busy".into()),
                    (ErrorCode::DatabaseLocked, _) => {
                        TetherError::Database("database is locked".into())
                    }
                    // SQLITE_CONSTRAINT_PRIMARYKEY / SQLITE_CONSTRAINT_UNIQUE
                    (ErrorCode::ConstraintViolation, 1555 | 2067) => {
                        TetherError::InvalidState(format!("duplicate key: {message}"))
                    }
                    (ErrorCode::ConstraintViolation, 787) => {
                        TetherError::Database("foreign key constraint violation".into())
                    }
                    (ErrorCode::ConstraintViolation, 275) => {
                        TetherError::InvalidInput(format!("check constraint failed: {message}"))
                    }
                    _ => TetherError::Database(format!(
                        "sqlite failure {:?} (code {}): {}",
                        err.code, err.extended_code, message
                    )),
                }
            }
            RE::QueryReturnedNoRows => TetherError::NotFound("no rows returned by query".into()),
            RE::FromSqlConversionFailure(_, _, cause) => {
                TetherError::Database(format!("failed to convert sqlite value: {cause}"))
            }
            RE::InvalidColumnType(_, name, ty) => {
                TetherError::Database(format!("invalid column type for {name}: {ty}"))
            }
            RE::Utf8Error(_) => TetherError::Database("invalid UTF-8 returned from sqlite".into()),
            RE::InvalidParameterName(parameter_name) => {
                TetherError::Database(format!("invalid parameter name: {parameter_name}"))
            }
            RE::InvalidPath(path) => TetherError::Config(format!(
                "invalid database path: {}",
                path.to_string_lossy()
            )),
            RE::InvalidQuery => TetherError::Database("invalid SQL query".into()),
            other => TetherError::Database(other.to_string()),
        }
    }
}

impl From<SqlError> for InfraError {
    fn from(value: SqlError) -> Self {
        InfraError(value.into_tether())
    }
}

/* -------------------------------------------------------------------------- */
/* r2d2::Error → TetherError */
/* -------------------------------------------------------------------------- */

impl From<r2d2::Error> for InfraError {
    fn from(value: r2d2::Error) -> Self {
        InfraError(TetherError::Database(format!("connection pool: {value}")))
    }
}

/* -------------------------------------------------------------------------- */
/* reqwest::Error → TetherError */
/* -------------------------------------------------------------------------- */

impl IntoTetherError for HttpError {
    fn into_tether(self) -> TetherError {
        if self.is_timeout() {
            return TetherError::network(NetworkErrorKind::Timeout, "HTTP request timed out");
        }

        if self.is_connect() {
            return TetherError::network(
                NetworkErrorKind::Unavailable,
                format!("HTTP connection failure: {self}"),
            );
        }

        if let Some(status) = self.status() {
            return classify_status(status, None);
        }

        if self.is_decode() {
            return TetherError::network(
                NetworkErrorKind::Protocol,
                format!("undecodable response: {self}"),
            );
        }

        if self.is_builder() {
            return TetherError::InvalidInput(format!("malformed request: {self}"));
        }

        TetherError::network(NetworkErrorKind::ConnectionReset, self.to_string())
    }
}

impl From<HttpError> for InfraError {
    fn from(value: HttpError) -> Self {
        InfraError(value.into_tether())
    }
}

/* -------------------------------------------------------------------------- */
/* Tests */
/* -------------------------------------------------------------------------- */
