use std::error;
use std::fmt;

use rowsync_postgres::schema::TableNameError;

/// Convenient result type for rowsync operations using [`RowSyncError`] as the error type.
pub type RowSyncResult<T> = Result<T, RowSyncError>;

/// Main error type of the rowsync crates.
///
/// An error is either a single failure classified by an [`ErrorKind`], with a static
/// description and an optional dynamic detail, or an aggregate of several errors.
#[derive(Debug, Clone)]
pub struct RowSyncError {
    repr: ErrorRepr,
}

#[derive(Debug, Clone)]
enum ErrorRepr {
    WithDescription(ErrorKind, &'static str),
    WithDescriptionAndDetail(ErrorKind, &'static str, String),
    Many(Vec<RowSyncError>),
}

/// Categories of failures that can occur while reconciling a resource.
///
/// Every kind is retryable; the controller requeues the resource with backoff.
#[derive(PartialEq, Eq, Copy, Clone, Debug)]
#[non_exhaustive]
pub enum ErrorKind {
    // Resource API errors
    ResourceNotFound,
    ResourceConflict,
    ResourceFetchFailed,
    ResourceUpdateFailed,

    // Row store errors
    StoreConnectionFailed,
    StoreQueryFailed,
    StoreConstraintViolation,
    StoreSchemaError,

    // Data errors
    InvalidData,
    SerializationError,
    DeserializationError,

    // Security errors
    AuthenticationError,
    EncryptionError,

    // Runtime errors
    IoError,
    Timeout,
    ControllerFailed,

    Unknown,
}

impl RowSyncError {
    /// Creates a [`RowSyncError`] aggregating multiple errors.
    pub fn many(errors: Vec<RowSyncError>) -> RowSyncError {
        RowSyncError {
            repr: ErrorRepr::Many(errors),
        }
    }

    /// Returns the [`ErrorKind`] of this error.
    ///
    /// For aggregates, returns the kind of the first error or [`ErrorKind::Unknown`] when empty.
    pub fn kind(&self) -> ErrorKind {
        match self.repr {
            ErrorRepr::WithDescription(kind, _)
            | ErrorRepr::WithDescriptionAndDetail(kind, _, _) => kind,
            ErrorRepr::Many(ref errors) => errors
                .first()
                .map(|err| err.kind())
                .unwrap_or(ErrorKind::Unknown),
        }
    }

    /// Returns all [`ErrorKind`]s contained in this error, flattening aggregates.
    pub fn kinds(&self) -> Vec<ErrorKind> {
        match self.repr {
            ErrorRepr::WithDescription(kind, _)
            | ErrorRepr::WithDescriptionAndDetail(kind, _, _) => vec![kind],
            ErrorRepr::Many(ref errors) => errors
                .iter()
                .flat_map(|err| err.kinds())
                .collect::<Vec<_>>(),
        }
    }

    /// Returns the dynamic detail if available.
    ///
    /// For aggregates, returns the detail of the first error that has one.
    pub fn detail(&self) -> Option<&str> {
        match self.repr {
            ErrorRepr::WithDescriptionAndDetail(_, _, ref detail) => Some(detail.as_str()),
            ErrorRepr::Many(ref errors) => errors.iter().find_map(|e| e.detail()),
            _ => None,
        }
    }
}

impl PartialEq for RowSyncError {
    fn eq(&self, other: &RowSyncError) -> bool {
        match (&self.repr, &other.repr) {
            (ErrorRepr::WithDescription(kind_a, _), ErrorRepr::WithDescription(kind_b, _)) => {
                kind_a == kind_b
            }
            (
                ErrorRepr::WithDescriptionAndDetail(kind_a, _, _),
                ErrorRepr::WithDescriptionAndDetail(kind_b, _, _),
            ) => kind_a == kind_b,
            (ErrorRepr::Many(errors_a), ErrorRepr::Many(errors_b)) => {
                errors_a.len() == errors_b.len()
                    && errors_a.iter().zip(errors_b.iter()).all(|(a, b)| a == b)
            }
            _ => false,
        }
    }
}

impl fmt::Display for RowSyncError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        match self.repr {
            ErrorRepr::WithDescription(kind, desc) => {
                fmt::Debug::fmt(&kind, f)?;
                f.write_str(": ")?;
                desc.fmt(f)
            }
            ErrorRepr::WithDescriptionAndDetail(kind, desc, ref detail) => {
                fmt::Debug::fmt(&kind, f)?;
                f.write_str(": ")?;
                desc.fmt(f)?;
                f.write_str(" -> ")?;
                detail.fmt(f)
            }
            ErrorRepr::Many(ref errors) => {
                if errors.is_empty() {
                    write!(f, "Multiple errors occurred (empty)")
                } else if errors.len() == 1 {
                    errors[0].fmt(f)
                } else {
                    write!(f, "Multiple errors occurred ({} total):", errors.len())?;
                    for (i, error) in errors.iter().enumerate() {
                        write!(f, "\n  {}: {}", i + 1, error)?;
                    }
                    Ok(())
                }
            }
        }
    }
}

impl error::Error for RowSyncError {}

impl From<(ErrorKind, &'static str)> for RowSyncError {
    fn from((kind, desc): (ErrorKind, &'static str)) -> RowSyncError {
        RowSyncError {
            repr: ErrorRepr::WithDescription(kind, desc),
        }
    }
}

impl From<(ErrorKind, &'static str, String)> for RowSyncError {
    fn from((kind, desc, detail): (ErrorKind, &'static str, String)) -> RowSyncError {
        RowSyncError {
            repr: ErrorRepr::WithDescriptionAndDetail(kind, desc, detail),
        }
    }
}

impl<E> From<Vec<E>> for RowSyncError
where
    E: Into<RowSyncError>,
{
    fn from(errors: Vec<E>) -> RowSyncError {
        RowSyncError {
            repr: ErrorRepr::Many(errors.into_iter().map(Into::into).collect()),
        }
    }
}

impl From<std::io::Error> for RowSyncError {
    fn from(err: std::io::Error) -> RowSyncError {
        RowSyncError {
            repr: ErrorRepr::WithDescriptionAndDetail(
                ErrorKind::IoError,
                "I/O error occurred",
                err.to_string(),
            ),
        }
    }
}

/// Maps to [`ErrorKind::SerializationError`] or [`ErrorKind::DeserializationError`] based on the
/// error category.
impl From<serde_json::Error> for RowSyncError {
    fn from(err: serde_json::Error) -> RowSyncError {
        let (kind, description) = match err.classify() {
            serde_json::error::Category::Io => {
                (ErrorKind::SerializationError, "JSON serialization failed")
            }
            serde_json::error::Category::Syntax
            | serde_json::error::Category::Data
            | serde_json::error::Category::Eof => (
                ErrorKind::DeserializationError,
                "JSON deserialization failed",
            ),
        };

        RowSyncError {
            repr: ErrorRepr::WithDescriptionAndDetail(kind, description, err.to_string()),
        }
    }
}

/// Converts [`tokio::time::error::Elapsed`] into an [`ErrorKind::Timeout`].
impl From<tokio::time::error::Elapsed> for RowSyncError {
    fn from(err: tokio::time::error::Elapsed) -> RowSyncError {
        RowSyncError {
            repr: ErrorRepr::WithDescriptionAndDetail(
                ErrorKind::Timeout,
                "Reconcile deadline exceeded",
                err.to_string(),
            ),
        }
    }
}

impl From<TableNameError> for RowSyncError {
    fn from(err: TableNameError) -> RowSyncError {
        RowSyncError {
            repr: ErrorRepr::WithDescriptionAndDetail(
                ErrorKind::InvalidData,
                "Invalid table name",
                err.to_string(),
            ),
        }
    }
}

/// Describes a Postgres error, preferring the server's message over the generic `db error`.
fn postgres_error_detail(err: &tokio_postgres::Error) -> String {
    match err.as_db_error() {
        Some(db_error) => db_error.to_string(),
        None => err.to_string(),
    }
}

/// Classifies Postgres errors by SQLSTATE.
///
/// Errors without a SQLSTATE never reached the server and are treated as connection failures.
impl From<tokio_postgres::Error> for RowSyncError {
    fn from(err: tokio_postgres::Error) -> RowSyncError {
        let (kind, description) = match err.code() {
            Some(sqlstate) => {
                use tokio_postgres::error::SqlState;

                match *sqlstate {
                    // Connection errors (08xxx)
                    SqlState::CONNECTION_EXCEPTION
                    | SqlState::CONNECTION_DOES_NOT_EXIST
                    | SqlState::CONNECTION_FAILURE
                    | SqlState::SQLCLIENT_UNABLE_TO_ESTABLISH_SQLCONNECTION
                    | SqlState::SQLSERVER_REJECTED_ESTABLISHMENT_OF_SQLCONNECTION => (
                        ErrorKind::StoreConnectionFailed,
                        "PostgreSQL connection error",
                    ),

                    // Resource errors (53xxx)
                    SqlState::INSUFFICIENT_RESOURCES
                    | SqlState::OUT_OF_MEMORY
                    | SqlState::TOO_MANY_CONNECTIONS => (
                        ErrorKind::StoreConnectionFailed,
                        "PostgreSQL resource limitation",
                    ),

                    // Operator intervention (57xxx)
                    SqlState::ADMIN_SHUTDOWN
                    | SqlState::CRASH_SHUTDOWN
                    | SqlState::CANNOT_CONNECT_NOW => (
                        ErrorKind::StoreConnectionFailed,
                        "PostgreSQL server unavailable",
                    ),
                    SqlState::QUERY_CANCELED => {
                        (ErrorKind::StoreQueryFailed, "PostgreSQL query canceled")
                    }

                    // Authentication errors (28xxx)
                    SqlState::INVALID_AUTHORIZATION_SPECIFICATION | SqlState::INVALID_PASSWORD => (
                        ErrorKind::AuthenticationError,
                        "PostgreSQL authentication failed",
                    ),

                    // Data integrity violations (23xxx)
                    SqlState::INTEGRITY_CONSTRAINT_VIOLATION
                    | SqlState::NOT_NULL_VIOLATION
                    | SqlState::FOREIGN_KEY_VIOLATION
                    | SqlState::UNIQUE_VIOLATION
                    | SqlState::CHECK_VIOLATION
                    | SqlState::EXCLUSION_VIOLATION => (
                        ErrorKind::StoreConstraintViolation,
                        "PostgreSQL constraint violation",
                    ),

                    // Data exceptions (22xxx)
                    SqlState::DATA_EXCEPTION
                    | SqlState::INVALID_TEXT_REPRESENTATION
                    | SqlState::NUMERIC_VALUE_OUT_OF_RANGE
                    | SqlState::STRING_DATA_RIGHT_TRUNCATION
                    | SqlState::CHARACTER_NOT_IN_REPERTOIRE
                    | SqlState::UNTRANSLATABLE_CHARACTER => {
                        (ErrorKind::InvalidData, "PostgreSQL rejected the row data")
                    }

                    // Missing schema objects (42xxx, 3Fxxx)
                    SqlState::UNDEFINED_TABLE
                    | SqlState::UNDEFINED_COLUMN
                    | SqlState::INVALID_SCHEMA_NAME
                    | SqlState::INVALID_COLUMN_REFERENCE => (
                        ErrorKind::StoreSchemaError,
                        "PostgreSQL schema object not found",
                    ),

                    // Type mismatch between the row and the table layout.
                    SqlState::DATATYPE_MISMATCH | SqlState::CANNOT_COERCE => (
                        ErrorKind::StoreSchemaError,
                        "PostgreSQL table layout does not match the row",
                    ),

                    SqlState::INSUFFICIENT_PRIVILEGE => (
                        ErrorKind::AuthenticationError,
                        "PostgreSQL permission denied",
                    ),

                    _ => (ErrorKind::StoreQueryFailed, "PostgreSQL query failed"),
                }
            }
            None => (
                ErrorKind::StoreConnectionFailed,
                "PostgreSQL connection failed",
            ),
        };

        RowSyncError {
            repr: ErrorRepr::WithDescriptionAndDetail(
                kind,
                description,
                postgres_error_detail(&err),
            ),
        }
    }
}

/// Classifies API server errors by HTTP status code.
///
/// `404` maps to [`ErrorKind::ResourceNotFound`] and `409` to [`ErrorKind::ResourceConflict`].
/// Everything else is reported as [`ErrorKind::ResourceFetchFailed`].
impl From<kube::Error> for RowSyncError {
    fn from(err: kube::Error) -> RowSyncError {
        let (kind, description) = match &err {
            kube::Error::Api(response) if response.code == 404 => {
                (ErrorKind::ResourceNotFound, "Resource not found")
            }
            kube::Error::Api(response) if response.code == 409 => (
                ErrorKind::ResourceConflict,
                "Resource was modified concurrently",
            ),
            kube::Error::SerdeError(_) => (
                ErrorKind::DeserializationError,
                "Resource could not be decoded",
            ),
            _ => (
                ErrorKind::ResourceFetchFailed,
                "Request to the API server failed",
            ),
        };

        RowSyncError {
            repr: ErrorRepr::WithDescriptionAndDetail(kind, description, err.to_string()),
        }
    }
}

impl From<rustls::Error> for RowSyncError {
    fn from(err: rustls::Error) -> RowSyncError {
        RowSyncError {
            repr: ErrorRepr::WithDescriptionAndDetail(
                ErrorKind::EncryptionError,
                "TLS configuration failed",
                err.to_string(),
            ),
        }
    }
}
