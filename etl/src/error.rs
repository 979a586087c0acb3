//! Error types and result definitions for extraction runs.
//!
//! Every fallible operation in the crate returns [`EtlResult`]. An [`EtlError`] carries an
//! [`ErrorKind`] used for classification, a static description, optional dynamic detail, the
//! originating error, and the callsite where it was created. Several errors can be aggregated
//! into one, which is how a failed run reports a cleanup failure alongside the original cause.

use std::backtrace::Backtrace;
use std::borrow::Cow;
use std::error;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::panic::Location;
use std::sync::Arc;

/// Convenient result type for extraction operations using [`EtlError`] as the error type.
pub type EtlResult<T> = Result<T, EtlError>;

/// SQL Server error number raised when a login is rejected.
const SQL_SERVER_LOGIN_FAILED: u32 = 18456;

/// Detailed payload stored for single [`EtlError`] instances.
#[derive(Debug, Clone)]
struct ErrorPayload {
    kind: ErrorKind,
    description: Cow<'static, str>,
    detail: Option<Cow<'static, str>>,
    source: Option<Arc<dyn error::Error + Send + Sync>>,
    location: &'static Location<'static>,
    backtrace: Arc<Backtrace>,
}

/// Main error type for extraction runs.
#[derive(Debug, Clone)]
pub struct EtlError {
    repr: ErrorRepr,
}

#[derive(Debug, Clone)]
enum ErrorRepr {
    Single(ErrorPayload),
    /// Multiple aggregated errors, the first one being the primary cause.
    Many {
        errors: Vec<EtlError>,
        location: &'static Location<'static>,
    },
}

/// Specific categories of errors that can occur during a run.
///
/// Kinds are grouped by the failure class reported through [`ErrorKind::class`].
#[derive(PartialEq, Eq, Copy, Clone, Debug, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    // Connection Errors
    SourceConnectionFailed,
    DestinationConnectionFailed,
    AuthenticationError,

    // Query Errors
    SourceQueryFailed,
    DestinationQueryFailed,
    DestinationTableMissing,
    ConversionError,
    InvalidData,

    // Write Errors
    DestinationWriteFailed,

    // Configuration Errors
    ConfigError,

    // IO Errors
    IoError,

    // Run Control Errors
    RunDeadlineExceeded,
    RunCanceled,
    InvalidState,

    // Unknown / Uncategorized
    Unknown,

    // Error kind used by tests that inject faults at named points.
    #[cfg(feature = "failpoints")]
    InjectedFault,
}

/// Failure classes of a run.
///
/// A dedup collision has no class, it is reported as
/// [`crate::destination::InsertOutcome::SkippedDuplicate`].
#[derive(PartialEq, Eq, Copy, Clone, Debug, Hash)]
pub enum ErrorClass {
    /// A store could not be reached or rejected the credentials.
    Connection,
    /// A read, a decode or an ordering check failed.
    Query,
    /// A chunk could not be committed and was rolled back.
    Write,
    /// The run was stopped by configuration, deadline or cancellation.
    Run,
    Other,
}

impl ErrorClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorClass::Connection => "connection",
            ErrorClass::Query => "query",
            ErrorClass::Write => "write",
            ErrorClass::Run => "run",
            ErrorClass::Other => "other",
        }
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl ErrorKind {
    /// Returns the failure class this kind belongs to.
    pub fn class(&self) -> ErrorClass {
        match self {
            ErrorKind::SourceConnectionFailed
            | ErrorKind::DestinationConnectionFailed
            | ErrorKind::AuthenticationError
            | ErrorKind::IoError => ErrorClass::Connection,
            ErrorKind::SourceQueryFailed
            | ErrorKind::DestinationQueryFailed
            | ErrorKind::DestinationTableMissing
            | ErrorKind::ConversionError
            | ErrorKind::InvalidData => ErrorClass::Query,
            ErrorKind::DestinationWriteFailed => ErrorClass::Write,
            ErrorKind::ConfigError
            | ErrorKind::RunDeadlineExceeded
            | ErrorKind::RunCanceled
            | ErrorKind::InvalidState => ErrorClass::Run,
            ErrorKind::Unknown => ErrorClass::Other,
            #[cfg(feature = "failpoints")]
            ErrorKind::InjectedFault => ErrorClass::Other,
        }
    }
}

impl EtlError {
    /// Returns the [`ErrorKind`] of this error.
    ///
    /// For multiple errors, returns the kind of the first error or [`ErrorKind::Unknown`]
    /// if the error list is empty.
    pub fn kind(&self) -> ErrorKind {
        match self.repr {
            ErrorRepr::Single(ref payload) => payload.kind,
            ErrorRepr::Many { ref errors, .. } => errors
                .first()
                .map(|err| err.kind())
                .unwrap_or(ErrorKind::Unknown),
        }
    }

    /// Returns all [`ErrorKind`]s present in this error.
    pub fn kinds(&self) -> Vec<ErrorKind> {
        match self.repr {
            ErrorRepr::Single(ref payload) => vec![payload.kind],
            ErrorRepr::Many { ref errors, .. } => {
                errors.iter().flat_map(|err| err.kinds()).collect()
            }
        }
    }

    /// Returns the failure class of the primary error.
    pub fn class(&self) -> ErrorClass {
        self.kind().class()
    }

    /// Returns the static description of the primary error.
    pub fn description(&self) -> Option<&str> {
        match self.repr {
            ErrorRepr::Single(ref payload) => Some(payload.description.as_ref()),
            ErrorRepr::Many { ref errors, .. } => errors.first().and_then(|e| e.description()),
        }
    }

    /// Returns the detailed error information if available.
    pub fn detail(&self) -> Option<&str> {
        match self.repr {
            ErrorRepr::Single(ref payload) => payload.detail.as_deref(),
            ErrorRepr::Many { ref errors, .. } => errors.iter().find_map(|e| e.detail()),
        }
    }

    /// Returns the aggregated errors, or [`None`] for a single error.
    pub fn errors(&self) -> Option<&[EtlError]> {
        match self.repr {
            ErrorRepr::Single(_) => None,
            ErrorRepr::Many { ref errors, .. } => Some(errors),
        }
    }

    /// Returns the captured backtrace for this error.
    pub fn backtrace(&self) -> Option<&Backtrace> {
        match self.repr {
            ErrorRepr::Single(ref payload) => Some(payload.backtrace.as_ref()),
            ErrorRepr::Many { .. } => None,
        }
    }

    /// Returns the captured callsite location for this error.
    pub fn location(&self) -> &'static Location<'static> {
        match self.repr {
            ErrorRepr::Single(ref payload) => payload.location,
            ErrorRepr::Many { location, .. } => location,
        }
    }

    /// Attaches an originating [`error::Error`] to this error and returns the modified instance.
    ///
    /// Has no effect on aggregated errors, which forward their first error as the source.
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: error::Error + Send + Sync + 'static,
    {
        if let ErrorRepr::Single(ref mut payload) = self.repr {
            payload.source = Some(Arc::new(source));
        }

        self
    }

    /// Re-labels a single error with another kind and description, keeping the original
    /// error as the detail and source.
    ///
    /// Used where the caller knows more about the failure than the conversion that produced
    /// it, for example a query error raised while writing a chunk.
    #[track_caller]
    pub fn reclassify(self, kind: ErrorKind, description: &'static str) -> Self {
        let detail = match &self.repr {
            ErrorRepr::Single(payload) => payload.detail.clone(),
            ErrorRepr::Many { .. } => None,
        };

        EtlError::from_components(
            kind,
            Cow::Borrowed(description),
            detail,
            Some(Arc::new(self)),
        )
    }

    #[track_caller]
    fn from_components(
        kind: ErrorKind,
        description: Cow<'static, str>,
        detail: Option<Cow<'static, str>>,
        source: Option<Arc<dyn error::Error + Send + Sync>>,
    ) -> Self {
        EtlError {
            repr: ErrorRepr::Single(ErrorPayload {
                kind,
                description,
                detail,
                source,
                location: Location::caller(),
                backtrace: Arc::new(Backtrace::capture()),
            }),
        }
    }
}

impl PartialEq for EtlError {
    fn eq(&self, other: &EtlError) -> bool {
        match (&self.repr, &other.repr) {
            (ErrorRepr::Single(a), ErrorRepr::Single(b)) => a.kind == b.kind,
            (ErrorRepr::Many { errors: a, .. }, ErrorRepr::Many { errors: b, .. }) => a == b,
            _ => false,
        }
    }
}

impl Hash for EtlError {
    /// Hashes only the kind and static description so that repeated occurrences of the same
    /// failure group together regardless of detail or callsite.
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(&self.repr).hash(state);
        match &self.repr {
            ErrorRepr::Single(payload) => {
                payload.kind.hash(state);
                payload.description.hash(state);
            }
            ErrorRepr::Many { errors, .. } => {
                errors.len().hash(state);
                for error in errors {
                    error.hash(state);
                }
            }
        }
    }
}

impl fmt::Display for EtlError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        match &self.repr {
            ErrorRepr::Single(payload) => {
                let location = payload.location;
                write!(
                    f,
                    "[{:?}] {} @ {}:{}:{}",
                    payload.kind,
                    payload.description,
                    location.file(),
                    location.line(),
                    location.column()
                )?;

                write_detail(payload.detail.as_deref(), f)
            }
            ErrorRepr::Many { errors, location } => {
                let count = errors.len();
                write!(
                    f,
                    "[Many] {} error{} aggregated @ {}:{}:{}",
                    count,
                    if count == 1 { "" } else { "s" },
                    location.file(),
                    location.line(),
                    location.column()
                )?;

                for (index, error) in errors.iter().enumerate() {
                    let rendered = error.to_string();
                    let mut lines = rendered.lines();
                    write!(f, "\n  {}. {}", index + 1, lines.next().unwrap_or_default())?;
                    for line in lines {
                        write!(f, "\n     {line}")?;
                    }
                }

                Ok(())
            }
        }
    }
}

impl error::Error for EtlError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match &self.repr {
            ErrorRepr::Single(payload) => payload
                .source
                .as_ref()
                .map(|source| source.as_ref() as &(dyn error::Error + 'static)),
            ErrorRepr::Many { errors, .. } => errors
                .first()
                .map(|error| error as &(dyn error::Error + 'static)),
        }
    }
}

/// Writes the detail block, indented under the headline.
fn write_detail(detail: Option<&str>, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let Some(detail) = detail else {
        return Ok(());
    };

    if detail.trim().is_empty() {
        return write!(f, "\n  Detail: <empty>");
    }

    write!(f, "\n  Detail:")?;
    for line in detail.lines() {
        write!(f, "\n    {line}")?;
    }

    Ok(())
}

/// Creates an [`EtlError`] from an error kind and static description.
impl From<(ErrorKind, &'static str)> for EtlError {
    #[track_caller]
    fn from((kind, desc): (ErrorKind, &'static str)) -> EtlError {
        EtlError::from_components(kind, Cow::Borrowed(desc), None, None)
    }
}

/// Creates an [`EtlError`] from an error kind, static description, and dynamic detail.
impl<D> From<(ErrorKind, &'static str, D)> for EtlError
where
    D: Into<Cow<'static, str>>,
{
    #[track_caller]
    fn from((kind, desc, detail): (ErrorKind, &'static str, D)) -> EtlError {
        EtlError::from_components(kind, Cow::Borrowed(desc), Some(detail.into()), None)
    }
}

/// Aggregates errors. A single error is returned unchanged.
impl<E> From<Vec<E>> for EtlError
where
    E: Into<EtlError>,
{
    #[track_caller]
    fn from(errors: Vec<E>) -> EtlError {
        let location = Location::caller();
        let mut errors: Vec<EtlError> = errors.into_iter().map(Into::into).collect();

        if errors.len() == 1
            && let Some(error) = errors.pop()
        {
            return error;
        }

        EtlError {
            repr: ErrorRepr::Many { errors, location },
        }
    }
}

/// Converts [`std::io::Error`] to [`EtlError`] with [`ErrorKind::IoError`].
impl From<std::io::Error> for EtlError {
    #[track_caller]
    fn from(err: std::io::Error) -> EtlError {
        let detail = err.to_string();
        EtlError::from_components(
            ErrorKind::IoError,
            Cow::Borrowed("I/O operation failed"),
            Some(Cow::Owned(detail)),
            Some(Arc::new(err)),
        )
    }
}

/// Converts [`sqlx::Error`], raised by the Postgres destination, to [`EtlError`].
///
/// Connectivity failures map to [`ErrorKind::DestinationConnectionFailed`], rejected
/// credentials to [`ErrorKind::AuthenticationError`], a missing schema or table to
/// [`ErrorKind::DestinationTableMissing`], and everything else to
/// [`ErrorKind::DestinationQueryFailed`].
impl From<sqlx::Error> for EtlError {
    #[track_caller]
    fn from(err: sqlx::Error) -> EtlError {
        let (kind, description) = match &err {
            sqlx::Error::Database(db_err) => match db_err.code().as_deref() {
                // undefined_table, invalid_schema_name
                Some("42P01") | Some("3F000") => (
                    ErrorKind::DestinationTableMissing,
                    "Destination table does not exist",
                ),
                // invalid_authorization_specification, invalid_password
                Some("28000") | Some("28P01") => (
                    ErrorKind::AuthenticationError,
                    "Destination authentication failed",
                ),
                Some(code) if code.starts_with("08") => (
                    ErrorKind::DestinationConnectionFailed,
                    "Destination connection failed",
                ),
                _ => (
                    ErrorKind::DestinationQueryFailed,
                    "Destination query failed",
                ),
            },
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::Protocol(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => (
                ErrorKind::DestinationConnectionFailed,
                "Destination connection failed",
            ),
            sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => (
                ErrorKind::ConversionError,
                "Destination value conversion failed",
            ),
            _ => (
                ErrorKind::DestinationQueryFailed,
                "Destination query failed",
            ),
        };

        let detail = err.to_string();
        EtlError::from_components(
            kind,
            Cow::Borrowed(description),
            Some(Cow::Owned(detail)),
            Some(Arc::new(err)),
        )
    }
}

/// Converts [`tiberius::error::Error`], raised by the SQL Server source, to [`EtlError`].
impl From<tiberius::error::Error> for EtlError {
    #[track_caller]
    fn from(err: tiberius::error::Error) -> EtlError {
        use tiberius::error::Error as TdsError;

        let (kind, description) = match &err {
            TdsError::Io { .. }
            | TdsError::Tls { .. }
            | TdsError::Routing { .. }
            | TdsError::Protocol { .. } => (
                ErrorKind::SourceConnectionFailed,
                "Source connection failed",
            ),
            TdsError::Server(token) if token.code() == SQL_SERVER_LOGIN_FAILED => (
                ErrorKind::AuthenticationError,
                "Source authentication failed",
            ),
            TdsError::Conversion { .. }
            | TdsError::Utf8 { .. }
            | TdsError::Utf16 { .. }
            | TdsError::ParseInt { .. }
            | TdsError::Encoding { .. } => {
                (ErrorKind::ConversionError, "Source value conversion failed")
            }
            _ => (ErrorKind::SourceQueryFailed, "Source query failed"),
        };

        let detail = err.to_string();
        EtlError::from_components(
            kind,
            Cow::Borrowed(description),
            Some(Cow::Owned(detail)),
            Some(Arc::new(err)),
        )
    }
}
