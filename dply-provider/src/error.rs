use std::error;
use std::fmt;

/// Convenient result type for provider operations using [`ProviderError`] as the error type.
pub type ProviderResult<T> = Result<T, ProviderError>;

/// Main error type for provider operations.
///
/// A [`ProviderError`] carries an [`ErrorKind`], a static description and an
/// optional dynamic detail. The detail holds the raw remote payload (exec
/// status, database message) so the operator running the apply can diagnose
/// the failure without re-running a possibly non-idempotent action.
#[derive(Debug, Clone)]
pub struct ProviderError {
    repr: ErrorRepr,
}

#[derive(Debug, Clone)]
enum ErrorRepr {
    WithDescription(ErrorKind, &'static str),
    WithDescriptionAndDetail(ErrorKind, &'static str, String),
    Many(Vec<ProviderError>),
}

/// Classification of provider failures.
#[derive(PartialEq, Eq, Copy, Clone, Debug)]
#[non_exhaustive]
pub enum ErrorKind {
    // Validation errors, raised by `check`.
    MissingCommand,
    MissingStatements,
    InvalidPort,
    InvalidKubeConfig,

    // Resolution errors.
    NoPodFound,
    PodListFailed,

    // Action errors.
    ExecFailed,
    TunnelSetupFailed,
    SqlConnectionFailed,
    SqlError,
    TlsConfigInvalid,
    Timeout,

    // Plumbing errors.
    KubeError,
    IoError,
    SerializationError,
    DeserializationError,

    Unknown,
}

impl ErrorKind {
    /// Returns whether the kind is raised while validating inputs.
    ///
    /// Validation errors are fixed by correcting the inputs, every other kind
    /// is fatal for the current apply.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            ErrorKind::MissingCommand
                | ErrorKind::MissingStatements
                | ErrorKind::InvalidPort
                | ErrorKind::InvalidKubeConfig
        )
    }
}

impl ProviderError {
    /// Creates a [`ProviderError`] containing multiple aggregated errors.
    pub fn many(errors: Vec<ProviderError>) -> ProviderError {
        ProviderError {
            repr: ErrorRepr::Many(errors),
        }
    }

    /// Returns the [`ErrorKind`] of this error.
    ///
    /// For multiple errors, returns the kind of the first error or
    /// [`ErrorKind::Unknown`] if the list is empty.
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

    /// Returns all [`ErrorKind`]s present in this error.
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

    /// Returns the detailed error information if available.
    ///
    /// For multiple errors, returns the detail of the first error that has one.
    pub fn detail(&self) -> Option<&str> {
        match self.repr {
            ErrorRepr::WithDescriptionAndDetail(_, _, ref detail) => Some(detail.as_str()),
            ErrorRepr::Many(ref errors) => errors.iter().find_map(|e| e.detail()),
            _ => None,
        }
    }
}

impl PartialEq for ProviderError {
    fn eq(&self, other: &ProviderError) -> bool {
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

impl fmt::Display for ProviderError {
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
                    write!(f, "Multiple errors occurred (empty)")?;
                } else if errors.len() == 1 {
                    errors[0].fmt(f)?;
                } else {
                    write!(f, "Multiple errors occurred ({} total):", errors.len())?;
                    for (i, error) in errors.iter().enumerate() {
                        write!(f, "\n  {}: {}", i + 1, error)?;
                    }
                }
                Ok(())
            }
        }
    }
}

impl error::Error for ProviderError {}

impl From<(ErrorKind, &'static str)> for ProviderError {
    fn from((kind, desc): (ErrorKind, &'static str)) -> ProviderError {
        ProviderError {
            repr: ErrorRepr::WithDescription(kind, desc),
        }
    }
}

impl From<(ErrorKind, &'static str, String)> for ProviderError {
    fn from((kind, desc, detail): (ErrorKind, &'static str, String)) -> ProviderError {
        ProviderError {
            repr: ErrorRepr::WithDescriptionAndDetail(kind, desc, detail),
        }
    }
}

impl<E> From<Vec<E>> for ProviderError
where
    E: Into<ProviderError>,
{
    fn from(errors: Vec<E>) -> ProviderError {
        ProviderError {
            repr: ErrorRepr::Many(errors.into_iter().map(Into::into).collect()),
        }
    }
}

impl From<std::io::Error> for ProviderError {
    fn from(err: std::io::Error) -> ProviderError {
        ProviderError {
            repr: ErrorRepr::WithDescriptionAndDetail(
                ErrorKind::IoError,
                "I/O error occurred",
                err.to_string(),
            ),
        }
    }
}

/// Converts [`serde_json::Error`] to [`ProviderError`].
///
/// Conversions through `?` come from parsing. Serializing a record goes
/// through [`crate::contract::to_record`] instead.
impl From<serde_json::Error> for ProviderError {
    fn from(err: serde_json::Error) -> ProviderError {
        let (kind, description) = match err.classify() {
            serde_json::error::Category::Io => (ErrorKind::IoError, "JSON I/O operation failed"),
            serde_json::error::Category::Syntax
            | serde_json::error::Category::Data
            | serde_json::error::Category::Eof => (
                ErrorKind::DeserializationError,
                "JSON deserialization failed",
            ),
        };

        ProviderError {
            repr: ErrorRepr::WithDescriptionAndDetail(kind, description, err.to_string()),
        }
    }
}

/// Converts [`tokio_postgres::Error`] to [`ProviderError`].
///
/// Errors carrying a SQLSTATE came back from the server and are statement
/// failures, everything else is a failure of the session itself.
impl From<tokio_postgres::Error> for ProviderError {
    fn from(err: tokio_postgres::Error) -> ProviderError {
        let repr = match err.as_db_error() {
            Some(db_error) => ErrorRepr::WithDescriptionAndDetail(
                ErrorKind::SqlError,
                "SQL statement failed",
                format!(
                    "{} {}: {}",
                    db_error.severity(),
                    db_error.code().code(),
                    db_error.message()
                ),
            ),
            None => ErrorRepr::WithDescriptionAndDetail(
                ErrorKind::SqlConnectionFailed,
                "PostgreSQL session failed",
                err.to_string(),
            ),
        };

        ProviderError { repr }
    }
}

impl From<rustls::Error> for ProviderError {
    fn from(err: rustls::Error) -> ProviderError {
        ProviderError {
            repr: ErrorRepr::WithDescriptionAndDetail(
                ErrorKind::TlsConfigInvalid,
                "TLS configuration failed",
                err.to_string(),
            ),
        }
    }
}

impl From<tokio::time::error::Elapsed> for ProviderError {
    fn from(err: tokio::time::error::Elapsed) -> ProviderError {
        ProviderError {
            repr: ErrorRepr::WithDescriptionAndDetail(
                ErrorKind::Timeout,
                "Operation exceeded its deadline",
                err.to_string(),
            ),
        }
    }
}
