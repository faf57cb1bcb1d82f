#![forbid(unsafe_code)]

use orc_core::clock::TimestampError;
use orc_core::workflow::PlanError;
use rusqlite::ErrorCode;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("{op}: constraint violation: {source}")]
    Constraint {
        op: String,
        #[source]
        source: rusqlite::Error,
    },
    #[error("{op}: backend unavailable: {source}")]
    Unavailable {
        op: String,
        #[source]
        source: rusqlite::Error,
    },
    #[error("{op}: {source}")]
    Sql {
        op: String,
        #[source]
        source: rusqlite::Error,
    },
    #[error("{op}: cannot decode row: {source}")]
    Decode {
        op: String,
        #[source]
        source: rusqlite::Error,
    },
    #[error("{what}: invalid json: {source}")]
    Json {
        what: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid input: {0}")]
    InvalidInput(&'static str),
    #[error("unknown {entity} {id:?}")]
    UnknownId { entity: &'static str, id: String },
    #[error("{entity} {id:?} cannot move from {from} to {to}")]
    InvalidTransition {
        entity: &'static str,
        id: String,
        from: &'static str,
        to: &'static str,
    },
    #[error("dependency would create a cycle: {}", path.join(" -> "))]
    DependencyCycle { path: Vec<String> },
    #[error("invalid workflow plan: {0}")]
    Plan(#[from] PlanError),
    #[error("workflow run {run_id:?} is {status} and accepts no further writes")]
    RunTerminal { run_id: String, status: &'static str },
    #[error("operation cancelled")]
    Cancelled,
    #[error("operation deadline exceeded")]
    DeadlineExceeded,
    #[error("rollback failed: {rollback} (original error: {original})")]
    RollbackFailed {
        rollback: rusqlite::Error,
        original: Box<StoreError>,
    },
}

/// Coarse classification for callers that branch on failure category.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    ConstraintViolation,
    Validation,
    TransactionAborted,
    BackendUnavailable,
    Decode,
    Backend,
}

impl StoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UnknownId { .. } => ErrorKind::NotFound,
            Self::Constraint { .. } => ErrorKind::ConstraintViolation,
            Self::InvalidInput(_)
            | Self::InvalidTransition { .. }
            | Self::DependencyCycle { .. }
            | Self::Plan(_)
            | Self::RunTerminal { .. } => ErrorKind::Validation,
            Self::Cancelled | Self::DeadlineExceeded | Self::RollbackFailed { .. } => {
                ErrorKind::TransactionAborted
            }
            Self::Unavailable { .. } | Self::Io(_) => ErrorKind::BackendUnavailable,
            Self::Decode { .. } | Self::Json { .. } => ErrorKind::Decode,
            Self::Sql { .. } => ErrorKind::Backend,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::BackendUnavailable
    }

    /// Classifies a driver error raised while performing `op`.
    pub(crate) fn from_sql(op: impl Into<String>, source: rusqlite::Error) -> Self {
        let op = op.into();
        match &source {
            rusqlite::Error::SqliteFailure(failure, _) => match failure.code {
                ErrorCode::ConstraintViolation => Self::Constraint { op, source },
                ErrorCode::DatabaseBusy
                | ErrorCode::DatabaseLocked
                | ErrorCode::CannotOpen
                | ErrorCode::SystemIoFailure
                | ErrorCode::DiskFull
                | ErrorCode::ReadOnly => Self::Unavailable { op, source },
                _ => Self::Sql { op, source },
            },
            rusqlite::Error::FromSqlConversionFailure(..)
            | rusqlite::Error::InvalidColumnType(..)
            | rusqlite::Error::IntegralValueOutOfRange(..) => Self::Decode { op, source },
            _ => Self::Sql { op, source },
        }
    }
}

impl From<TimestampError> for StoreError {
    fn from(_: TimestampError) -> Self {
        Self::InvalidInput("unparseable timestamp")
    }
}

impl From<orc_core::ids::IdError> for StoreError {
    fn from(err: orc_core::ids::IdError) -> Self {
        Self::InvalidInput(match err {
            orc_core::ids::IdError::Empty => "id must not be empty",
            orc_core::ids::IdError::TooLong => "id is too long",
            orc_core::ids::IdError::InvalidChar { .. } => "id contains an invalid character",
        })
    }
}

/// Attaches the operation name to driver errors.
pub(crate) trait SqlContext<T> {
    fn op(self, op: &str) -> Result<T, StoreError>;
}

impl<T> SqlContext<T> for Result<T, rusqlite::Error> {
    fn op(self, op: &str) -> Result<T, StoreError> {
        self.map_err(|source| StoreError::from_sql(op, source))
    }
}
