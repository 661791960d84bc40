use thiserror::Error;

/// SQLSTATE `object_in_use`, raised when a replication slot is already streamed.
pub const SQLSTATE_OBJECT_IN_USE: &str = "55006";

/// SQLSTATE `duplicate_object`.
pub const SQLSTATE_DUPLICATE_OBJECT: &str = "42710";

#[derive(Debug, Error)]
pub enum PgError {
    #[error("postgres error: {message}")]
    Postgres {
        message: String,
        /// SQLSTATE reported by the server, if any.
        code: Option<String>,
    },

    #[error("connection failed: {0}")]
    Connection(String),

    #[error("replication error: {0}")]
    Replication(String),

    #[error("replication slot '{slot}' is active in another session: {detail}")]
    SlotInUse { slot: String, detail: String },

    #[error("replication slot '{slot}' uses plugin {found:?}, expected '{expected}'")]
    SlotPluginMismatch {
        slot: String,
        expected: String,
        found: Option<String>,
    },

    #[error("failed to create replication slot: {0}")]
    SlotCreationFailed(String),

    #[error("failed to create publication: {0}")]
    PublicationCreationFailed(String),

    #[error("pgoutput decode error: {0}")]
    PgOutput(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid LSN format: {0}")]
    InvalidLsn(String),
}

impl PgError {
    /// SQLSTATE code carried by this error, if the server reported one.
    pub fn code(&self) -> Option<&str> {
        match self {
            PgError::Postgres { code, .. } => code.as_deref(),
            _ => None,
        }
    }

    /// Whether this is the transient "slot already active" condition.
    pub fn is_slot_in_use(&self) -> bool {
        matches!(self, PgError::SlotInUse { .. })
    }

    /// Whether the server rejected a create because the object already exists.
    pub fn is_duplicate_object(&self) -> bool {
        self.code() == Some(SQLSTATE_DUPLICATE_OBJECT)
    }

    /// Map a replication-plane failure for `slot`, recognising the slot-busy case.
    ///
    /// The replication transport reports server errors as text, so the
    /// SQLSTATE and the server's wording are both checked.
    pub fn from_replication(slot: &str, message: String) -> Self {
        if message.contains(SQLSTATE_OBJECT_IN_USE) || message.contains("is active for PID") {
            PgError::SlotInUse {
                slot: slot.to_string(),
                detail: message,
            }
        } else {
            PgError::Replication(message)
        }
    }
}

impl From<tokio_postgres::Error> for PgError {
    fn from(e: tokio_postgres::Error) -> Self {
        // Keep the SQLSTATE so callers can classify the failure
        if let Some(db_err) = e.as_db_error() {
            PgError::Postgres {
                message: format!(
                    "{}: {} (code: {})",
                    db_err.severity(),
                    db_err.message(),
                    db_err.code().code()
                ),
                code: Some(db_err.code().code().to_string()),
            }
        } else {
            PgError::Postgres {
                message: e.to_string(),
                code: None,
            }
        }
    }
}

pub type PgResult<T> = Result<T, PgError>;
