pub mod postgres;

use crate::fixture::Row;
use async_trait::async_trait;

/// Result from submitting one command to the engine
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryResult {
    /// Column names of the returned rows, empty when the engine reported none
    pub columns: Vec<String>,
    /// Rows in the engine's canonical text form
    pub rows: Vec<Row>,
    /// Error message if the engine rejected the command
    pub error: Option<String>,
}

impl QueryResult {
    pub fn success(columns: Vec<String>, rows: Vec<Row>) -> Self {
        Self {
            columns,
            rows,
            error: None,
        }
    }

    /// A successful command that returned nothing
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            columns: Vec::new(),
            rows: Vec::new(),
            error: Some(message.into()),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Session state the engine needs alongside each command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionContext {
    /// Role selected with `\c`; `None` means the connecting user
    pub user: Option<String>,
    /// Lexically tracked transaction nesting depth
    pub transaction_depth: usize,
}

/// A target engine that hands out sessions
#[async_trait]
pub trait EngineBackend: Send + Sync {
    /// Name of this backend (for logging and reports)
    fn name(&self) -> &str;

    /// Open a new session. Each run owns its session exclusively.
    async fn connect(&self) -> Result<Box<dyn EngineSession>, EngineFault>;
}

/// One open connection to the engine
///
/// Statement-level failures are reported inside [`QueryResult::error`];
/// `Err` is reserved for faults that make the session unusable.
#[async_trait]
pub trait EngineSession: Send {
    async fn execute(&mut self, ctx: &SessionContext, sql: &str)
        -> Result<QueryResult, EngineFault>;

    /// Bulk load: run a `COPY ... FROM STDIN` statement and stream `data` to it
    async fn copy_in(
        &mut self,
        ctx: &SessionContext,
        sql: &str,
        data: &str,
    ) -> Result<QueryResult, EngineFault>;

    /// Run a `COPY ... TO STDOUT` statement; each output line is one row
    async fn copy_out(
        &mut self,
        ctx: &SessionContext,
        sql: &str,
    ) -> Result<QueryResult, EngineFault> {
        self.execute(ctx, sql).await
    }

    /// Replace the connection with a fresh one to the same database, as
    /// psql's `\c` does. Server-side session state (role, settings,
    /// temporary objects) does not survive.
    async fn reconnect(&mut self) -> Result<(), EngineFault>;

    async fn close(self: Box<Self>) -> Result<(), EngineFault>;
}

/// Transport and connection failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineFault {
    #[error("failed to connect: {0}")]
    Connect(String),

    #[error("connection lost: {0}")]
    Transport(String),

    #[error("failed to close session: {0}")]
    Close(String),

    #[error("invalid engine configuration: {0}")]
    Config(String),
}
