//! The logical session a run executes against.
//!
//! A [`Session`] owns the engine connection exclusively and carries all
//! per-run mutable state: variables, environment overlay, user context,
//! transaction depth and the `\if` stack.

mod meta;

pub use meta::parse_bool;

use crate::backends::{EngineBackend, EngineFault, EngineSession, QueryResult, SessionContext};
use crate::fixture::script::{Command, CopyDirection, MetaCommand, TransactionEffect};
use crate::fixture::{Statement, Value};
use crate::report::Outcome;
use indexmap::IndexMap;
use meta::Branch;
use std::collections::HashMap;

/// Variable holding the database name sessions are connected to; `\c` to
/// that name is not a database switch
pub const DBNAME_VARIABLE: &str = "DBNAME";
/// Variable holding the connecting role; `\c - <that role>` returns to it
pub const USER_VARIABLE: &str = "USER";

pub struct Session {
    engine: Box<dyn EngineSession>,
    context: SessionContext,
    variables: IndexMap<String, String>,
    /// `\setenv` overlay; `None` hides a process variable
    environment: HashMap<String, Option<String>>,
    conditionals: Vec<Branch>,
    quit: bool,
}

impl Session {
    pub async fn open(
        backend: &dyn EngineBackend,
        variables: IndexMap<String, String>,
    ) -> Result<Self, EngineFault> {
        let engine = backend.connect().await?;
        tracing::debug!(backend = backend.name(), "session opened");
        Ok(Self::with_engine(engine, variables))
    }

    pub fn with_engine(engine: Box<dyn EngineSession>, variables: IndexMap<String, String>) -> Self {
        Self {
            engine,
            context: SessionContext::default(),
            variables,
            environment: HashMap::new(),
            conditionals: Vec::new(),
            quit: false,
        }
    }

    pub fn context(&self) -> &SessionContext {
        &self.context
    }

    pub fn variables(&self) -> &IndexMap<String, String> {
        &self.variables
    }

    pub fn variable(&self, name: &str) -> Option<&str> {
        self.variables.get(name).map(String::as_str)
    }

    /// Reset per-fixture state: the `\if` stack and a pending `\quit`
    pub fn begin_fixture(&mut self) {
        if !self.conditionals.is_empty() {
            tracing::warn!(depth = self.conditionals.len(), "unterminated \\if block");
        }
        self.conditionals.clear();
        self.quit = false;
    }

    /// Whether `\quit` ended the current fixture
    pub fn quit_requested(&self) -> bool {
        self.quit
    }

    /// Execute every command of a statement.
    ///
    /// The first failing command decides the outcome; otherwise the last
    /// engine result does. Commands after a failure still run.
    pub async fn run_statement(&mut self, statement: &Statement) -> Result<Outcome, EngineFault> {
        let mut first_error: Option<String> = None;
        let mut last: Option<QueryResult> = None;

        for command in &statement.commands {
            if self.quit {
                break;
            }
            let Some(result) = self.run_command(command).await? else {
                continue;
            };
            match result.error {
                Some(message) => {
                    first_error.get_or_insert(message);
                }
                None => last = Some(result),
            }
        }

        Ok(match first_error {
            Some(message) => Outcome::Failure { message },
            None => last.map_or_else(Outcome::empty, Outcome::from),
        })
    }

    async fn run_command(&mut self, command: &Command) -> Result<Option<QueryResult>, EngineFault> {
        if let Command::Meta(meta) = command {
            return self.run_meta(meta).await;
        }
        if !self.is_active() {
            return Ok(None);
        }

        match command {
            Command::Sql { sql, gset } => {
                let rendered = sql.render(&self.variables);
                tracing::debug!(sql = %rendered, "submitting");
                let result = match sql.copy_direction() {
                    Some(CopyDirection::ToStdout) => {
                        self.engine.copy_out(&self.context, &rendered).await?
                    }
                    _ => self.engine.execute(&self.context, &rendered).await?,
                };
                if result.is_error() {
                    return Ok(Some(result));
                }
                if let Some(effect) = sql.transaction_effect() {
                    self.apply_transaction(effect);
                }
                Ok(Some(match gset {
                    Some(prefix) => self.gset(prefix, result),
                    None => result,
                }))
            }
            Command::CopyIn { sql, data } => {
                let rendered = sql.render(&self.variables);
                tracing::debug!(sql = %rendered, bytes = data.len(), "submitting bulk load");
                Ok(Some(self.engine.copy_in(&self.context, &rendered, data).await?))
            }
            Command::CopyFile { sql, path } => {
                let rendered = sql.render(&self.variables);
                let path = path.render(&self.variables);
                let data = match tokio::fs::read_to_string(&path).await {
                    Ok(data) => data,
                    Err(e) => return Ok(Some(QueryResult::error(format!("{path}: {e}")))),
                };
                tracing::debug!(sql = %rendered, %path, "submitting bulk load from file");
                Ok(Some(self.engine.copy_in(&self.context, &rendered, &data).await?))
            }
            Command::Meta(_) => Ok(None),
        }
    }

    async fn run_meta(&mut self, meta: &MetaCommand) -> Result<Option<QueryResult>, EngineFault> {
        match meta {
            MetaCommand::Connect { database, user } if self.is_active() => {
                let database = database.as_ref().map(|d| d.render(&self.variables));
                let user = user.as_ref().map(|u| u.render(&self.variables));
                self.connect(database, user).await
            }
            _ => Ok(self.local_meta(meta)),
        }
    }

    /// `\c [db|-] [user|-]`: a fresh connection to the same database, then
    /// an optional user switch. Roles set by SQL do not survive it.
    async fn connect(
        &mut self,
        database: Option<String>,
        user: Option<String>,
    ) -> Result<Option<QueryResult>, EngineFault> {
        if let Some(database) = database.filter(|d| d != "-" && !d.is_empty()) {
            if self.variable(DBNAME_VARIABLE) != Some(database.as_str()) {
                return Ok(Some(QueryResult::error(format!(
                    "\\connect: switching to database \"{database}\" is not supported"
                ))));
            }
        }

        self.rollback_open_transaction().await?;
        self.engine.reconnect().await?;

        if let Some(user) = user.filter(|u| u != "-" && !u.is_empty()) {
            self.context.user = if self.variable(USER_VARIABLE) == Some(user.as_str()) {
                None
            } else {
                Some(user)
            };
            tracing::debug!(user = ?self.context.user, "switched user");
        }
        Ok(None)
    }

    fn apply_transaction(&mut self, effect: TransactionEffect) {
        let depth = &mut self.context.transaction_depth;
        match effect {
            TransactionEffect::Begin => {
                if *depth == 0 {
                    *depth = 1;
                }
            }
            TransactionEffect::Savepoint => {
                if *depth > 0 {
                    *depth += 1;
                }
            }
            TransactionEffect::Release => {
                if *depth > 1 {
                    *depth -= 1;
                }
            }
            TransactionEffect::End => *depth = 0,
        }
    }

    /// Bind the single returned row to variables named `prefix` + column
    fn gset(&mut self, prefix: &str, result: QueryResult) -> QueryResult {
        let row = match result.rows.as_slice() {
            [row] => row,
            [] => return QueryResult::error("no rows returned for \\gset"),
            _ => return QueryResult::error("more than one row returned for \\gset"),
        };
        for (column, value) in result.columns.iter().zip(row) {
            let name = format!("{prefix}{column}");
            match value {
                Value::Null => {
                    self.variables.shift_remove(&name);
                }
                Value::Text(text) => {
                    tracing::trace!(%name, value = %text, "gset variable");
                    self.variables.insert(name, text.clone());
                }
            }
        }
        result
    }

    async fn rollback_open_transaction(&mut self) -> Result<(), EngineFault> {
        if self.context.transaction_depth == 0 {
            return Ok(());
        }
        tracing::debug!(depth = self.context.transaction_depth, "rolling back open transaction");
        let result = self.engine.execute(&self.context, "ROLLBACK").await?;
        if let Some(error) = result.error {
            tracing::warn!(%error, "rollback failed");
        }
        self.context.transaction_depth = 0;
        Ok(())
    }

    /// Roll back an open transaction and close the connection
    pub async fn teardown(mut self) -> Result<(), EngineFault> {
        let rollback = self.rollback_open_transaction().await;
        let close = self.engine.close().await;
        rollback.and(close)
    }
}
