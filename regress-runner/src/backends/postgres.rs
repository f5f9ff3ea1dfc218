use super::{EngineBackend, EngineFault, EngineSession, QueryResult, SessionContext};
use crate::fixture::script::quote_identifier;
use crate::fixture::{Row, Value};
use async_trait::async_trait;
use bytes::Bytes;
use futures::{SinkExt, TryStreamExt};
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio_postgres::{Client, Config, NoTls, SimpleQueryMessage};

/// Backend that talks to a PostgreSQL-compatible server over the wire protocol.
///
/// Queries use the simple-query protocol so every value arrives in the
/// server's canonical text form.
pub struct PostgresBackend {
    config: Config,
    /// Give each session its own scratch database
    isolate: bool,
    sessions: AtomicUsize,
}

impl PostgresBackend {
    pub fn new(url: &str) -> Result<Self, EngineFault> {
        let config = Config::from_str(url).map_err(|e| EngineFault::Config(e.to_string()))?;
        Ok(Self {
            config,
            isolate: false,
            sessions: AtomicUsize::new(0),
        })
    }

    /// Create a fresh database per session and drop it on close
    pub fn with_isolation(mut self, isolate: bool) -> Self {
        self.isolate = isolate;
        self
    }

    /// Database the sessions connect to when not isolated
    pub fn database(&self) -> Option<&str> {
        self.config.get_dbname()
    }

    pub fn user(&self) -> Option<&str> {
        self.config.get_user()
    }
}

async fn connect(config: &Config) -> Result<Client, EngineFault> {
    let (client, connection) = config
        .connect(NoTls)
        .await
        .map_err(|e| EngineFault::Connect(e.to_string()))?;
    tokio::spawn(async move {
        if let Err(e) = connection.await {
            tracing::warn!(error = %e, "postgres connection terminated");
        }
    });
    Ok(client)
}

#[async_trait]
impl EngineBackend for PostgresBackend {
    fn name(&self) -> &str {
        "postgres"
    }

    async fn connect(&self) -> Result<Box<dyn EngineSession>, EngineFault> {
        if !self.isolate {
            let client = connect(&self.config).await?;
            return Ok(Box::new(PostgresSession {
                client,
                config: self.config.clone(),
                applied_user: None,
                scratch: None,
            }));
        }

        let n = self.sessions.fetch_add(1, Ordering::Relaxed);
        let database = format!("regress_{}_{}", std::process::id(), n);
        let admin = connect(&self.config).await?;
        admin
            .batch_execute(&format!("CREATE DATABASE {}", quote_identifier(&database)))
            .await
            .map_err(|e| EngineFault::Connect(format!("creating {database}: {e}")))?;
        drop(admin);
        tracing::debug!(%database, "created scratch database");

        let mut config = self.config.clone();
        config.dbname(&database);
        let client = connect(&config).await?;
        Ok(Box::new(PostgresSession {
            client,
            config,
            applied_user: None,
            scratch: Some(Scratch {
                admin: self.config.clone(),
                database,
            }),
        }))
    }
}

/// Statement that moves the server-side role from `applied` to `wanted`.
/// `None` means the role the connection logged in with.
fn authorization_sql(applied: Option<&str>, wanted: Option<&str>) -> Option<String> {
    if applied == wanted {
        return None;
    }
    Some(match wanted {
        Some(user) => format!("SET SESSION AUTHORIZATION {}", quote_identifier(user)),
        None => "RESET SESSION AUTHORIZATION".to_string(),
    })
}

/// Result-bearing messages of one simple-query exchange
enum Frame {
    Row { columns: Vec<String>, values: Row },
    Complete,
}

/// Columns and rows of the last command in a simple-query exchange.
/// A final command that returns no rows yields an empty result.
fn last_result_set(frames: impl IntoIterator<Item = Frame>) -> (Vec<String>, Vec<Row>) {
    let mut last = (Vec::new(), Vec::new());
    let mut columns = Vec::new();
    let mut rows = Vec::new();
    for frame in frames {
        match frame {
            Frame::Row {
                columns: names,
                values,
            } => {
                if rows.is_empty() {
                    columns = names;
                }
                rows.push(values);
            }
            Frame::Complete => {
                last = (std::mem::take(&mut columns), std::mem::take(&mut rows));
            }
        }
    }
    last
}

struct Scratch {
    admin: Config,
    database: String,
}

pub struct PostgresSession {
    client: Client,
    /// Where this session's connections go, scratch database included
    config: Config,
    /// User most recently applied with SET SESSION AUTHORIZATION
    applied_user: Option<String>,
    scratch: Option<Scratch>,
}

impl PostgresSession {
    /// Map a client error to a statement error, or to a fault when the
    /// connection is gone
    fn classify(&self, error: tokio_postgres::Error) -> Result<QueryResult, EngineFault> {
        if let Some(db) = error.as_db_error() {
            return Ok(QueryResult::error(db.message()));
        }
        if error.is_closed() || self.client.is_closed() {
            return Err(EngineFault::Transport(error.to_string()));
        }
        Ok(QueryResult::error(error.to_string()))
    }

    /// Bring the server-side role in line with the session context.
    /// Returns the failure when the role cannot be assumed.
    async fn apply_user(&mut self, ctx: &SessionContext) -> Result<Option<QueryResult>, EngineFault> {
        let Some(sql) = authorization_sql(self.applied_user.as_deref(), ctx.user.as_deref()) else {
            return Ok(None);
        };
        match self.client.batch_execute(&sql).await {
            Ok(()) => {
                self.applied_user = ctx.user.clone();
                Ok(None)
            }
            Err(e) => self.classify(e).map(Some),
        }
    }
}

#[async_trait]
impl EngineSession for PostgresSession {
    async fn execute(&mut self, ctx: &SessionContext, sql: &str) -> Result<QueryResult, EngineFault> {
        if let Some(failure) = self.apply_user(ctx).await? {
            return Ok(failure);
        }
        let messages = match self.client.simple_query(sql).await {
            Ok(messages) => messages,
            Err(e) => return self.classify(e),
        };

        let frames = messages.into_iter().filter_map(|message| match message {
            SimpleQueryMessage::Row(row) => Some(Frame::Row {
                columns: row.columns().iter().map(|c| c.name().to_string()).collect(),
                values: (0..row.len()).map(|i| Value::from(row.get(i))).collect(),
            }),
            SimpleQueryMessage::CommandComplete(_) => Some(Frame::Complete),
            _ => None,
        });
        let (columns, rows) = last_result_set(frames);
        Ok(QueryResult::success(columns, rows))
    }

    async fn copy_in(
        &mut self,
        ctx: &SessionContext,
        sql: &str,
        data: &str,
    ) -> Result<QueryResult, EngineFault> {
        if let Some(failure) = self.apply_user(ctx).await? {
            return Ok(failure);
        }
        let sink = match self.client.copy_in::<_, Bytes>(sql).await {
            Ok(sink) => sink,
            Err(e) => return self.classify(e),
        };
        futures::pin_mut!(sink);
        if let Err(e) = sink.send(Bytes::from(data.to_owned())).await {
            return self.classify(e);
        }
        match sink.finish().await {
            Ok(_) => Ok(QueryResult::empty()),
            Err(e) => self.classify(e),
        }
    }

    async fn copy_out(&mut self, ctx: &SessionContext, sql: &str) -> Result<QueryResult, EngineFault> {
        if let Some(failure) = self.apply_user(ctx).await? {
            return Ok(failure);
        }
        let stream = match self.client.copy_out(sql).await {
            Ok(stream) => stream,
            Err(e) => return self.classify(e),
        };
        futures::pin_mut!(stream);
        let mut data = Vec::new();
        loop {
            match stream.try_next().await {
                Ok(Some(chunk)) => data.extend_from_slice(&chunk),
                Ok(None) => break,
                Err(e) => return self.classify(e),
            }
        }
        let text = String::from_utf8_lossy(&data);
        let rows = text.lines().map(|line| vec![Value::text(line)]).collect();
        Ok(QueryResult::success(Vec::new(), rows))
    }

    async fn reconnect(&mut self) -> Result<(), EngineFault> {
        self.client = connect(&self.config).await?;
        self.applied_user = None;
        tracing::debug!("reconnected");
        Ok(())
    }

    async fn close(self: Box<Self>) -> Result<(), EngineFault> {
        let PostgresSession {
            client, scratch, ..
        } = *self;
        drop(client);
        let Some(scratch) = scratch else {
            return Ok(());
        };
        let admin = connect(&scratch.admin)
            .await
            .map_err(|e| EngineFault::Close(e.to_string()))?;
        admin
            .batch_execute(&format!(
                "DROP DATABASE IF EXISTS {} WITH (FORCE)",
                quote_identifier(&scratch.database)
            ))
            .await
            .map_err(|e| EngineFault::Close(format!("dropping {}: {e}", scratch.database)))?;
        tracing::debug!(database = %scratch.database, "dropped scratch database");
        Ok(())
    }
}
