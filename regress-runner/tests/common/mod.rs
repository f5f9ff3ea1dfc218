//! An in-process engine that answers from a script and records what it saw.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use regress_runner::{
    EngineBackend, EngineFault, EngineSession, Fixture, FixtureRegistry, QueryResult,
    RegistryBuilder, SessionContext,
};
use std::sync::Arc;

#[derive(Clone)]
pub enum Reply {
    Result(QueryResult),
    /// The connection drops while running the command
    Fault,
    /// The engine task panics
    Panic,
}

#[derive(Default)]
pub struct EngineState {
    /// Replies keyed by the start of the submitted SQL
    replies: Vec<(String, Reply)>,
    /// Every command received, with `\c` user prefixes (`alice: SELECT 1;`)
    pub log: Vec<String>,
    pub connections: usize,
    pub closed: usize,
}

#[derive(Clone, Default)]
pub struct ScriptedBackend {
    state: Arc<Mutex<EngineState>>,
    refuse_connections: bool,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn refusing() -> Self {
        Self {
            refuse_connections: true,
            ..Self::default()
        }
    }

    pub fn reply(self, prefix: &str, result: QueryResult) -> Self {
        self.state
            .lock()
            .replies
            .push((prefix.to_string(), Reply::Result(result)));
        self
    }

    pub fn panic_on(self, prefix: &str) -> Self {
        self.state
            .lock()
            .replies
            .push((prefix.to_string(), Reply::Panic));
        self
    }

    pub fn fault_on(self, prefix: &str) -> Self {
        self.state
            .lock()
            .replies
            .push((prefix.to_string(), Reply::Fault));
        self
    }

    pub fn log(&self) -> Vec<String> {
        self.state.lock().log.clone()
    }

    pub fn connections(&self) -> usize {
        self.state.lock().connections
    }

    pub fn closed(&self) -> usize {
        self.state.lock().closed
    }
}

#[async_trait]
impl EngineBackend for ScriptedBackend {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn connect(&self) -> Result<Box<dyn EngineSession>, EngineFault> {
        if self.refuse_connections {
            return Err(EngineFault::Connect("connection refused".to_string()));
        }
        self.state.lock().connections += 1;
        Ok(Box::new(ScriptedSession {
            state: Arc::clone(&self.state),
        }))
    }
}

struct ScriptedSession {
    state: Arc<Mutex<EngineState>>,
}

impl ScriptedSession {
    fn answer(&self, ctx: &SessionContext, entry: String, sql: &str) -> Result<QueryResult, EngineFault> {
        let reply = {
            let mut state = self.state.lock();
            let entry = match &ctx.user {
                Some(user) => format!("{user}: {entry}"),
                None => entry,
            };
            state.log.push(entry);
            state
                .replies
                .iter()
                .find(|(prefix, _)| sql.trim_start().starts_with(prefix.as_str()))
                .map(|(_, reply)| reply.clone())
        };
        match reply {
            Some(Reply::Result(result)) => Ok(result),
            Some(Reply::Fault) => Err(EngineFault::Transport("server closed the connection".to_string())),
            Some(Reply::Panic) => panic!("engine crashed on {sql}"),
            None => Ok(QueryResult::empty()),
        }
    }
}

#[async_trait]
impl EngineSession for ScriptedSession {
    async fn execute(&mut self, ctx: &SessionContext, sql: &str) -> Result<QueryResult, EngineFault> {
        self.answer(ctx, sql.to_string(), sql)
    }

    async fn copy_in(
        &mut self,
        ctx: &SessionContext,
        sql: &str,
        data: &str,
    ) -> Result<QueryResult, EngineFault> {
        self.answer(ctx, format!("{sql} <- {data:?}"), sql)
    }

    async fn reconnect(&mut self) -> Result<(), EngineFault> {
        self.state.lock().log.push("<reconnect>".to_string());
        Ok(())
    }

    async fn close(self: Box<Self>) -> Result<(), EngineFault> {
        self.state.lock().closed += 1;
        Ok(())
    }
}

pub fn registry(fixtures: impl IntoIterator<Item = Fixture>) -> Arc<FixtureRegistry> {
    let builder = RegistryBuilder::new();
    for fixture in fixtures {
        builder.register(fixture).unwrap();
    }
    Arc::new(builder.build())
}

pub fn columns(names: &[&str]) -> Vec<String> {
    names.iter().map(|n| n.to_string()).collect()
}
