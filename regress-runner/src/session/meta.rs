//! Meta-command interpretation that never touches the engine, plus the
//! `\if` state machine.

use super::Session;
use crate::backends::QueryResult;
use crate::fixture::script::{MetaCommand, Template};

/// State of one `\if` ... `\endif` block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Branch {
    /// Inside the branch being executed
    Active,
    /// No branch taken yet; a later `\elif` or `\else` may activate
    Pending,
    /// A branch already ran; skip until `\endif`
    Done,
    /// The enclosing block is inactive
    Ignored,
}

/// psql boolean syntax: unique prefixes of true/false/yes/no, on/off, 1/0
pub fn parse_bool(value: &str) -> Option<bool> {
    let value = value.trim().to_ascii_lowercase();
    if value.is_empty() {
        return None;
    }
    let prefix_of = |word: &str| word.starts_with(value.as_str());
    if prefix_of("true") || prefix_of("yes") || value == "on" || value == "1" {
        Some(true)
    } else if prefix_of("false") || prefix_of("no") || (value.len() >= 2 && prefix_of("off")) || value == "0" {
        Some(false)
    } else {
        None
    }
}

impl Session {
    pub(crate) fn is_active(&self) -> bool {
        self.conditionals
            .last()
            .map_or(true, |branch| *branch == Branch::Active)
    }

    fn render(&self, template: &Template) -> String {
        template.render(&self.variables)
    }

    /// Evaluate an `\if`/`\elif` condition; invalid values count as false
    /// and are reported as a statement error.
    fn condition(&self, expr: &Template, command: &str) -> (bool, Option<QueryResult>) {
        let value = self.render(expr);
        match parse_bool(&value) {
            Some(b) => (b, None),
            None => (
                false,
                Some(QueryResult::error(format!(
                    "unrecognized value \"{value}\" for \"\\{command} expression\": Boolean expected"
                ))),
            ),
        }
    }

    /// Run a meta-command that only affects harness state.
    /// Returns a statement error when the directive fails.
    pub(crate) fn local_meta(&mut self, meta: &MetaCommand) -> Option<QueryResult> {
        match meta {
            MetaCommand::If(expr) => {
                if !self.is_active() {
                    self.conditionals.push(Branch::Ignored);
                    return None;
                }
                let (taken, error) = self.condition(expr, "if");
                self.conditionals
                    .push(if taken { Branch::Active } else { Branch::Pending });
                error
            }
            MetaCommand::Elif(expr) => match self.conditionals.last().copied() {
                None => Some(QueryResult::error("\\elif: no matching \\if")),
                Some(Branch::Active) => {
                    self.set_top(Branch::Done);
                    None
                }
                Some(Branch::Pending) => {
                    let (taken, error) = self.condition(expr, "elif");
                    if taken {
                        self.set_top(Branch::Active);
                    }
                    error
                }
                Some(Branch::Done | Branch::Ignored) => None,
            },
            MetaCommand::Else => match self.conditionals.last().copied() {
                None => Some(QueryResult::error("\\else: no matching \\if")),
                Some(Branch::Active) => {
                    self.set_top(Branch::Done);
                    None
                }
                Some(Branch::Pending) => {
                    self.set_top(Branch::Active);
                    None
                }
                Some(Branch::Done | Branch::Ignored) => None,
            },
            MetaCommand::Endif => match self.conditionals.pop() {
                None => Some(QueryResult::error("\\endif: no matching \\if")),
                Some(_) => None,
            },
            _ if !self.is_active() => None,
            MetaCommand::Set { name, values } => {
                let name = self.render(name);
                let value: String = values.iter().map(|v| self.render(v)).collect();
                tracing::trace!(%name, %value, "set variable");
                self.variables.insert(name, value);
                None
            }
            MetaCommand::Unset { name } => {
                let name = self.render(name);
                tracing::trace!(%name, "unset variable");
                self.variables.shift_remove(&name);
                None
            }
            MetaCommand::GetEnv { variable, env } => {
                let variable = self.render(variable);
                let env = self.render(env);
                match self.getenv(&env) {
                    Some(value) => {
                        tracing::trace!(%variable, %env, "read environment");
                        self.variables.insert(variable, value);
                    }
                    None => {
                        self.variables.shift_remove(&variable);
                    }
                }
                None
            }
            MetaCommand::SetEnv { name, value } => {
                let name = self.render(name);
                let value = value.as_ref().map(|v| self.render(v));
                self.environment.insert(name, value);
                None
            }
            MetaCommand::Quit => {
                self.quit = true;
                None
            }
            MetaCommand::Ignored { name } => {
                tracing::debug!(command = %name, "ignoring display directive");
                None
            }
            MetaCommand::Unsupported { name } => {
                tracing::warn!(command = %name, "unsupported meta-command");
                Some(QueryResult::error(format!("unsupported meta-command \\{name}")))
            }
            // Engine-facing directives are dispatched by the session itself
            MetaCommand::Connect { .. } => None,
        }
    }

    fn set_top(&mut self, branch: Branch) {
        if let Some(top) = self.conditionals.last_mut() {
            *top = branch;
        }
    }

    /// Session overlay first, then the process environment
    fn getenv(&self, name: &str) -> Option<String> {
        match self.environment.get(name) {
            Some(value) => value.clone(),
            None => std::env::var(name).ok(),
        }
    }
}
