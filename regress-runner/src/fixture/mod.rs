pub mod script;

use script::{Command, ScriptError};
use std::borrow::Borrow;
use std::fmt::{self, Display};

/// Unique identifier of a fixture, used both for registration and for
/// dependency references.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize)]
#[serde(transparent)]
pub struct FixtureName(String);

impl FixtureName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for FixtureName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for FixtureName {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for FixtureName {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for FixtureName {
    fn from(name: String) -> Self {
        Self(name)
    }
}

/// A single scalar value in a result row.
///
/// Values are carried in the engine's canonical text form. NULL is a value
/// of its own and never equal to the empty string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Value {
    Null,
    Text(String),
}

impl Value {
    pub fn text(s: impl Into<String>) -> Self {
        Value::Text(s.into())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Null => None,
            Value::Text(s) => Some(s),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Value::Null, Into::into)
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("NULL"),
            Value::Text(s) => f.write_str(s),
        }
    }
}

impl serde::Serialize for Value {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Null => serializer.serialize_none(),
            Value::Text(s) => serializer.serialize_str(s),
        }
    }
}

/// An ordered, fixed-arity sequence of values
pub type Row = Vec<Value>;

/// Build a row from anything convertible into values
pub fn row<I, V>(values: I) -> Row
where
    I: IntoIterator<Item = V>,
    V: Into<Value>,
{
    values.into_iter().map(Into::into).collect()
}

/// How expected rows are compared against the returned rows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RowOrder {
    /// Row-for-row in the declared sequence
    #[default]
    Ordered,
    /// As multisets; only used when the fixture author asks for it
    Unordered,
}

/// How an expected error message is matched against the engine's message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorPattern {
    /// String equality
    Exact(String),
    /// Substring containment
    Contains(String),
    /// Regular expression search
    Regex(String),
}

impl ErrorPattern {
    pub fn text(&self) -> &str {
        match self {
            ErrorPattern::Exact(s) | ErrorPattern::Contains(s) | ErrorPattern::Regex(s) => s,
        }
    }
}

/// What we expect from executing a statement
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Expectation {
    /// Executed only for its side effects
    #[default]
    None,
    /// The engine must succeed with exactly these rows
    Rows { rows: Vec<Row>, order: RowOrder },
    /// The engine must fail with a message satisfying the pattern
    Error(ErrorPattern),
}

/// A statement of a fixture: raw source text, its lexical split into
/// engine statements and meta-commands, and the expected outcome.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub text: String,
    pub commands: Vec<Command>,
    pub expectation: Expectation,
    pub skip: Option<String>,
    /// 1-based line of the statement in its source file, when loaded from one
    pub line: Option<usize>,
}

impl Statement {
    /// Split `text` into commands. Fails on malformed meta-commands or
    /// unterminated inline data.
    pub fn parse(text: impl Into<String>) -> Result<Self, ScriptError> {
        let text = text.into();
        let commands = script::split(&text)?;
        Ok(Self {
            text,
            commands,
            expectation: Expectation::None,
            skip: None,
            line: None,
        })
    }

    pub fn expect_rows(mut self, rows: Vec<Row>) -> Self {
        self.expectation = Expectation::Rows {
            rows,
            order: RowOrder::Ordered,
        };
        self
    }

    pub fn expect_unordered_rows(mut self, rows: Vec<Row>) -> Self {
        self.expectation = Expectation::Rows {
            rows,
            order: RowOrder::Unordered,
        };
        self
    }

    pub fn expect_error(mut self, message: impl Into<String>) -> Self {
        self.expectation = Expectation::Error(ErrorPattern::Exact(message.into()));
        self
    }

    pub fn expect_error_containing(mut self, fragment: impl Into<String>) -> Self {
        self.expectation = Expectation::Error(ErrorPattern::Contains(fragment.into()));
        self
    }

    pub fn with_expectation(mut self, expectation: Expectation) -> Self {
        self.expectation = expectation;
        self
    }

    pub fn skipped(mut self, reason: impl Into<String>) -> Self {
        self.skip = Some(reason.into());
        self
    }

    pub fn at_line(mut self, line: usize) -> Self {
        self.line = Some(line);
        self
    }
}

/// A named, ordered bundle of statements plus its declared dependencies
#[derive(Debug, Clone, PartialEq)]
pub struct Fixture {
    pub name: FixtureName,
    pub dependencies: Vec<FixtureName>,
    pub statements: Vec<Statement>,
    /// When set, none of the statements execute and all are reported skipped
    pub skip: Option<String>,
}

impl Fixture {
    pub fn new(name: impl Into<FixtureName>) -> Self {
        Self {
            name: name.into(),
            dependencies: Vec::new(),
            statements: Vec::new(),
            skip: None,
        }
    }

    /// Declare a dependency. Declaring the same name twice keeps the first.
    pub fn depends_on(mut self, name: impl Into<FixtureName>) -> Self {
        let name = name.into();
        if !self.dependencies.contains(&name) {
            self.dependencies.push(name);
        }
        self
    }

    pub fn statement(mut self, statement: Statement) -> Self {
        self.statements.push(statement);
        self
    }

    pub fn statements(mut self, statements: impl IntoIterator<Item = Statement>) -> Self {
        self.statements.extend(statements);
        self
    }

    pub fn skipped(mut self, reason: impl Into<String>) -> Self {
        self.skip = Some(reason.into());
        self
    }
}
