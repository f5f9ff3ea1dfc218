pub mod backends;
pub mod comparison;
pub mod error;
pub mod fixture;
pub mod loader;
pub mod output;
pub mod parser;
pub mod registry;
pub mod report;
pub mod resolver;
pub mod runner;
pub mod session;

pub use backends::{EngineBackend, EngineFault, EngineSession, QueryResult, SessionContext};
pub use comparison::{compare, ErrorMatchPolicy, Mismatch, MismatchKind};
pub use error::HarnessError;
pub use fixture::{row, ErrorPattern, Expectation, Fixture, FixtureName, Row, RowOrder, Statement, Value};
pub use loader::{load_fixtures, LoadError};
pub use output::{create_output, Format, OutputFormat};
pub use parser::{parse, ParseError};
pub use registry::{FixtureRegistry, RegistryBuilder};
pub use report::{ExecutionReport, FixtureReport, Outcome, RunSummary, StatementReport, Verdict};
pub use resolver::{resolve, resolve_all};
pub use runner::{FixtureExecutor, Harness, RunnerConfig};
pub use session::Session;
