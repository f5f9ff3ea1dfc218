use crate::backends::EngineFault;
use crate::fixture::FixtureName;

/// Errors that prevent a run from producing a report
#[derive(Debug, Clone, thiserror::Error)]
pub enum HarnessError {
    #[error("fixture `{0}` is already registered")]
    DuplicateFixture(FixtureName),

    #[error("{}", unknown_fixture_message(name, required_by.as_ref()))]
    UnknownFixture {
        name: FixtureName,
        /// The fixture whose dependency list named it, if any
        required_by: Option<FixtureName>,
    },

    #[error("dependency cycle: {}", format_cycle(cycle))]
    DependencyCycle { cycle: Vec<FixtureName> },

    #[error("run of `{name}` aborted: {reason}")]
    Aborted { name: FixtureName, reason: String },

    #[error(transparent)]
    Engine(#[from] EngineFault),
}

fn unknown_fixture_message(name: &FixtureName, required_by: Option<&FixtureName>) -> String {
    match required_by {
        Some(parent) => format!("fixture `{name}` (required by `{parent}`) is not registered"),
        None => format!("fixture `{name}` is not registered"),
    }
}

fn format_cycle(cycle: &[FixtureName]) -> String {
    cycle
        .iter()
        .map(FixtureName::as_str)
        .collect::<Vec<_>>()
        .join(" -> ")
}
