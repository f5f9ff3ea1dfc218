use clap::{Parser, Subcommand};
use miette::{NamedSource, Report};
use owo_colors::OwoColorize;
use regress_runner::backends::postgres::PostgresBackend;
use regress_runner::loader::{discover, read_fixture_file};
use regress_runner::session::{DBNAME_VARIABLE, USER_VARIABLE};
use regress_runner::{
    create_output, load_fixtures, ErrorMatchPolicy, FixtureName, FixtureRegistry, Format,
    Harness, LoadError, OutputFormat, RegistryBuilder, RunSummary, RunnerConfig,
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Instant;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "regress-runner")]
#[command(about = "Runs SQL regression fixtures against a PostgreSQL-compatible engine")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run fixtures and their dependencies
    Run {
        /// Fixture names to run (default: every loaded fixture)
        names: Vec<String>,

        /// Fixture files or directories
        #[arg(long = "fixtures", required = true, num_args = 1..)]
        fixtures: Vec<PathBuf>,

        /// Connection string of the engine under test
        #[arg(long, env = "REGRESS_DATABASE_URL")]
        url: String,

        /// Bind a session variable (name=value)
        #[arg(long = "set", value_parser = parse_key_val)]
        set: Vec<(String, String)>,

        /// Filter fixtures by name pattern when no names are given
        #[arg(short, long)]
        filter: Option<String>,

        /// Number of parallel sessions (requires --isolate)
        #[arg(short, long, default_value_t = num_cpus::get())]
        jobs: usize,

        /// Run each fixture in its own scratch database
        #[arg(long)]
        isolate: bool,

        /// Treat exact error expectations as substrings
        #[arg(long)]
        lenient_errors: bool,

        /// Output format (pretty, json)
        #[arg(short, long, default_value = "pretty")]
        output: String,
    },

    /// Validate fixture file syntax
    Check {
        /// Fixture files or directories
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },

    /// Print the execution order for fixtures without running them
    Plan {
        /// Fixture names (default: every loaded fixture)
        names: Vec<String>,

        /// Fixture files or directories
        #[arg(long = "fixtures", required = true, num_args = 1..)]
        fixtures: Vec<PathBuf>,
    },
}

fn parse_key_val(s: &str) -> Result<(String, String), String> {
    let (name, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected name=value, got `{s}`"))?;
    if name.is_empty() {
        return Err(format!("empty variable name in `{s}`"));
    }
    Ok((name.to_string(), value.to_string()))
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "regress_runner=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            names,
            fixtures,
            url,
            set,
            filter,
            jobs,
            isolate,
            lenient_errors,
            output,
        } => {
            let options = RunOptions {
                names,
                fixtures,
                url,
                set,
                filter,
                jobs,
                isolate,
                lenient_errors,
                output,
            };
            run_fixtures(options).await
        }
        Commands::Check { paths } => check_files(paths),
        Commands::Plan { names, fixtures } => plan_fixtures(names, fixtures),
    }
}

struct RunOptions {
    names: Vec<String>,
    fixtures: Vec<PathBuf>,
    url: String,
    set: Vec<(String, String)>,
    filter: Option<String>,
    jobs: usize,
    isolate: bool,
    lenient_errors: bool,
    output: String,
}

async fn run_fixtures(options: RunOptions) -> ExitCode {
    let format: Format = match options.output.parse() {
        Ok(f) => f,
        Err(e) => {
            eprintln!("{}: {}", "Error".red().bold(), e);
            return ExitCode::from(2);
        }
    };

    let Some(registry) = load_registry(&options.fixtures) else {
        return ExitCode::from(1);
    };

    let backend = match PostgresBackend::new(&options.url) {
        Ok(backend) => backend.with_isolation(options.isolate),
        Err(e) => {
            eprintln!("{}: {}", "Error".red().bold(), e);
            return ExitCode::from(2);
        }
    };

    let mut config = RunnerConfig::default().with_max_jobs(options.jobs);
    if options.lenient_errors {
        config = config.with_error_match(ErrorMatchPolicy::Lenient);
    }
    if let Some(database) = backend.database() {
        config = config.with_variable(DBNAME_VARIABLE, database);
    }
    if let Some(user) = backend.user() {
        config = config.with_variable(USER_VARIABLE, user);
    }
    for (name, value) in options.set {
        config = config.with_variable(name, value);
    }
    if let Some(filter) = options.filter {
        config = config.with_filter(filter);
    }
    if options.jobs > 1 && !options.isolate {
        tracing::debug!("running in one shared session; --jobs needs --isolate");
    }

    let harness = Harness::new(registry, Arc::new(backend)).with_config(config);
    let names = harness.select(&options.names);
    if names.is_empty() {
        eprintln!("{}: no fixtures selected", "Warning".yellow().bold());
        return ExitCode::SUCCESS;
    }

    let mut output: Box<dyn OutputFormat> = create_output(format);
    let start = Instant::now();
    let mut summary = RunSummary::default();
    let mut failed = false;

    if options.isolate {
        for (name, result) in harness.run_many(&names).await {
            match result {
                Ok(report) => {
                    output.write_report(&report);
                    output.flush();
                    summary.merge(&report.summary());
                }
                Err(e) => {
                    eprintln!("{} {name}: {e}", "Error".red().bold());
                    failed = true;
                }
            }
        }
    } else {
        match harness.run_together(&names).await {
            Ok(report) => {
                output.write_report(&report);
                summary.merge(&report.summary());
            }
            Err(e) => {
                eprintln!("{}: {e}", "Error".red().bold());
                failed = true;
            }
        }
    }

    summary.duration = start.elapsed();
    output.write_summary(&summary);
    output.flush();

    if summary.is_success() && !failed {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(1)
    }
}

/// Load fixture files into a registry, reporting problems on stderr
fn load_registry(paths: &[PathBuf]) -> Option<Arc<FixtureRegistry>> {
    let builder = RegistryBuilder::new();
    match load_fixtures(paths, &builder) {
        Ok(count) => {
            tracing::info!(files = count, fixtures = builder.len(), "loaded fixtures");
            Some(Arc::new(builder.build()))
        }
        Err(e) => {
            print_load_error(e);
            None
        }
    }
}

fn print_load_error(error: LoadError) {
    match error {
        LoadError::Parse {
            path,
            content,
            error,
        } => {
            let report = Report::new(error)
                .with_source_code(NamedSource::new(path.display().to_string(), content));
            eprintln!("{:?}", report);
        }
        other => eprintln!("{}: {}", "Error".red().bold(), other),
    }
}

fn check_files(paths: Vec<PathBuf>) -> ExitCode {
    let files = match discover(&paths) {
        Ok(files) => files,
        Err(e) => {
            print_load_error(e);
            return ExitCode::from(1);
        }
    };

    let mut has_errors = false;
    let mut seen = std::collections::HashSet::new();
    for path in &files {
        match read_fixture_file(path) {
            Ok(fixture) => {
                if !seen.insert(fixture.name.clone()) {
                    eprintln!(
                        "{} - {}: fixture `{}` is defined more than once",
                        path.display(),
                        "ERROR".red().bold(),
                        fixture.name
                    );
                    has_errors = true;
                    continue;
                }
                println!(
                    "{} - OK ({} dependencies, {} statements)",
                    path.display(),
                    fixture.dependencies.len(),
                    fixture.statements.len()
                );
            }
            Err(e) => {
                print_load_error(e);
                has_errors = true;
            }
        }
    }

    if has_errors {
        ExitCode::from(1)
    } else {
        ExitCode::SUCCESS
    }
}

fn plan_fixtures(names: Vec<String>, fixtures: Vec<PathBuf>) -> ExitCode {
    let Some(registry) = load_registry(&fixtures) else {
        return ExitCode::from(1);
    };

    let requested: Vec<FixtureName> = if names.is_empty() {
        registry.names().cloned().collect()
    } else {
        names.iter().map(FixtureName::new).collect()
    };

    match regress_runner::resolve_all(&registry, &requested) {
        Ok(order) => {
            for (position, fixture) in order.iter().enumerate() {
                let marker = if requested.contains(&fixture.name) {
                    ""
                } else {
                    " (dependency)"
                };
                println!("{:>3}. {}{}", position + 1, fixture.name, marker.dimmed());
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("{}: {e}", "Error".red().bold());
            ExitCode::from(1)
        }
    }
}
