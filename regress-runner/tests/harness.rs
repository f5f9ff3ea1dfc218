mod common;

use common::{columns, registry, ScriptedBackend};
use regress_runner::{
    row, ErrorMatchPolicy, Fixture, FixtureName, Harness, HarnessError, MismatchKind, Outcome,
    QueryResult, RegistryBuilder, RunnerConfig, Statement, Value, Verdict,
};
use std::sync::Arc;

fn stmt(sql: &str) -> Statement {
    Statement::parse(sql).unwrap()
}

fn base_and_child() -> Vec<Fixture> {
    vec![
        Fixture::new("base")
            .statement(stmt("CREATE TABLE users (id int PRIMARY KEY, name text);"))
            .statement(stmt("INSERT INTO users VALUES (1, 'alice');")),
        Fixture::new("child")
            .depends_on("base")
            .statement(stmt("SELECT id, name FROM users;").expect_rows(vec![row(["1", "alice"])])),
    ]
}

fn users_backend() -> ScriptedBackend {
    ScriptedBackend::new().reply(
        "SELECT id, name FROM users",
        QueryResult::success(columns(&["id", "name"]), vec![row(["1", "alice"])]),
    )
}

#[tokio::test]
async fn test_dependency_runs_first_and_records_results() {
    let backend = users_backend();
    let harness = Harness::new(registry(base_and_child()), Arc::new(backend.clone()));

    let report = harness.run("child").await.unwrap();

    assert!(report.is_success());
    let names: Vec<_> = report.fixtures.iter().map(|f| f.name.as_str()).collect();
    assert_eq!(names, vec!["base", "child"]);
    assert!(report.fixture("base").unwrap().dependency);
    assert!(!report.fixture("child").unwrap().dependency);
    assert_eq!(report.summary().matched, 1);
    assert_eq!(report.summary().unchecked, 2);
    assert_eq!(
        backend.log(),
        vec![
            "CREATE TABLE users (id int PRIMARY KEY, name text);",
            "INSERT INTO users VALUES (1, 'alice');",
            "SELECT id, name FROM users;",
        ]
    );
    assert_eq!(backend.connections(), 1);
    assert_eq!(backend.closed(), 1);
}

#[tokio::test]
async fn test_repeated_runs_are_identical() {
    let backend = users_backend();
    let harness = Harness::new(registry(base_and_child()), Arc::new(backend.clone()));

    let first = harness.run("child").await.unwrap();
    let second = harness.run("child").await.unwrap();

    assert!(first.same_results(&second));
    assert_eq!(backend.connections(), 2);
}

#[tokio::test]
async fn test_cycle_fails_before_any_statement() {
    let fixtures = vec![
        Fixture::new("a").depends_on("b").statement(stmt("SELECT 'a';")),
        Fixture::new("b").depends_on("a").statement(stmt("SELECT 'b';")),
    ];
    let backend = ScriptedBackend::new();
    let harness = Harness::new(registry(fixtures), Arc::new(backend.clone()));

    let err = harness.run("a").await.unwrap_err();

    let HarnessError::DependencyCycle { cycle } = err else {
        panic!("expected a dependency cycle, got {err:?}");
    };
    assert_eq!(cycle.first(), cycle.last());
    assert!(cycle.contains(&FixtureName::new("b")));
    assert!(backend.log().is_empty());
    assert_eq!(backend.connections(), 0);
}

#[tokio::test]
async fn test_unknown_fixture_and_missing_dependency() {
    let fixtures = vec![Fixture::new("child").depends_on("missing")];
    let harness = Harness::new(registry(fixtures), Arc::new(ScriptedBackend::new()));

    assert!(matches!(
        harness.run("nope").await,
        Err(HarnessError::UnknownFixture { required_by: None, .. })
    ));
    let err = harness.run("child").await.unwrap_err();
    match err {
        HarnessError::UnknownFixture { name, required_by } => {
            assert_eq!(name.as_str(), "missing");
            assert_eq!(required_by.as_ref().map(FixtureName::as_str), Some("child"));
        }
        other => panic!("unexpected error {other:?}"),
    }
}

#[tokio::test]
async fn test_expected_error_that_does_not_happen() {
    let fixtures = vec![Fixture::new("unique").statement(
        stmt("INSERT INTO users VALUES (1, 'again');")
            .expect_error("duplicate key value violates unique constraint \"users_pkey\""),
    )];
    let harness = Harness::new(registry(fixtures), Arc::new(ScriptedBackend::new()));

    let report = harness.run("unique").await.unwrap();

    let statement = &report.fixtures[0].statements[0];
    let Verdict::Mismatch(mismatch) = &statement.verdict else {
        panic!("expected a mismatch, got {:?}", statement.verdict);
    };
    assert_eq!(mismatch.kind, MismatchKind::UnexpectedSuccess);
    assert!(!report.is_success());
}

#[tokio::test]
async fn test_lenient_error_matching() {
    let backend = ScriptedBackend::new().reply(
        "INSERT",
        QueryResult::error("duplicate key value violates unique constraint \"users_pkey\""),
    );
    let fixtures = vec![Fixture::new("unique").statement(
        stmt("INSERT INTO users VALUES (1, 'again');").expect_error("duplicate key value"),
    )];

    let strict = Harness::new(registry(fixtures.clone()), Arc::new(backend.clone()));
    assert!(!strict.run("unique").await.unwrap().is_success());

    let lenient = Harness::new(registry(fixtures), Arc::new(backend))
        .with_config(RunnerConfig::default().with_error_match(ErrorMatchPolicy::Lenient));
    assert!(lenient.run("unique").await.unwrap().is_success());
}

#[tokio::test]
async fn test_skipped_fixture_and_statement() {
    let fixtures = vec![
        Fixture::new("needs_ext")
            .skipped("requires an extension")
            .statement(stmt("CREATE EXTENSION hstore;")),
        Fixture::new("partial")
            .depends_on("needs_ext")
            .statement(stmt("SELECT 1;").skipped("flaky"))
            .statement(stmt("SELECT 2;")),
    ];
    let backend = ScriptedBackend::new();
    let harness = Harness::new(registry(fixtures), Arc::new(backend.clone()));

    let report = harness.run("partial").await.unwrap();

    let skipped_fixture = report.fixture("needs_ext").unwrap();
    assert_eq!(skipped_fixture.skipped.as_deref(), Some("requires an extension"));
    assert!(matches!(
        skipped_fixture.statements[0].verdict,
        Verdict::Skipped { .. }
    ));
    let partial = report.fixture("partial").unwrap();
    assert_eq!(
        partial.statements[0].verdict,
        Verdict::Skipped {
            reason: "flaky".to_string()
        }
    );
    assert_eq!(partial.statements[0].outcome, None);
    assert_eq!(backend.log(), vec!["SELECT 2;"]);
    assert!(report.is_success());
}

#[tokio::test]
async fn test_quit_skips_rest_of_fixture_only() {
    let fixtures = vec![
        Fixture::new("early_exit")
            .statement(stmt("SELECT 1;\n\\quit\nSELECT 'never';"))
            .statement(stmt("SELECT 2;")),
        Fixture::new("after").depends_on("early_exit").statement(stmt("SELECT 3;")),
    ];
    let backend = ScriptedBackend::new();
    let harness = Harness::new(registry(fixtures), Arc::new(backend.clone()));

    let report = harness.run("after").await.unwrap();

    let early = report.fixture("early_exit").unwrap();
    assert_eq!(
        early.statements[1].verdict,
        Verdict::Skipped {
            reason: "\\quit".to_string()
        }
    );
    assert_eq!(backend.log(), vec!["SELECT 1;", "SELECT 3;"]);
}

#[tokio::test]
async fn test_variables_flow_between_statements() {
    let backend = ScriptedBackend::new().reply(
        "SELECT oid FROM pg_class",
        QueryResult::success(columns(&["oid"]), vec![row(["16384"])]),
    );
    let fixtures = vec![Fixture::new("vars")
        .statement(stmt("SELECT oid FROM pg_class WHERE relname = 'users' \\gset users_"))
        .statement(stmt("\\set label 'it''s'\nSELECT :users_oid, :'label', :\"label\";"))];
    let harness = Harness::new(registry(fixtures), Arc::new(backend.clone()))
        .with_config(RunnerConfig::default().with_variable("abs_srcdir", "/src"));

    let report = harness.run("vars").await.unwrap();

    assert!(report.is_success());
    assert_eq!(
        backend.log()[1],
        "SELECT 16384, 'it''s', \"it's\";"
    );
}

#[tokio::test]
async fn test_copy_data_reaches_engine() {
    let fixtures = vec![Fixture::new("load").statement(stmt(
        "COPY users (id, name) FROM stdin;\n2\tbob\n3\t\\N\n\\.\nSELECT count(*) FROM users;",
    ))];
    let backend = ScriptedBackend::new().reply(
        "SELECT count(*)",
        QueryResult::success(columns(&["count"]), vec![row(["3"])]),
    );
    let harness = Harness::new(registry(fixtures), Arc::new(backend.clone()));

    let report = harness.run("load").await.unwrap();

    assert_eq!(
        backend.log(),
        vec![
            "COPY users (id, name) FROM stdin; <- \"2\\tbob\\n3\\t\\\\N\\n\"",
            "SELECT count(*) FROM users;",
        ]
    );
    assert_eq!(
        report.fixtures[0].statements[0].outcome,
        Some(Outcome::Success {
            columns: columns(&["count"]),
            rows: vec![row(["3"])],
        })
    );
}

#[tokio::test]
async fn test_open_transaction_rolled_back_at_teardown() {
    let fixtures = vec![Fixture::new("txn").statement(stmt("BEGIN;\nINSERT INTO users VALUES (9, 'tmp');"))];
    let backend = ScriptedBackend::new();
    let harness = Harness::new(registry(fixtures), Arc::new(backend.clone()));

    harness.run("txn").await.unwrap();

    assert_eq!(backend.log().last().map(String::as_str), Some("ROLLBACK"));
    assert_eq!(backend.closed(), 1);
}

#[tokio::test]
async fn test_user_switch_applies_to_later_statements() {
    let fixtures = vec![Fixture::new("roles")
        .statement(stmt("\\c - regress_alice\nSELECT current_user;"))
        .statement(stmt("\\c - postgres\nSELECT current_user;"))
        .statement(stmt("SET SESSION AUTHORIZATION regress_bob;\n\\c -\nSELECT current_user;"))];
    let backend = ScriptedBackend::new();
    let harness = Harness::new(registry(fixtures), Arc::new(backend.clone()))
        .with_config(RunnerConfig::default().with_variable("USER", "postgres"));

    harness.run("roles").await.unwrap();

    assert_eq!(
        backend.log(),
        vec![
            "<reconnect>",
            "regress_alice: SELECT current_user;",
            "<reconnect>",
            "SELECT current_user;",
            "SET SESSION AUTHORIZATION regress_bob;",
            "<reconnect>",
            "SELECT current_user;",
        ]
    );
}

#[tokio::test]
async fn test_fault_keeps_partial_results() {
    let fixtures = vec![
        Fixture::new("first").statement(stmt("SELECT 1;")),
        Fixture::new("second")
            .depends_on("first")
            .statement(stmt("SELECT pg_terminate_backend(pg_backend_pid());"))
            .statement(stmt("SELECT 'unreached';")),
    ];
    let backend = ScriptedBackend::new().fault_on("SELECT pg_terminate_backend");
    let harness = Harness::new(registry(fixtures), Arc::new(backend.clone()));

    let report = harness.run("second").await.unwrap();

    assert!(report.fault.is_some());
    assert!(!report.is_success());
    assert_eq!(report.fixture("first").unwrap().statements.len(), 1);
    assert!(report.fixture("second").unwrap().statements.is_empty());
    assert!(!backend.log().contains(&"SELECT 'unreached';".to_string()));
    assert!(report.summary().faulted);
}

#[tokio::test]
async fn test_connect_failure_is_an_error() {
    let harness = Harness::new(registry(base_and_child()), Arc::new(ScriptedBackend::refusing()));

    let err = harness.run("child").await.unwrap_err();

    assert!(matches!(err, HarnessError::Engine(_)));
}

#[tokio::test]
async fn test_run_many_keeps_request_order() {
    let fixtures = (0..8)
        .map(|i| Fixture::new(format!("f{i}")).statement(stmt(&format!("SELECT {i};"))))
        .collect::<Vec<_>>();
    let backend = ScriptedBackend::new();
    let harness = Harness::new(registry(fixtures), Arc::new(backend.clone()))
        .with_config(RunnerConfig::default().with_max_jobs(4));

    let names: Vec<FixtureName> = (0..8).rev().map(|i| FixtureName::new(format!("f{i}"))).collect();
    let results = harness.run_many(&names).await;

    let order: Vec<_> = results.iter().map(|(name, _)| name.clone()).collect();
    assert_eq!(order, names);
    assert!(results.iter().all(|(_, r)| r.as_ref().is_ok_and(|r| r.is_success())));
    assert_eq!(backend.connections(), 8);
    assert_eq!(backend.closed(), 8);
}

#[tokio::test]
async fn test_run_many_reports_crashed_run() {
    let fixtures = vec![
        Fixture::new("fine").statement(stmt("SELECT 1;")),
        Fixture::new("crashes").statement(stmt("SELECT crash();")),
        Fixture::new("also_fine").statement(stmt("SELECT 2;")),
    ];
    let backend = ScriptedBackend::new().panic_on("SELECT crash");
    let harness = Harness::new(registry(fixtures), Arc::new(backend))
        .with_config(RunnerConfig::default().with_max_jobs(2));

    let names: Vec<FixtureName> = ["fine", "crashes", "also_fine"]
        .into_iter()
        .map(FixtureName::new)
        .collect();
    let results = harness.run_many(&names).await;

    assert_eq!(results.len(), 3);
    assert_eq!(results[1].0.as_str(), "crashes");
    assert!(matches!(results[1].1, Err(HarnessError::Aborted { .. })));
    assert!(results[0].1.is_ok());
    assert!(results[2].1.is_ok());
}

#[tokio::test]
async fn test_run_together_shares_dependencies() {
    let fixtures = vec![
        Fixture::new("base").statement(stmt("CREATE TABLE t (x int);")),
        Fixture::new("left").depends_on("base").statement(stmt("SELECT 'left';")),
        Fixture::new("right").depends_on("base").statement(stmt("SELECT 'right';")),
    ];
    let backend = ScriptedBackend::new();
    let harness = Harness::new(registry(fixtures), Arc::new(backend.clone()));

    let names = harness.select(&[]);
    let report = harness.run_together(&names).await.unwrap();

    assert_eq!(report.fixtures.len(), 3);
    assert_eq!(
        backend.log(),
        vec!["CREATE TABLE t (x int);", "SELECT 'left';", "SELECT 'right';"]
    );
}

#[tokio::test]
async fn test_null_is_not_empty_string() {
    let backend = ScriptedBackend::new().reply(
        "SELECT",
        QueryResult::success(columns(&["a"]), vec![vec![Value::text("")]]),
    );
    let fixtures = vec![Fixture::new("nulls")
        .statement(stmt("SELECT NULL::text;").expect_rows(vec![vec![Value::Null]]))];
    let harness = Harness::new(registry(fixtures), Arc::new(backend));

    let report = harness.run("nulls").await.unwrap();

    assert_eq!(report.summary().mismatched, 1);
}

#[tokio::test]
async fn test_fixtures_loaded_from_files() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("base.regress"),
        "@fixture base\nstatement {\n    CREATE TABLE t (x int);\n}\n",
    )
    .unwrap();
    std::fs::write(
        dir.path().join("child.regress"),
        "@fixture child\n@depends-on base\n\nstatement {\n    SELECT x FROM t ORDER BY x;\n}\nexpect {\n    1\n    \\N\n}\n",
    )
    .unwrap();

    let builder = RegistryBuilder::new();
    regress_runner::load_fixtures(&[dir.path().to_path_buf()], &builder).unwrap();
    let backend = ScriptedBackend::new().reply(
        "SELECT x FROM t",
        QueryResult::success(columns(&["x"]), vec![row(["1"]), vec![Value::Null]]),
    );
    let harness = Harness::new(Arc::new(builder.build()), Arc::new(backend));

    let report = harness.run("child").await.unwrap();

    assert!(report.is_success());
    assert_eq!(report.fixture("child").unwrap().statements[0].line, Some(4));
}
