//! SQL provider tests.
//!
//! Tests marked `#[ignore]` need a real Postgres and run with:
//!
//! ```bash
//! TESTS_DATABASE_HOST=localhost cargo test -p dply-provider --test sql_test -- --ignored
//! ```
//!
//! `TESTS_DATABASE_PORT` (default 5430), `TESTS_DATABASE_USER` and
//! `TESTS_DATABASE_PASSWORD` (default `postgres`) select the server. The TLS
//! test expects the server to have `ssl = on`.

use std::net::SocketAddr;
use std::sync::Arc;

use dply_config::shared::{PgCredentials, ProviderConfig, TlsConfig};
use dply_provider::contract::ResourceProvider;
use dply_provider::error::ErrorKind;
use dply_provider::identity::sql_identity;
use dply_provider::sql::{PodSqlRunner, SqlInputs};
use dply_provider::test_utils::k8s::{MockPodClient, MockPodClientFactory, running_pod};
use dply_provider::test_utils::net::{
    spawn_closing_server, spawn_plaintext_postgres_server, spawn_silent_server,
};
use dply_telemetry::init_test_tracing;
use serde_json::json;

fn select_one_inputs() -> SqlInputs {
    SqlInputs {
        namespace: "timescale".to_owned(),
        pod_selector: "role=master".to_owned(),
        kube_config: "apiVersion: v1\nkind: Config".to_owned(),
        pod_port: 5432,
        postgres_cred: PgCredentials {
            user: "postgres".to_owned(),
            database: "postgres".to_owned(),
            password: "postgres".into(),
        },
        sql_commands: vec!["SELECT 1".to_owned()],
        transactional: false,
        tls: TlsConfig::disabled(),
    }
}

fn runner_with(client: MockPodClient, config: ProviderConfig) -> PodSqlRunner {
    PodSqlRunner::new(Arc::new(MockPodClientFactory::new(client)), config)
}

fn database_pod_client() -> MockPodClient {
    MockPodClient::new().with_pods(vec![running_pod("timescale", "timescale-0")])
}

#[tokio::test(start_paused = true)]
async fn missing_pod_fails_without_tunnel() {
    init_test_tracing();

    let client = MockPodClient::new();
    let runner = runner_with(client.clone(), ProviderConfig::default());

    let err = runner.create(&select_one_inputs()).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::NoPodFound);
    assert!(client.port_forward_calls().is_empty());
    assert!(client.exec_calls().is_empty());
}

#[tokio::test]
async fn broken_port_forward_is_a_tunnel_failure() {
    init_test_tracing();

    // Without a forward target every port-forward call fails.
    let client = database_pod_client();
    let runner = runner_with(client.clone(), ProviderConfig::default());

    let err = runner.create(&select_one_inputs()).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::TunnelSetupFailed);
    assert_eq!(client.port_forward_calls().len(), 1);
}

#[tokio::test]
async fn endpoint_closing_the_connection_is_a_connection_failure() {
    init_test_tracing();

    let (target, _server) = spawn_closing_server().await;
    let client = database_pod_client().with_forward_target(target);
    let runner = runner_with(client, ProviderConfig::default());

    let err = runner.create(&select_one_inputs()).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::SqlConnectionFailed);
}

#[tokio::test]
async fn silent_endpoint_times_out() {
    init_test_tracing();

    let (target, _server) = spawn_silent_server().await;
    let client = database_pod_client().with_forward_target(target);
    let config = ProviderConfig {
        operation_timeout_secs: 1,
        ..ProviderConfig::default()
    };
    let runner = runner_with(client.clone(), config);

    let err = runner.create(&select_one_inputs()).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Timeout);
    assert_eq!(client.port_forward_calls().len(), 1);
}

#[tokio::test]
async fn tls_is_required_by_default() {
    init_test_tracing();

    let (target, _server) = spawn_plaintext_postgres_server().await;
    let client = database_pod_client().with_forward_target(target);
    let runner = runner_with(client, ProviderConfig::default());
    let inputs = SqlInputs {
        tls: TlsConfig::default(),
        ..select_one_inputs()
    };

    let err = runner.create(&inputs).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::SqlConnectionFailed);
    assert!(err.detail().unwrap().contains("TLS"));
}

#[tokio::test]
async fn changed_credentials_require_replacement() {
    let runner = runner_with(MockPodClient::new(), ProviderConfig::default());
    let olds = select_one_inputs();
    let mut news = select_one_inputs();
    news.postgres_cred.user = "grafana".to_owned();
    news.sql_commands = vec!["SELECT 2".to_owned()];

    let diff = runner.diff(&sql_identity(&olds.sql_commands), &olds, &news);

    assert_eq!(diff.replaces, vec!["sqlCommands", "postgresCred"]);
}

/// Address of the Postgres the ignored tests run against.
async fn test_database_addr() -> SocketAddr {
    let host = std::env::var("TESTS_DATABASE_HOST")
        .expect("TESTS_DATABASE_HOST must point at a Postgres to run the ignored tests");
    let port = std::env::var("TESTS_DATABASE_PORT")
        .ok()
        .and_then(|port| port.parse::<u16>().ok())
        .unwrap_or(5430);

    tokio::net::lookup_host((host.as_str(), port))
        .await
        .unwrap()
        .next()
        .unwrap()
}

/// A runner whose pod forwards to the test database.
async fn test_database_runner() -> PodSqlRunner {
    let addr = test_database_addr().await;
    runner_with(
        database_pod_client().with_forward_target(addr),
        ProviderConfig::default(),
    )
}

fn test_database_inputs(statements: &[&str]) -> SqlInputs {
    let password = std::env::var("TESTS_DATABASE_PASSWORD").unwrap_or_else(|_| "postgres".into());
    let user = std::env::var("TESTS_DATABASE_USER").unwrap_or_else(|_| "postgres".into());

    SqlInputs {
        postgres_cred: PgCredentials {
            user,
            database: "postgres".to_owned(),
            password: password.into(),
        },
        sql_commands: statements.iter().map(|s| s.to_string()).collect(),
        ..select_one_inputs()
    }
}

#[tokio::test(flavor = "multi_thread")]
#[ignore = "needs a Postgres at TESTS_DATABASE_HOST"]
async fn select_one_through_the_tunnel() {
    init_test_tracing();

    let runner = test_database_runner().await;
    let inputs = test_database_inputs(&["SELECT 1"]);

    let result = runner.create(&inputs).await.unwrap();

    assert_eq!(result.id, sql_identity(&inputs.sql_commands));
    assert_eq!(result.results, vec![json!({"?column?": "1"})]);
}

#[tokio::test(flavor = "multi_thread")]
#[ignore = "needs a Postgres at TESTS_DATABASE_HOST"]
async fn statements_without_rows_yield_null_records() {
    init_test_tracing();

    let runner = test_database_runner().await;
    let inputs = test_database_inputs(&["SET statement_timeout = 0", "SELECT NULL AS nothing"]);

    let result = runner.create(&inputs).await.unwrap();

    assert_eq!(
        result.results,
        vec![serde_json::Value::Null, json!({"nothing": null})]
    );
}

#[tokio::test(flavor = "multi_thread")]
#[ignore = "needs a Postgres at TESTS_DATABASE_HOST"]
async fn failing_transaction_is_rolled_back() {
    init_test_tracing();

    let runner = test_database_runner().await;

    let mut inputs = test_database_inputs(&[
        "CREATE TABLE dply_rollback_marker (id int)",
        "SELECT * FROM dply_table_that_does_not_exist",
    ]);
    inputs.transactional = true;

    let err = runner.create(&inputs).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::SqlError);
    assert!(err.detail().unwrap().starts_with("statement 1:"));

    let lookup = test_database_inputs(&[
        "SELECT to_regclass('dply_rollback_marker') IS NULL AS missing",
    ]);
    let result = runner.create(&lookup).await.unwrap();
    assert_eq!(result.results, vec![json!({"missing": "t"})]);
}

#[tokio::test(flavor = "multi_thread")]
#[ignore = "needs a Postgres at TESTS_DATABASE_HOST"]
async fn failing_statement_stops_autocommit_run() {
    init_test_tracing();

    let runner = test_database_runner().await;
    runner
        .create(&test_database_inputs(&[
            "DROP TABLE IF EXISTS dply_autocommit_kept",
            "DROP TABLE IF EXISTS dply_autocommit_skipped",
        ]))
        .await
        .unwrap();

    let inputs = test_database_inputs(&[
        "CREATE TABLE dply_autocommit_kept (id int)",
        "SELECT * FROM dply_table_that_does_not_exist",
        "CREATE TABLE dply_autocommit_skipped (id int)",
    ]);
    let err = runner.create(&inputs).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::SqlError);
    assert!(err.detail().unwrap().starts_with("statement 1:"));

    let lookup = test_database_inputs(&[
        "SELECT to_regclass('dply_autocommit_kept') IS NOT NULL AS kept, \
         to_regclass('dply_autocommit_skipped') IS NULL AS skipped",
        "DROP TABLE IF EXISTS dply_autocommit_kept",
    ]);
    let result = runner.create(&lookup).await.unwrap();
    assert_eq!(result.results[0], json!({"kept": "t", "skipped": "t"}));
}

#[tokio::test(flavor = "multi_thread")]
#[ignore = "needs a Postgres with ssl = on at TESTS_DATABASE_HOST"]
async fn select_one_over_required_tls() {
    init_test_tracing();

    let runner = test_database_runner().await;
    let inputs = SqlInputs {
        tls: TlsConfig::require(),
        ..test_database_inputs(&["SELECT 1"])
    };

    let result = runner.create(&inputs).await.unwrap();

    assert_eq!(result.results, vec![json!({"?column?": "1"})]);
}
