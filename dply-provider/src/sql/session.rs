use std::net::SocketAddr;

use dply_config::shared::{PgCredentials, TlsConfig};
use secrecy::ExposeSecret;
use serde_json::{Map, Value};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_postgres::config::SslMode;
use tokio_postgres::tls::MakeTlsConnect;
use tokio_postgres::{Client, Config, Connection, NoTls, SimpleQueryMessage};
use tokio_postgres_rustls::MakeRustlsConnect;
use tracing::{Instrument, debug, error, info, warn};

use crate::error::{ErrorKind, ProviderError, ProviderResult};
use crate::provider_error;
use crate::sql::tls::build_client_config;

/// Spawns the task driving a Postgres connection and returns its handle.
fn spawn_postgres_connection<S, T>(connection: Connection<S, T>) -> JoinHandle<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let span = tracing::Span::current();
    let task = async move {
        if let Err(e) = connection.await {
            error!("an error occurred during the Postgres connection: {}", e);
            return;
        }

        debug!("postgres connection terminated successfully")
    }
    .instrument(span);

    tokio::spawn(task)
}

/// A Postgres session opened through the local end of a tunnel.
pub struct SqlSession {
    client: Client,
    connection: JoinHandle<()>,
}

impl SqlSession {
    /// Connects to `addr` as `credentials`, negotiating TLS when enabled.
    pub async fn connect(
        addr: SocketAddr,
        credentials: &PgCredentials,
        tls: &TlsConfig,
    ) -> ProviderResult<Self> {
        let mut config = Config::new();
        config
            .user(&credentials.user)
            .dbname(&credentials.database)
            .password(credentials.password.expose_secret());

        let stream = TcpStream::connect(addr).await.map_err(|err| {
            provider_error!(
                ErrorKind::TunnelSetupFailed,
                "Could not reach the local end of the tunnel",
                err
            )
        })?;

        if !tls.enabled {
            config.ssl_mode(SslMode::Disable);
            let (client, connection) = config.connect_raw(stream, NoTls).await?;
            let connection = spawn_postgres_connection(connection);

            info!(%addr, "connected to postgres without tls");

            return Ok(Self { client, connection });
        }

        config.ssl_mode(SslMode::Require);
        let mut make_tls = MakeRustlsConnect::new(build_client_config(tls)?);
        let connect_tls = <MakeRustlsConnect as MakeTlsConnect<TcpStream>>::make_tls_connect(
            &mut make_tls,
            tls.server_name(),
        )
        .map_err(|err| {
            provider_error!(
                ErrorKind::TlsConfigInvalid,
                "Invalid TLS server name",
                err
            )
        })?;

        let (client, connection) = config.connect_raw(stream, connect_tls).await?;
        let connection = spawn_postgres_connection(connection);

        info!(%addr, "connected to postgres with tls");

        Ok(Self { client, connection })
    }

    /// Runs `statements` in order and returns one record per statement.
    ///
    /// A record is the first row of the statement as a JSON object mapping
    /// column names to their text value, or `null` when no row came back.
    /// The simple-query protocol carries no column types, so `1` is `"1"` and
    /// `true` is `"t"`. It also accepts several `;` separated statements in
    /// one string, which the typed protocol does not.
    /// The first failing statement stops the run. In transactional mode the
    /// statements share one transaction which is rolled back on failure,
    /// otherwise each statement commits on its own.
    pub async fn run_statements(
        &self,
        statements: &[String],
        transactional: bool,
    ) -> ProviderResult<Vec<Value>> {
        if !transactional {
            return self.run_each(statements).await;
        }

        self.client.batch_execute("BEGIN").await?;

        match self.run_each(statements).await {
            Ok(records) => {
                self.client.batch_execute("COMMIT").await?;
                Ok(records)
            }
            Err(err) => {
                if let Err(rollback_err) = self.client.batch_execute("ROLLBACK").await {
                    warn!(error = %rollback_err, "failed to roll back the transaction");
                }
                Err(err)
            }
        }
    }

    async fn run_each(&self, statements: &[String]) -> ProviderResult<Vec<Value>> {
        let mut records = Vec::with_capacity(statements.len());

        for (index, statement) in statements.iter().enumerate() {
            debug!(index, "running statement");

            let messages = self
                .client
                .simple_query(statement)
                .await
                .map_err(|err| statement_error(index, err))?;

            records.push(first_row(&messages));
        }

        Ok(records)
    }

    /// Closes the session and waits for the connection to shut down.
    pub async fn close(self) {
        let Self { client, connection } = self;
        drop(client);

        if let Err(err) = connection.await {
            warn!(error = %err, "postgres connection task did not finish cleanly");
        }
    }
}

/// Attaches the index of the failing statement to a server-side error.
fn statement_error(index: usize, err: tokio_postgres::Error) -> ProviderError {
    let err = ProviderError::from(err);
    if err.kind() != ErrorKind::SqlError {
        return err;
    }

    provider_error!(
        ErrorKind::SqlError,
        "SQL statement failed",
        format!("statement {index}: {}", err.detail().unwrap_or_default())
    )
}

fn first_row(messages: &[SimpleQueryMessage]) -> Value {
    messages
        .iter()
        .find_map(|message| match message {
            SimpleQueryMessage::Row(row) => {
                let record = row
                    .columns()
                    .iter()
                    .enumerate()
                    .map(|(i, column)| {
                        let value = row
                            .get(i)
                            .map(|v| Value::String(v.to_owned()))
                            .unwrap_or(Value::Null);
                        (column.name().to_owned(), value)
                    })
                    .collect::<Map<_, _>>();

                Some(Value::Object(record))
            }
            _ => None,
        })
        .unwrap_or(Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::net::unused_addr;

    #[tokio::test]
    async fn unreachable_tunnel_end_is_a_tunnel_failure() {
        let credentials = PgCredentials {
            user: "postgres".to_owned(),
            database: "postgres".to_owned(),
            password: "postgres".into(),
        };

        let err = SqlSession::connect(unused_addr().await, &credentials, &TlsConfig::disabled())
            .await
            .err()
            .unwrap();

        assert_eq!(err.kind(), ErrorKind::TunnelSetupFailed);
    }

    #[test]
    fn no_rows_yield_a_null_record() {
        assert_eq!(first_row(&[]), Value::Null);
    }
}
