//! Control-plane Postgres connections with TLS support.

use std::sync::Arc;

use rustls::ClientConfig;
use tokio_postgres::tls::MakeTlsConnect;
use tokio_postgres::{Client, Socket};
use tokio_postgres_rustls_improved::MakeRustlsConnect;

use crate::error::{PgError, PgResult};

/// Connect with TLS when the connection string's `sslmode` asks for it.
///
/// The connection task is spawned onto the runtime; only the client is returned.
pub async fn connect_postgres(connection_string: &str) -> PgResult<Client> {
    if requires_tls(connection_string) {
        let config =
            ClientConfig::builder_with_provider(Arc::new(rustls::crypto::ring::default_provider()))
                .with_safe_default_protocol_versions()
                .map_err(|e| PgError::Connection(format!("TLS config error: {}", e)))?
                .with_root_certificates(root_certs())
                .with_no_client_auth();

        spawn_connection(connection_string, MakeRustlsConnect::new(config)).await
    } else {
        spawn_connection(connection_string, tokio_postgres::NoTls).await
    }
}

async fn spawn_connection<T>(connection_string: &str, tls: T) -> PgResult<Client>
where
    T: MakeTlsConnect<Socket>,
    T::Stream: Send + 'static,
{
    let (client, connection) = tokio_postgres::connect(connection_string, tls)
        .await
        .map_err(|e| PgError::Connection(e.to_string()))?;

    tokio::spawn(async move {
        if let Err(e) = connection.await {
            tracing::error!(error = %e, "Postgres connection error");
        }
    });

    Ok(client)
}

fn root_certs() -> rustls::RootCertStore {
    let mut roots = rustls::RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    roots
}

fn requires_tls(connection_string: &str) -> bool {
    ["sslmode=require", "sslmode=verify-ca", "sslmode=verify-full"]
        .iter()
        .any(|mode| connection_string.contains(mode))
}
