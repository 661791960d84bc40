//! Publication provisioning.
//!
//! A publication is created once for the watched table and never altered
//! afterwards.

use tokio_postgres::Client;
use tracing::{debug, info};

use crate::error::{PgError, PgResult};

/// Quote an identifier for use in SQL (double quotes).
pub fn quote_ident(s: &str) -> String {
    format!("\"{}\"", s.replace('"', "\"\""))
}

/// Quote a possibly schema-qualified table name (`public.users` -> `"public"."users"`).
pub fn quote_table_name(s: &str) -> String {
    let (schema, table) = parse_table_ref(s);
    format!("{}.{}", quote_ident(schema), quote_ident(table))
}

/// Split a table reference into (schema, table), defaulting to `public`.
pub fn parse_table_ref(table_ref: &str) -> (&str, &str) {
    table_ref.split_once('.').unwrap_or(("public", table_ref))
}

/// Check if a publication exists.
pub async fn publication_exists(client: &Client, publication_name: &str) -> PgResult<bool> {
    let exists: bool = client
        .query_one(
            "SELECT EXISTS(SELECT 1 FROM pg_publication WHERE pubname = $1)",
            &[&publication_name],
        )
        .await?
        .get(0);

    Ok(exists)
}

/// Tables covered by a publication, as `schema.table`.
pub async fn publication_tables(client: &Client, publication_name: &str) -> PgResult<Vec<String>> {
    let rows = client
        .query(
            "SELECT schemaname, tablename FROM pg_publication_tables WHERE pubname = $1 ORDER BY 1, 2",
            &[&publication_name],
        )
        .await?;

    Ok(rows
        .iter()
        .map(|r| format!("{}.{}", r.get::<_, String>(0), r.get::<_, String>(1)))
        .collect())
}

/// Make sure `publication_name` exists, creating it for `table` if absent.
///
/// The check and the create share one transaction. A concurrent creator that
/// wins the race surfaces as `duplicate_object`, which counts as success.
/// Returns true if this call created the publication.
pub async fn ensure_publication(
    client: &mut Client,
    publication_name: &str,
    table: &str,
) -> PgResult<bool> {
    let txn = client.transaction().await?;

    let exists: bool = txn
        .query_one(
            "SELECT EXISTS(SELECT 1 FROM pg_publication WHERE pubname = $1)",
            &[&publication_name],
        )
        .await?
        .get(0);

    if exists {
        debug!(publication = %publication_name, "Publication already exists");
        txn.commit().await?;
        return Ok(false);
    }

    info!(publication = %publication_name, table = %table, "Creating publication");
    let created = txn
        .batch_execute(&format!(
            "CREATE PUBLICATION {} FOR TABLE {}",
            quote_ident(publication_name),
            quote_table_name(table)
        ))
        .await;

    match created {
        Ok(()) => {
            txn.commit().await?;
            Ok(true)
        }
        Err(e) => {
            let err = PgError::from(e);
            if err.is_duplicate_object() {
                info!(publication = %publication_name, "Publication created concurrently");
                Ok(false)
            } else {
                Err(PgError::PublicationCreationFailed(err.to_string()))
            }
        }
    }
}
