//! libSQL staging store for crawled and processed records.
//!
//! The [`StagingStore`] keeps collections of JSON documents, partitioned by
//! namespace (one per run and stage, e.g. `2026-10-18_raw_data`). A collection
//! is always written as a whole: [`StagingStore::replace_collection`] swaps
//! its contents inside a transaction.

pub mod fields;
mod migrations;

use std::path::Path;

use khub_shared::{KhubError, Record, Result, StoreLocation};
use libsql::{Connection, Database, params};
use tracing::{debug, info, warn};

pub use fields::{KEY_FIELD, PreparedDocument, prepare_document, sanitize_field_names};

/// Staging store handle wrapping a libSQL database.
pub struct StagingStore {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
    location: StoreLocation,
}

impl StagingStore {
    /// Open the store at `location` and apply pending migrations.
    pub async fn open(location: &StoreLocation) -> Result<Self> {
        let db = match location {
            StoreLocation::Local(path) => Self::build_local(path).await?,
            StoreLocation::Remote { url, auth_token } => {
                libsql::Builder::new_remote(url.clone(), auth_token.clone())
                    .build()
                    .await
                    .map_err(|e| KhubError::Storage(format!("{location}: {e}")))?
            }
        };

        let conn = db
            .connect()
            .map_err(|e| KhubError::Storage(format!("{location}: {e}")))?;

        let store = Self {
            db,
            conn,
            location: location.clone(),
        };
        store.run_migrations().await?;
        debug!(store = %store.location, "staging store opened");
        Ok(store)
    }

    async fn build_local(path: &Path) -> Result<Database> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| KhubError::io(parent, e))?;
        }

        libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| KhubError::Storage(format!("{}: {e}", path.display())))
    }

    /// Where this store lives.
    pub fn location(&self) -> &StoreLocation {
        &self.location
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn
                    .execute_batch(migration.sql)
                    .await
                    .map_err(|e| {
                        KhubError::Storage(format!("migration v{} failed: {e}", migration.version))
                    })?;
            }
        }
        Ok(())
    }

    /// Current schema version, or 0 if no migrations have been applied.
    async fn schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => match rows.next().await {
                Ok(Some(row)) => row.get::<u32>(0).unwrap_or(0),
                _ => 0,
            },
            Err(_) => 0, // Table doesn't exist yet
        }
    }

    /// Liveness check.
    pub async fn ping(&self) -> Result<()> {
        let mut rows = self
            .conn
            .query("SELECT 1", params![])
            .await
            .map_err(|e| KhubError::Storage(format!("{}: ping failed: {e}", self.location)))?;
        rows.next()
            .await
            .map_err(|e| KhubError::Storage(format!("{}: ping failed: {e}", self.location)))?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Collections
    // -----------------------------------------------------------------------

    /// Replace the contents of `namespace.collection` with `records`.
    ///
    /// Existing documents are deleted first (with a warning), then the
    /// prepared records are inserted, all in one transaction. Records that are
    /// not JSON objects are skipped. Returns the number of documents written.
    pub async fn replace_collection(
        &self,
        namespace: &str,
        collection: &str,
        records: &[Record],
    ) -> Result<usize> {
        let prepared: Vec<PreparedDocument> =
            records.iter().filter_map(prepare_document).collect();

        let skipped = records.len() - prepared.len();
        if skipped > 0 {
            warn!(namespace, collection, skipped, "non-object records were skipped");
        }

        let tx = self
            .conn
            .transaction()
            .await
            .map_err(|e| KhubError::Storage(e.to_string()))?;

        let existing = count_documents(&tx, namespace, collection).await?;
        if existing > 0 {
            tx.execute(
                "DELETE FROM documents WHERE namespace = ?1 AND collection = ?2",
                params![namespace, collection],
            )
            .await
            .map_err(|e| KhubError::Storage(e.to_string()))?;
            warn!(
                namespace,
                collection,
                removed = existing,
                "collection was not empty, previous documents removed"
            );
        }

        for (seq, document) in prepared.iter().enumerate() {
            let body = serde_json::to_string(&document.body)
                .map_err(|e| KhubError::parse(format!("{collection}: {e}")))?;
            tx.execute(
                "INSERT INTO documents (namespace, collection, seq, doc_key, body)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    namespace,
                    collection,
                    seq as i64,
                    document.key.as_deref(),
                    body.as_str()
                ],
            )
            .await
            .map_err(|e| KhubError::Storage(format!("{namespace}.{collection}: {e}")))?;
        }

        tx.commit()
            .await
            .map_err(|e| KhubError::Storage(e.to_string()))?;

        info!(
            namespace,
            collection,
            inserted = prepared.len(),
            "documents inserted"
        );
        Ok(prepared.len())
    }

    /// Number of documents in `namespace.collection`.
    pub async fn count(&self, namespace: &str, collection: &str) -> Result<usize> {
        count_documents(&self.conn, namespace, collection).await
    }

    /// Names of the non-empty collections of `namespace`, sorted.
    pub async fn collection_names(&self, namespace: &str) -> Result<Vec<String>> {
        let mut rows = self
            .conn
            .query(
                "SELECT DISTINCT collection FROM documents WHERE namespace = ?1 ORDER BY collection",
                params![namespace],
            )
            .await
            .map_err(|e| KhubError::Storage(e.to_string()))?;

        let mut names = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| KhubError::Storage(e.to_string()))?
        {
            names.push(
                row.get::<String>(0)
                    .map_err(|e| KhubError::Storage(e.to_string()))?,
            );
        }
        Ok(names)
    }

    /// Documents of `namespace.collection`, in insertion order.
    pub async fn documents(&self, namespace: &str, collection: &str) -> Result<Vec<Record>> {
        let mut rows = self
            .conn
            .query(
                "SELECT body FROM documents WHERE namespace = ?1 AND collection = ?2 ORDER BY seq",
                params![namespace, collection],
            )
            .await
            .map_err(|e| KhubError::Storage(e.to_string()))?;

        let mut documents = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| KhubError::Storage(e.to_string()))?
        {
            let body = row
                .get::<String>(0)
                .map_err(|e| KhubError::Storage(e.to_string()))?;
            documents.push(
                serde_json::from_str(&body)
                    .map_err(|e| KhubError::parse(format!("{namespace}.{collection}: {e}")))?,
            );
        }
        Ok(documents)
    }
}

async fn count_documents(conn: &Connection, namespace: &str, collection: &str) -> Result<usize> {
    let mut rows = conn
        .query(
            "SELECT COUNT(*) FROM documents WHERE namespace = ?1 AND collection = ?2",
            params![namespace, collection],
        )
        .await
        .map_err(|e| KhubError::Storage(e.to_string()))?;

    match rows.next().await {
        Ok(Some(row)) => Ok(row
            .get::<i64>(0)
            .map_err(|e| KhubError::Storage(e.to_string()))? as usize),
        Ok(None) => Ok(0),
        Err(e) => Err(KhubError::Storage(e.to_string())),
    }
}
