//! SQL migration definitions for the staging store.
//!
//! Migrations are applied in order on open. Each migration has a version
//! number and a batch of SQL statements.

/// A database migration with a version and SQL statements.
pub(crate) struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub sql: &'static str,
}

/// All migrations, in ascending version order.
pub(crate) fn all_migrations() -> Vec<Migration> {
    vec![Migration {
        version: 1,
        description: "Initial schema: namespaced JSON document collections",
        sql: r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_migrations (
    version   INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- One row per staged document. `seq` keeps insertion order within a collection.
CREATE TABLE IF NOT EXISTS documents (
    namespace  TEXT NOT NULL,
    collection TEXT NOT NULL,
    seq        INTEGER NOT NULL,
    doc_key    TEXT,
    body       TEXT NOT NULL,
    PRIMARY KEY (namespace, collection, seq)
);

CREATE INDEX IF NOT EXISTS idx_documents_key ON documents(namespace, collection, doc_key);

INSERT INTO schema_migrations (version) VALUES (1);
"#,
    }]
}
