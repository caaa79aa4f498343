//! Export of a staging namespace to JSON files for the mapping tools.

use std::path::{Path, PathBuf};

use tracing::{info, warn};

use khub_shared::{KhubError, Result};
use khub_storage::StagingStore;

/// Write every collection of `namespace` to `<dir>/<collection>.json`.
///
/// Returns the paths written, in collection-name order.
pub async fn export_namespace(
    store: &StagingStore,
    namespace: &str,
    dir: &Path,
) -> Result<Vec<PathBuf>> {
    std::fs::create_dir_all(dir).map_err(|e| KhubError::io(dir, e))?;

    let names = store.collection_names(namespace).await?;
    if names.is_empty() {
        warn!(namespace, "nothing to export");
    }

    let mut written = Vec::with_capacity(names.len());
    for name in names {
        let documents = store.documents(namespace, &name).await?;
        let path = dir.join(format!("{name}.json"));

        let json = serde_json::to_string_pretty(&documents)
            .map_err(|e| KhubError::parse(format!("{name}: {e}")))?;
        std::fs::write(&path, json).map_err(|e| KhubError::io(&path, e))?;

        info!(collection = %name, documents = documents.len(), path = %path.display(), "collection exported");
        written.push(path);
    }

    Ok(written)
}
