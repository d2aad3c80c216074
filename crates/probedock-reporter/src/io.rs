//! Filesystem helpers shared by the cache and the payload writer.

use std::path::Path;

use tokio::fs;

/// Write through a temp file and rename, so readers never see a partial file.
pub(crate) async fn write_atomic(path: &Path, content: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }

    let temp_path = path.with_extension("tmp");
    fs::write(&temp_path, content).await?;
    fs::rename(&temp_path, path).await
}
