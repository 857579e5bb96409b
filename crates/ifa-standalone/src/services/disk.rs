use std::path::{Path, PathBuf};

/// Replace `path` with `data` so readers see either the old or the new file, never a mix.
pub async fn write_atomic(path: &Path, data: &[u8]) -> std::io::Result<()> {
  let tmp = tmp_path(path);
  if let Err(e) = tokio::fs::write(&tmp, data).await {
    let _ = tokio::fs::remove_file(&tmp).await;
    return Err(e);
  }
  if let Err(e) = tokio::fs::rename(&tmp, path).await {
    let _ = tokio::fs::remove_file(&tmp).await;
    return Err(e);
  }
  Ok(())
}

fn tmp_path(path: &Path) -> PathBuf {
  let name = path
    .file_name()
    .map(|n| n.to_string_lossy().to_string())
    .unwrap_or_default();
  path.with_file_name(format!(".{}.{}.tmp", name, uuid::Uuid::new_v4()))
}

/// Total size in bytes of every file below `dir`.
pub async fn dir_size(dir: PathBuf) -> u64 {
  tokio::task::spawn_blocking(move || walk_size(&dir))
    .await
    .unwrap_or(0)
}

fn walk_size(dir: &Path) -> u64 {
  let entries = match std::fs::read_dir(dir) {
    Ok(e) => e,
    Err(_) => return 0,
  };

  let mut total = 0;
  for entry in entries.flatten() {
    let path = entry.path();
    if path.is_dir() {
      total += walk_size(&path);
    } else if let Ok(meta) = entry.metadata() {
      total += meta.len();
    }
  }
  total
}
