use std::{
    path::Path,
    time::{SystemTime, UNIX_EPOCH},
};

use anyhow::{bail, Context, Result};
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct DownloadEntry {
    pub name: String,
    pub size_bytes: u64,
    pub modified_ms: i64,
}

fn system_time_ms(t: SystemTime) -> i64 {
    t.duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

// List the recordings in the save directory, newest first. A missing
// directory just means nothing has been saved yet.
pub fn list(save_dir: &Path) -> Result<Vec<DownloadEntry>> {
    if !save_dir.exists() {
        return Ok(Vec::new());
    }
    let rd = std::fs::read_dir(save_dir)
        .with_context(|| format!("read save dir failed: {}", save_dir.display()))?;

    let mut out = Vec::new();
    for entry in rd {
        let entry = entry.context("read dir entry failed")?;
        let meta = entry.metadata().context("stat dir entry failed")?;
        if !meta.is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().to_string();
        if name.starts_with('.') {
            continue;
        }
        out.push(DownloadEntry {
            name,
            size_bytes: meta.len(),
            modified_ms: meta.modified().map(system_time_ms).unwrap_or(0),
        });
    }
    out.sort_by(|a, b| b.modified_ms.cmp(&a.modified_ms).then(a.name.cmp(&b.name)));
    Ok(out)
}

pub fn remove(save_dir: &Path, name: &str) -> Result<()> {
    // the name comes from user input; keep it inside the save dir
    if name.is_empty() || name.contains('/') || name.contains('\\') || name.contains("..") {
        bail!("E_DOWNLOAD_NAME: invalid file name: {name}");
    }
    let path = save_dir.join(name);
    if !path.is_file() {
        bail!("E_DOWNLOAD_MISSING: no such recording: {name}");
    }
    std::fs::remove_file(&path)
        .with_context(|| format!("delete recording failed: {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_dir_lists_empty() {
        let td = tempfile::tempdir().expect("tempdir");
        let entries = list(&td.path().join("nope")).expect("list");
        assert!(entries.is_empty());
    }

    #[test]
    fn lists_files_and_removes_by_name() {
        let td = tempfile::tempdir().expect("tempdir");
        std::fs::write(td.path().join("space_a.m4a"), b"aaaa").expect("write");
        std::fs::write(td.path().join("space_b.m4a"), b"bb").expect("write");
        std::fs::write(td.path().join(".hidden"), b"x").expect("write");
        std::fs::create_dir(td.path().join("subdir")).expect("mkdir");

        let entries = list(td.path()).expect("list");
        assert_eq!(entries.len(), 2);
        assert!(entries.iter().any(|e| e.name == "space_a.m4a" && e.size_bytes == 4));

        remove(td.path(), "space_a.m4a").expect("remove");
        assert_eq!(list(td.path()).expect("list").len(), 1);
    }

    #[test]
    fn remove_rejects_traversal_and_missing() {
        let td = tempfile::tempdir().expect("tempdir");
        assert!(remove(td.path(), "../etc/passwd")
            .expect_err("traversal")
            .to_string()
            .contains("E_DOWNLOAD_NAME"));
        assert!(remove(td.path(), "ghost.m4a")
            .expect_err("missing")
            .to_string()
            .contains("E_DOWNLOAD_MISSING"));
    }
}
