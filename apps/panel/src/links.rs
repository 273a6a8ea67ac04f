use std::{
    path::Path,
    time::{SystemTime, UNIX_EPOCH},
};

use anyhow::{anyhow, Context, Result};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};

use crate::trace::Span;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SavedLink {
    pub id: String,
    pub url: String,
    pub created_at_ms: i64,
}

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

fn conn(db_path: &Path) -> Result<Connection> {
    let c = Connection::open(db_path).context("open sqlite failed")?;
    c.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS saved_links (
          id TEXT PRIMARY KEY,
          url TEXT NOT NULL,
          created_at_ms INTEGER NOT NULL
        );
        "#,
    )
    .context("init sqlite schema failed")?;
    Ok(c)
}

pub fn add(db_path: &Path, id: &str, url: &str) -> Result<SavedLink> {
    let data_dir = db_path.parent().unwrap_or_else(|| Path::new("."));
    let span = Span::start(
        data_dir,
        None,
        "Links",
        "LINKS.add",
        Some(serde_json::json!({"id": id})),
    );

    let c = match conn(db_path) {
        Ok(c) => c,
        Err(e) => {
            span.err("db", "E_LINKS_CONN", &e.to_string(), None);
            return Err(e);
        }
    };
    let link = SavedLink {
        id: id.to_string(),
        url: url.to_string(),
        created_at_ms: now_ms(),
    };
    let inserted = c
        .execute(
            "INSERT OR IGNORE INTO saved_links (id, url, created_at_ms) VALUES (?1, ?2, ?3)",
            params![link.id, link.url, link.created_at_ms],
        )
        .context("insert saved link failed");
    match inserted {
        Ok(0) => {
            span.err("logic", "E_LINK_EXISTS", "id already exists", None);
            Err(anyhow!("E_LINK_EXISTS: the id '{id}' already exists"))
        }
        Ok(_) => {
            span.ok(None);
            Ok(link)
        }
        Err(e) => {
            span.err_anyhow("db", "E_LINKS_INSERT", &e, None);
            Err(e)
        }
    }
}

pub fn list(db_path: &Path) -> Result<Vec<SavedLink>> {
    let data_dir = db_path.parent().unwrap_or_else(|| Path::new("."));
    let span = Span::start(data_dir, None, "Links", "LINKS.list", None);

    let c = match conn(db_path) {
        Ok(c) => c,
        Err(e) => {
            span.err("db", "E_LINKS_CONN", &e.to_string(), None);
            return Err(e);
        }
    };
    let mut out = Vec::new();
    let mut stmt = c
        .prepare(
            "SELECT id, url, created_at_ms FROM saved_links ORDER BY created_at_ms ASC, rowid ASC",
        )
        .context("prepare links list failed")?;
    let rows = stmt
        .query_map([], |row| {
            Ok(SavedLink {
                id: row.get(0)?,
                url: row.get(1)?,
                created_at_ms: row.get(2)?,
            })
        })
        .context("query links list failed")?;
    for r in rows {
        out.push(r?);
    }
    span.ok(Some(serde_json::json!({"items": out.len()})));
    Ok(out)
}

pub fn remove(db_path: &Path, id: &str) -> Result<bool> {
    let data_dir = db_path.parent().unwrap_or_else(|| Path::new("."));
    let span = Span::start(
        data_dir,
        None,
        "Links",
        "LINKS.remove",
        Some(serde_json::json!({"id": id})),
    );
    let c = match conn(db_path) {
        Ok(c) => c,
        Err(e) => {
            span.err("db", "E_LINKS_CONN", &e.to_string(), None);
            return Err(e);
        }
    };
    match c.execute("DELETE FROM saved_links WHERE id = ?1", params![id]) {
        Ok(n) => {
            span.ok(Some(serde_json::json!({"removed": n})));
            Ok(n > 0)
        }
        Err(e) => {
            span.err("db", "E_LINKS_DELETE", &format!("{e}"), None);
            Err(anyhow::anyhow!(e).context("delete saved link failed"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn db(td: &tempfile::TempDir) -> std::path::PathBuf {
        td.path().join("panel.sqlite3")
    }

    #[test]
    fn add_list_remove() {
        let td = tempfile::tempdir().expect("tempdir");
        let db = db(&td);
        add(&db, "podcast-monday", "https://x.com/i/spaces/1aaa").expect("add");
        add(&db, "debate", "https://x.com/i/spaces/1bbb").expect("add");

        let links = list(&db).expect("list");
        assert_eq!(links.len(), 2);
        assert_eq!(links[0].id, "podcast-monday");

        assert!(remove(&db, "debate").expect("remove"));
        assert!(!remove(&db, "debate").expect("remove again"));
        assert_eq!(list(&db).expect("list").len(), 1);
    }

    #[test]
    fn duplicate_id_is_rejected() {
        let td = tempfile::tempdir().expect("tempdir");
        let db = db(&td);
        add(&db, "podcast-monday", "https://x.com/i/spaces/1aaa").expect("add");
        let err = add(&db, "podcast-monday", "https://x.com/i/spaces/1bbb")
            .expect_err("duplicate id must fail");
        assert!(err.to_string().contains("E_LINK_EXISTS"));
        // the original url is untouched
        let links = list(&db).expect("list");
        assert_eq!(links[0].url, "https://x.com/i/spaces/1aaa");
    }
}
