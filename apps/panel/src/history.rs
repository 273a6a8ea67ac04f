use std::{
    path::Path,
    time::{SystemTime, UNIX_EPOCH},
};

use anyhow::{Context, Result};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};

use crate::trace::Span;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryItem {
    pub url: String,
    pub action: String,
    pub last_used_ms: i64,
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
        CREATE TABLE IF NOT EXISTS url_history (
          url TEXT PRIMARY KEY,
          action TEXT NOT NULL,
          last_used_ms INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_url_history_last_used ON url_history(last_used_ms DESC);
        "#,
    )
    .context("init sqlite schema failed")?;
    Ok(c)
}

// Deduplicated, bounded recency list: re-adding a URL moves it to the front
// (INSERT OR REPLACE re-inserts the row, so recency ties break toward the
// newest write), and anything past `limit` is trimmed.
pub fn append(db_path: &Path, url: &str, action: &str, limit: i64) -> Result<()> {
    let data_dir = db_path.parent().unwrap_or_else(|| Path::new("."));
    let span = Span::start(
        data_dir,
        None,
        "History",
        "HISTORY.append",
        Some(serde_json::json!({"action": action, "limit": limit})),
    );

    let c = match conn(db_path) {
        Ok(c) => c,
        Err(e) => {
            span.err("db", "E_HISTORY_CONN", &e.to_string(), None);
            return Err(e);
        }
    };
    let limit = limit.max(1);
    let r = c
        .execute(
            "INSERT OR REPLACE INTO url_history (url, action, last_used_ms) VALUES (?1, ?2, ?3)",
            params![url, action, now_ms()],
        )
        .and_then(|_| {
            c.execute(
                r#"
                DELETE FROM url_history WHERE url NOT IN (
                  SELECT url FROM url_history ORDER BY last_used_ms DESC, rowid DESC LIMIT ?1
                )
                "#,
                params![limit],
            )
        });
    match r {
        Ok(_) => {
            span.ok(None);
            Ok(())
        }
        Err(e) => {
            span.err("db", "E_HISTORY_INSERT", &format!("{e}"), None);
            Err(anyhow::anyhow!(e).context("insert history failed"))
        }
    }
}

pub fn list(db_path: &Path, limit: i64) -> Result<Vec<HistoryItem>> {
    let data_dir = db_path.parent().unwrap_or_else(|| Path::new("."));
    let span = Span::start(
        data_dir,
        None,
        "History",
        "HISTORY.list",
        Some(serde_json::json!({"limit": limit})),
    );

    let c = match conn(db_path) {
        Ok(c) => c,
        Err(e) => {
            span.err("db", "E_HISTORY_CONN", &e.to_string(), None);
            return Err(e);
        }
    };
    let mut out = Vec::new();
    let mut stmt = c
        .prepare(
            r#"
            SELECT url, action, last_used_ms
            FROM url_history
            ORDER BY last_used_ms DESC, rowid DESC
            LIMIT ?1
            "#,
        )
        .context("prepare history list failed")?;
    let rows = stmt
        .query_map(params![limit], |row| {
            Ok(HistoryItem {
                url: row.get(0)?,
                action: row.get(1)?,
                last_used_ms: row.get(2)?,
            })
        })
        .context("query history list failed")?;
    for r in rows {
        out.push(r?);
    }
    span.ok(Some(serde_json::json!({"items": out.len()})));
    Ok(out)
}

pub fn clear(db_path: &Path) -> Result<()> {
    let data_dir = db_path.parent().unwrap_or_else(|| Path::new("."));
    let span = Span::start(data_dir, None, "History", "HISTORY.clear", None);
    let c = match conn(db_path) {
        Ok(c) => c,
        Err(e) => {
            span.err("db", "E_HISTORY_CONN", &e.to_string(), None);
            return Err(e);
        }
    };
    match c.execute("DELETE FROM url_history", []) {
        Ok(_) => {
            span.ok(None);
            Ok(())
        }
        Err(e) => {
            span.err("db", "E_HISTORY_CLEAR", &format!("{e}"), None);
            Err(anyhow::anyhow!(e).context("clear history failed"))
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
    fn append_and_list_newest_first() {
        let td = tempfile::tempdir().expect("tempdir");
        let db = db(&td);
        append(&db, "https://x.com/i/spaces/1aaa", "listen", 100).expect("append");
        append(&db, "https://x.com/i/spaces/1bbb", "record", 100).expect("append");
        let items = list(&db, 10).expect("list");
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].url, "https://x.com/i/spaces/1bbb");
        assert_eq!(items[0].action, "record");
        assert_eq!(items[1].url, "https://x.com/i/spaces/1aaa");
    }

    #[test]
    fn readd_moves_to_front_without_duplicating() {
        let td = tempfile::tempdir().expect("tempdir");
        let db = db(&td);
        append(&db, "https://x.com/i/spaces/1aaa", "listen", 100).expect("append");
        append(&db, "https://x.com/i/spaces/1bbb", "listen", 100).expect("append");
        append(&db, "https://x.com/i/spaces/1aaa", "record", 100).expect("append");
        let items = list(&db, 10).expect("list");
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].url, "https://x.com/i/spaces/1aaa");
        assert_eq!(items[0].action, "record");
    }

    #[test]
    fn bound_is_enforced() {
        let td = tempfile::tempdir().expect("tempdir");
        let db = db(&td);
        for i in 0..15 {
            append(&db, &format!("https://x.com/i/spaces/1n{i}"), "listen", 10).expect("append");
        }
        let items = list(&db, 100).expect("list");
        assert_eq!(items.len(), 10);
        // the newest survives, the oldest five are gone
        assert_eq!(items[0].url, "https://x.com/i/spaces/1n14");
        assert!(items.iter().all(|i| i.url != "https://x.com/i/spaces/1n0"));
    }

    #[test]
    fn clear_empties_the_table() {
        let td = tempfile::tempdir().expect("tempdir");
        let db = db(&td);
        append(&db, "https://x.com/i/spaces/1aaa", "listen", 100).expect("append");
        clear(&db).expect("clear");
        assert!(list(&db, 10).expect("list").is_empty());
    }
}
