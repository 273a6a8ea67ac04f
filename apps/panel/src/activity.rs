use std::{
    path::Path,
    time::{SystemTime, UNIX_EPOCH},
};

use anyhow::{Context, Result};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::trace::Span;

// The audit log is for the user, not for debugging; keep it bounded the way
// the GUI variants did.
const ACTIVITY_CAP: i64 = 1000;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityEntry {
    pub id: String,
    pub action: String,
    pub details: String,
    pub url: Option<String>,
    pub ts_ms: i64,
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
        CREATE TABLE IF NOT EXISTS activity_log (
          id TEXT PRIMARY KEY,
          action TEXT NOT NULL,
          details TEXT NOT NULL,
          url TEXT NULL,
          ts_ms INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_activity_ts ON activity_log(ts_ms DESC);
        "#,
    )
    .context("init sqlite schema failed")?;
    Ok(c)
}

pub fn append(db_path: &Path, action: &str, details: &str, url: Option<&str>) -> Result<()> {
    let data_dir = db_path.parent().unwrap_or_else(|| Path::new("."));
    let span = Span::start(
        data_dir,
        None,
        "Activity",
        "ACTIVITY.append",
        Some(serde_json::json!({"action": action})),
    );

    let c = match conn(db_path) {
        Ok(c) => c,
        Err(e) => {
            span.err("db", "E_ACTIVITY_CONN", &e.to_string(), None);
            return Err(e);
        }
    };
    let r = c
        .execute(
            "INSERT INTO activity_log (id, action, details, url, ts_ms) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![Uuid::new_v4().to_string(), action, details, url, now_ms()],
        )
        .and_then(|_| {
            c.execute(
                r#"
                DELETE FROM activity_log WHERE id NOT IN (
                  SELECT id FROM activity_log ORDER BY ts_ms DESC, rowid DESC LIMIT ?1
                )
                "#,
                params![ACTIVITY_CAP],
            )
        });
    match r {
        Ok(_) => {
            span.ok(None);
            Ok(())
        }
        Err(e) => {
            span.err("db", "E_ACTIVITY_INSERT", &format!("{e}"), None);
            Err(anyhow::anyhow!(e).context("insert activity failed"))
        }
    }
}

pub fn list(db_path: &Path, limit: i64) -> Result<Vec<ActivityEntry>> {
    let data_dir = db_path.parent().unwrap_or_else(|| Path::new("."));
    let span = Span::start(
        data_dir,
        None,
        "Activity",
        "ACTIVITY.list",
        Some(serde_json::json!({"limit": limit})),
    );

    let c = match conn(db_path) {
        Ok(c) => c,
        Err(e) => {
            span.err("db", "E_ACTIVITY_CONN", &e.to_string(), None);
            return Err(e);
        }
    };
    let mut out = Vec::new();
    let mut stmt = c
        .prepare(
            r#"
            SELECT id, action, details, url, ts_ms
            FROM activity_log
            ORDER BY ts_ms DESC, rowid DESC
            LIMIT ?1
            "#,
        )
        .context("prepare activity list failed")?;
    let rows = stmt
        .query_map(params![limit], |row| {
            Ok(ActivityEntry {
                id: row.get(0)?,
                action: row.get(1)?,
                details: row.get(2)?,
                url: row.get(3)?,
                ts_ms: row.get(4)?,
            })
        })
        .context("query activity list failed")?;
    for r in rows {
        out.push(r?);
    }
    span.ok(Some(serde_json::json!({"items": out.len()})));
    Ok(out)
}

pub fn clear(db_path: &Path) -> Result<()> {
    let data_dir = db_path.parent().unwrap_or_else(|| Path::new("."));
    let span = Span::start(data_dir, None, "Activity", "ACTIVITY.clear", None);
    let c = match conn(db_path) {
        Ok(c) => c,
        Err(e) => {
            span.err("db", "E_ACTIVITY_CONN", &e.to_string(), None);
            return Err(e);
        }
    };
    match c.execute("DELETE FROM activity_log", []) {
        Ok(_) => {
            span.ok(None);
            Ok(())
        }
        Err(e) => {
            span.err("db", "E_ACTIVITY_CLEAR", &format!("{e}"), None);
            Err(anyhow::anyhow!(e).context("clear activity failed"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_and_list_newest_first() {
        let td = tempfile::tempdir().expect("tempdir");
        let db = td.path().join("panel.sqlite3");
        append(&db, "record_start", "started recording", Some("https://x.com/i/spaces/1aaa"))
            .expect("append");
        append(&db, "record_stop", "stopped recording", None).expect("append");

        let entries = list(&db, 10).expect("list");
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].action, "record_stop");
        assert!(entries[0].url.is_none());
        assert_eq!(
            entries[1].url.as_deref(),
            Some("https://x.com/i/spaces/1aaa")
        );
    }

    #[test]
    fn list_respects_limit_and_clear_empties() {
        let td = tempfile::tempdir().expect("tempdir");
        let db = td.path().join("panel.sqlite3");
        for i in 0..5 {
            append(&db, "volume", &format!("step {i}"), None).expect("append");
        }
        assert_eq!(list(&db, 3).expect("list").len(), 3);
        clear(&db).expect("clear");
        assert!(list(&db, 10).expect("list").is_empty());
    }
}
