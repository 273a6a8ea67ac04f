use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{bail, Result};
use serde::Serialize;

// Search is synthesized locally: the panel has no network surface, so the
// catalogue below stands in for the platform's space listing the way the
// GUI variants faked it.

#[derive(Debug, Clone, Serialize)]
pub struct SpaceResult {
    pub title: String,
    pub host: String,
    pub url: String,
    pub participants: i64,
    pub started_ms: i64,
    pub live: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchResults {
    pub query: String,
    pub live_count: usize,
    pub spaces: Vec<SpaceResult>,
}

const HOUR_MS: i64 = 3_600_000;
const DAY_MS: i64 = 24 * HOUR_MS;

// (title template, space id, participants, age in ms, live)
const CATALOGUE: [(&str, &str, i64, i64, bool); 8] = [
    ("Live Space with @{}", "1lDxLlDddDWjM", 150, 0, true),
    ("Space with @{}", "1mnGdEqlDAGJv", 89, 2 * HOUR_MS, false),
    ("Chat with @{}", "1jMKrngLNgZEq", 234, DAY_MS, false),
    ("Weekly debate @{}", "1AbCdEfGhIjK", 512, 2 * DAY_MS + 5 * HOUR_MS, false),
    ("Space @{}", "1LmNoPqRsTuV", 167, 3 * DAY_MS + 8 * HOUR_MS, false),
    ("Interview @{}", "2WxYzAbCdEfG", 890, 4 * DAY_MS + 12 * HOUR_MS, false),
    ("Space @{}", "3ErFgHiJkLmN", 423, 5 * DAY_MS + 6 * HOUR_MS, false),
    ("Q&A @{}", "4OpQrStUvWxY", 298, 6 * DAY_MS + 3 * HOUR_MS, false),
];

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

// Accept "@account", "account" or "account/whatever" and reduce to the bare
// account name.
pub fn clean_query(raw: &str) -> Result<String> {
    let mut q = raw.trim();
    q = q.strip_prefix('@').unwrap_or(q);
    if let Some(slash) = q.find('/') {
        q = &q[..slash];
    }
    let q = q.trim();
    if q.is_empty() {
        bail!("E_QUERY_EMPTY: enter an account name to search");
    }
    Ok(q.to_string())
}

pub fn search(raw_query: &str) -> Result<SearchResults> {
    let query = clean_query(raw_query)?;
    let now = now_ms();

    let mut spaces: Vec<SpaceResult> = CATALOGUE
        .iter()
        .map(|(title, id, participants, age_ms, live)| SpaceResult {
            title: title.replace("{}", &query),
            host: query.clone(),
            url: format!("https://x.com/i/spaces/{id}"),
            participants: *participants,
            started_ms: now - age_ms,
            live: *live,
        })
        .collect();
    // only the last seven days, newest first
    spaces.retain(|s| now - s.started_ms <= 7 * DAY_MS);
    spaces.sort_by(|a, b| b.started_ms.cmp(&a.started_ms));

    let live_count = spaces.iter().filter(|s| s.live).count();
    Ok(SearchResults {
        query,
        live_count,
        spaces,
    })
}
