use std::path::PathBuf;

use anyhow::Result;

use crate::controller::Action;
use crate::settings::{home_dir, Settings};

pub const DEFAULT_RECORDER_BIN: &str = "xspace-record";

// Everything needed to launch the external recorder for one job. Built up
// front so the spawn itself is a plain argument-vector exec: no shell, no
// string interpolation around the URL.
#[derive(Debug, Clone)]
pub struct LaunchPlan {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    pub envs: Vec<(String, String)>,
}

pub fn script_dir(settings: &Settings) -> PathBuf {
    if let Ok(p) = std::env::var("SPACEDECK_SCRIPT_DIR") {
        return PathBuf::from(p);
    }
    match settings.script_dir.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        Some(p) => PathBuf::from(p),
        None => home_dir().join("spaces"),
    }
}

fn recorder_bin(settings: &Settings) -> String {
    if let Ok(p) = std::env::var("SPACEDECK_RECORDER") {
        return p;
    }
    settings
        .recorder_bin
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(DEFAULT_RECORDER_BIN)
        .to_string()
}

pub fn plan_for(action: Action, url: &str, settings: &Settings) -> Result<LaunchPlan> {
    let dir = script_dir(settings);
    let bin = recorder_bin(settings);
    let program = if bin.contains('/') || bin.contains('\\') {
        PathBuf::from(bin)
    } else {
        dir.join(bin)
    };

    let save_path = settings.save_path_buf();
    let args = match action {
        Action::Listen => vec!["--live".to_string(), url.to_string()],
        Action::Record => vec![
            "--record".to_string(),
            url.to_string(),
            "--dir".to_string(),
            save_path.display().to_string(),
        ],
        Action::Youtube => vec!["--restream".to_string(), url.to_string()],
        Action::Archive => vec!["--archive".to_string(), url.to_string()],
    };

    Ok(LaunchPlan {
        program,
        args,
        cwd: dir,
        envs: vec![(
            "X_SPACES_DIR".to_string(),
            save_path.display().to_string(),
        )],
    })
}

pub fn is_space_url(url: &str) -> bool {
    let lower = url.to_ascii_lowercase();
    lower.contains("x.com/i/spaces/") || lower.contains("twitter.com/i/spaces/")
}

pub fn extract_space_id(url: &str) -> Option<String> {
    let marker = "/spaces/";
    let at = url.find(marker)? + marker.len();
    let id: String = url[at..]
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric())
        .collect();
    if id.is_empty() {
        None
    } else {
        Some(id)
    }
}

// The recorder and the downloaders it wraps print progress as "NN.N%"
// somewhere in a line; take the number right before the percent sign.
pub fn parse_progress_percent(line: &str) -> Option<f64> {
    let pct = line.find('%')?;
    let head = &line[..pct];
    let start = head
        .rfind(|c: char| !(c.is_ascii_digit() || c == '.'))
        .map(|i| i + 1)
        .unwrap_or(0);
    let num = &head[start..];
    if num.is_empty() || !num.chars().any(|c| c.is_ascii_digit()) {
        return None;
    }
    let v: f64 = num.parse().ok()?;
    if v.is_finite() && (0.0..=100.0).contains(&v) {
        Some(v)
    } else {
        None
    }
}
