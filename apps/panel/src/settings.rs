use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

pub const DEFAULT_HISTORY_LIMIT: i64 = 100;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    pub save_path: Option<String>,
    pub script_dir: Option<String>,
    pub recorder_bin: Option<String>,
    pub history_limit: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SettingsPatch {
    pub save_path: Option<String>,
    pub script_dir: Option<String>,
    pub recorder_bin: Option<String>,
    pub history_limit: Option<i64>,
}

impl Settings {
    pub fn save_path_buf(&self) -> PathBuf {
        match self.save_path.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            Some(p) => PathBuf::from(p),
            None => home_dir().join("Downloads").join("x_spaces"),
        }
    }

    pub fn history_limit_or_default(&self) -> i64 {
        match self.history_limit {
            Some(n) if n > 0 => n,
            _ => DEFAULT_HISTORY_LIMIT,
        }
    }
}

pub fn home_dir() -> PathBuf {
    #[cfg(windows)]
    let var = "USERPROFILE";
    #[cfg(not(windows))]
    let var = "HOME";
    std::env::var(var).map(PathBuf::from).unwrap_or_else(|_| PathBuf::from("."))
}

pub fn settings_path(data_dir: &Path) -> PathBuf {
    data_dir.join("settings.json")
}

pub fn load_settings(data_dir: &Path) -> Result<Settings> {
    let p = settings_path(data_dir);
    if !p.exists() {
        return Ok(Settings::default());
    }
    let s = fs::read_to_string(&p).context("read settings.json failed")?;
    let v: Settings = serde_json::from_str(&s).context("parse settings.json failed")?;
    Ok(v)
}

// A corrupt settings file must not brick the panel: move it aside and start
// from defaults.
pub fn load_settings_or_recover(data_dir: &Path) -> Settings {
    match load_settings(data_dir) {
        Ok(s) => s,
        Err(e) => {
            crate::safe_eprintln!("settings: recovering from unreadable settings.json: {e:#}");
            let p = settings_path(data_dir);
            if p.exists() {
                let _ = fs::rename(&p, data_dir.join("settings.json.corrupt"));
            }
            Settings::default()
        }
    }
}

pub fn save_settings(data_dir: &Path, settings: &Settings) -> Result<()> {
    std::fs::create_dir_all(data_dir).ok();
    let p = settings_path(data_dir);
    let s = serde_json::to_string_pretty(settings).context("serialize settings failed")?;
    fs::write(&p, s).context("write settings.json failed")?;
    Ok(())
}

pub fn apply_patch(mut cur: Settings, patch: SettingsPatch) -> Settings {
    if let Some(v) = patch.save_path {
        cur.save_path = Some(v);
    }
    if let Some(v) = patch.script_dir {
        cur.script_dir = Some(v);
    }
    if let Some(v) = patch.recorder_bin {
        cur.recorder_bin = Some(v);
    }
    if let Some(v) = patch.history_limit {
        cur.history_limit = Some(v);
    }
    cur
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_round_trip() {
        let td = tempfile::tempdir().expect("tempdir");
        let s = Settings {
            save_path: Some("/tmp/out".to_string()),
            script_dir: Some("/opt/spaces".to_string()),
            recorder_bin: None,
            history_limit: Some(10),
        };
        save_settings(td.path(), &s).expect("save");
        let loaded = load_settings(td.path()).expect("load");
        assert_eq!(loaded.save_path.as_deref(), Some("/tmp/out"));
        assert_eq!(loaded.history_limit, Some(10));
        assert_eq!(loaded.history_limit_or_default(), 10);
    }

    #[test]
    fn missing_settings_default() {
        let td = tempfile::tempdir().expect("tempdir");
        let s = load_settings(td.path()).expect("load");
        assert!(s.save_path.is_none());
        assert_eq!(s.history_limit_or_default(), DEFAULT_HISTORY_LIMIT);
    }

    #[test]
    fn corrupt_settings_recover_to_defaults() {
        let td = tempfile::tempdir().expect("tempdir");
        std::fs::write(settings_path(td.path()), "{not json").expect("write");
        let s = load_settings_or_recover(td.path());
        assert!(s.save_path.is_none());
        assert!(!settings_path(td.path()).exists());
        assert!(td.path().join("settings.json.corrupt").exists());
    }

    #[test]
    fn patch_overrides_only_given_fields() {
        let cur = Settings {
            save_path: Some("/a".to_string()),
            script_dir: Some("/b".to_string()),
            recorder_bin: None,
            history_limit: Some(5),
        };
        let next = apply_patch(
            cur,
            SettingsPatch {
                save_path: Some("/c".to_string()),
                ..SettingsPatch::default()
            },
        );
        assert_eq!(next.save_path.as_deref(), Some("/c"));
        assert_eq!(next.script_dir.as_deref(), Some("/b"));
        assert_eq!(next.history_limit, Some(5));
    }
}
