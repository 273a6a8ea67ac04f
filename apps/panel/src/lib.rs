mod activity;
mod clipboard;
mod controller;
mod data_dir;
mod downloads;
mod history;
mod links;
mod metrics;
mod panic_log;
mod recorder;
mod safe_print;
mod search;
mod settings;
mod startup_trace;
mod timer;
mod trace;
mod volume;

use std::{
    io::Write,
    path::PathBuf,
    sync::Mutex,
    time::Duration,
};

use anyhow::{Context, Result};

use activity::ActivityEntry;
use controller::{Action, Controller, StartOpts, StatusSnapshot, DB_FILE};
use downloads::DownloadEntry;
use history::HistoryItem;
use links::SavedLink;
use search::SearchResults;
use settings::{Settings, SettingsPatch};
use trace::Span;

// All state one command handler can touch, passed by reference. There is no
// global delegate: the controller, the URL field and the data dir live here.
pub struct AppState {
    data_dir: PathBuf,
    controller: Controller,
    url_field: Mutex<Option<String>>,
}

impl AppState {
    fn new(data_dir: PathBuf) -> Self {
        Self {
            controller: Controller::new(data_dir.clone()),
            data_dir,
            url_field: Mutex::new(None),
        }
    }

    fn db_path(&self) -> PathBuf {
        self.data_dir.join(DB_FILE)
    }
}

fn cmd_span(
    data_dir: &std::path::Path,
    job_id: Option<&str>,
    step_id: &str,
    ctx: Option<serde_json::Value>,
) -> Span {
    Span::start(data_dir, job_id, "Cmd", step_id, ctx)
}

fn cmd_start(state: &AppState, action_raw: &str, url: Option<&str>) -> Result<String, String> {
    let span = cmd_span(
        &state.data_dir,
        None,
        "CMD.start",
        Some(serde_json::json!({"action": action_raw, "explicit_url": url.is_some()})),
    );
    let Some(action) = Action::parse(action_raw) else {
        span.err("logic", "E_ACTION_UNKNOWN", "unknown action", None);
        return Err(format!(
            "E_ACTION_UNKNOWN: unknown action '{action_raw}' (listen|record|youtube|archive)"
        ));
    };
    let url = match url
        .map(str::to_string)
        .or_else(|| state.url_field.lock().unwrap().clone())
    {
        Some(u) => u,
        None => {
            span.err("logic", "E_URL_REQUIRED", "no url given or pasted", None);
            return Err("E_URL_REQUIRED: give a Space link or run 'paste' first".to_string());
        }
    };

    let s = settings::load_settings_or_recover(&state.data_dir);
    let save_path = s.save_path_buf();
    if let Err(e) = std::fs::create_dir_all(&save_path) {
        span.err("io", "E_SAVE_DIR", &e.to_string(), None);
        return Err(format!(
            "E_SAVE_DIR: could not create {}: {e}",
            save_path.display()
        ));
    }
    let plan = match recorder::plan_for(action, &url, &s) {
        Ok(p) => p,
        Err(e) => {
            span.err_anyhow("logic", "E_PLAN_FAILED", &e, None);
            return Err(e.to_string());
        }
    };
    match state.controller.start(
        action,
        &url,
        StartOpts {
            plan,
            history_limit: s.history_limit_or_default(),
        },
    ) {
        Ok(job_id) => {
            span.ok(Some(serde_json::json!({"job_id": job_id})));
            Ok(job_id)
        }
        Err(e) => {
            span.err_anyhow("process", "E_CMD_START", &e, None);
            Err(e.to_string())
        }
    }
}

fn cmd_stop(state: &AppState, target: &str) -> Result<(), String> {
    let span = cmd_span(
        &state.data_dir,
        None,
        "CMD.stop",
        Some(serde_json::json!({"target": target})),
    );
    let r = if target.eq_ignore_ascii_case("all") {
        state.controller.stop_all()
    } else {
        match Action::parse(target) {
            Some(a) => state.controller.stop(a),
            None => {
                span.err("logic", "E_ACTION_UNKNOWN", "unknown action", None);
                return Err(format!(
                    "E_ACTION_UNKNOWN: unknown action '{target}' (listen|record|youtube|archive|all)"
                ));
            }
        }
    };
    match r {
        Ok(()) => {
            span.ok(None);
            Ok(())
        }
        Err(e) => {
            span.err_anyhow("process", "E_CMD_STOP", &e, None);
            Err(e.to_string())
        }
    }
}

fn cmd_pause(state: &AppState, action_raw: &str) -> Result<(), String> {
    let span = cmd_span(
        &state.data_dir,
        None,
        "CMD.pause",
        Some(serde_json::json!({"action": action_raw})),
    );
    let Some(action) = Action::parse(action_raw) else {
        span.err("logic", "E_ACTION_UNKNOWN", "unknown action", None);
        return Err(format!("E_ACTION_UNKNOWN: unknown action '{action_raw}'"));
    };
    match state.controller.pause(action) {
        Ok(()) => {
            span.ok(None);
            Ok(())
        }
        Err(e) => {
            span.err_anyhow("process", "E_CMD_PAUSE", &e, None);
            Err(e.to_string())
        }
    }
}

fn cmd_resume(state: &AppState, action_raw: &str) -> Result<(), String> {
    let span = cmd_span(
        &state.data_dir,
        None,
        "CMD.resume",
        Some(serde_json::json!({"action": action_raw})),
    );
    let Some(action) = Action::parse(action_raw) else {
        span.err("logic", "E_ACTION_UNKNOWN", "unknown action", None);
        return Err(format!("E_ACTION_UNKNOWN: unknown action '{action_raw}'"));
    };
    match state.controller.resume(action) {
        Ok(()) => {
            span.ok(None);
            Ok(())
        }
        Err(e) => {
            span.err_anyhow("process", "E_CMD_RESUME", &e, None);
            Err(e.to_string())
        }
    }
}

fn cmd_status(state: &AppState) -> StatusSnapshot {
    state.controller.status()
}

fn cmd_paste(state: &AppState) -> Result<String, String> {
    let span = cmd_span(&state.data_dir, None, "CMD.paste", None);
    match clipboard::read_text() {
        Ok(text) => {
            *state.url_field.lock().unwrap() = Some(text.clone());
            span.ok(Some(serde_json::json!({"chars": text.len()})));
            Ok(text)
        }
        Err(e) => {
            span.err_anyhow("clipboard", "E_CMD_PASTE", &e, None);
            Err(e.to_string())
        }
    }
}

fn cmd_copy(state: &AppState, text: &str) -> Result<(), String> {
    let span = cmd_span(
        &state.data_dir,
        None,
        "CMD.copy",
        Some(serde_json::json!({"chars": text.len()})),
    );
    match clipboard::copy_text(text) {
        Ok(()) => {
            span.ok(None);
            Ok(())
        }
        Err(e) => {
            span.err_anyhow("clipboard", "E_CMD_COPY", &e, None);
            Err(e.to_string())
        }
    }
}

fn cmd_history_list(state: &AppState, limit: i64) -> Result<Vec<HistoryItem>, String> {
    let span = cmd_span(
        &state.data_dir,
        None,
        "CMD.history_list",
        Some(serde_json::json!({"limit": limit})),
    );
    match history::list(&state.db_path(), limit) {
        Ok(v) => {
            span.ok(Some(serde_json::json!({"count": v.len()})));
            Ok(v)
        }
        Err(e) => {
            span.err_anyhow("db", "E_CMD_HISTORY_LIST", &e, None);
            Err(e.to_string())
        }
    }
}

fn cmd_history_clear(state: &AppState) -> Result<(), String> {
    let span = cmd_span(&state.data_dir, None, "CMD.history_clear", None);
    match history::clear(&state.db_path()) {
        Ok(()) => {
            span.ok(None);
            Ok(())
        }
        Err(e) => {
            span.err_anyhow("db", "E_CMD_HISTORY_CLEAR", &e, None);
            Err(e.to_string())
        }
    }
}

fn cmd_links_add(state: &AppState, id: &str, url: &str) -> Result<SavedLink, String> {
    let span = cmd_span(
        &state.data_dir,
        None,
        "CMD.links_add",
        Some(serde_json::json!({"id": id})),
    );
    match links::add(&state.db_path(), id, url) {
        Ok(l) => {
            span.ok(None);
            Ok(l)
        }
        Err(e) => {
            span.err_anyhow("db", "E_CMD_LINKS_ADD", &e, None);
            Err(e.to_string())
        }
    }
}

fn cmd_links_list(state: &AppState) -> Result<Vec<SavedLink>, String> {
    let span = cmd_span(&state.data_dir, None, "CMD.links_list", None);
    match links::list(&state.db_path()) {
        Ok(v) => {
            span.ok(Some(serde_json::json!({"count": v.len()})));
            Ok(v)
        }
        Err(e) => {
            span.err_anyhow("db", "E_CMD_LINKS_LIST", &e, None);
            Err(e.to_string())
        }
    }
}

fn cmd_links_remove(state: &AppState, id: &str) -> Result<bool, String> {
    let span = cmd_span(
        &state.data_dir,
        None,
        "CMD.links_remove",
        Some(serde_json::json!({"id": id})),
    );
    match links::remove(&state.db_path(), id) {
        Ok(removed) => {
            span.ok(Some(serde_json::json!({"removed": removed})));
            Ok(removed)
        }
        Err(e) => {
            span.err_anyhow("db", "E_CMD_LINKS_REMOVE", &e, None);
            Err(e.to_string())
        }
    }
}

fn cmd_search(state: &AppState, query: &str) -> Result<SearchResults, String> {
    let span = cmd_span(
        &state.data_dir,
        None,
        "CMD.search",
        Some(serde_json::json!({"query_chars": query.len()})),
    );
    match search::search(query) {
        Ok(r) => {
            span.ok(Some(serde_json::json!({"results": r.spaces.len(), "live": r.live_count})));
            Ok(r)
        }
        Err(e) => {
            span.err_anyhow("logic", "E_CMD_SEARCH", &e, None);
            Err(e.to_string())
        }
    }
}

fn cmd_downloads_list(state: &AppState) -> Result<Vec<DownloadEntry>, String> {
    let span = cmd_span(&state.data_dir, None, "CMD.downloads_list", None);
    let s = settings::load_settings_or_recover(&state.data_dir);
    match downloads::list(&s.save_path_buf()) {
        Ok(v) => {
            span.ok(Some(serde_json::json!({"count": v.len()})));
            Ok(v)
        }
        Err(e) => {
            span.err_anyhow("io", "E_CMD_DOWNLOADS_LIST", &e, None);
            Err(e.to_string())
        }
    }
}

fn cmd_downloads_remove(state: &AppState, name: &str) -> Result<(), String> {
    let span = cmd_span(
        &state.data_dir,
        None,
        "CMD.downloads_remove",
        Some(serde_json::json!({"name": name})),
    );
    let s = settings::load_settings_or_recover(&state.data_dir);
    match downloads::remove(&s.save_path_buf(), name) {
        Ok(()) => {
            span.ok(None);
            Ok(())
        }
        Err(e) => {
            span.err_anyhow("io", "E_CMD_DOWNLOADS_REMOVE", &e, None);
            Err(e.to_string())
        }
    }
}

fn cmd_settings_get(state: &AppState) -> Settings {
    settings::load_settings_or_recover(&state.data_dir)
}

fn cmd_settings_set(state: &AppState, key: &str, value: &str) -> Result<Settings, String> {
    let span = cmd_span(
        &state.data_dir,
        None,
        "CMD.settings_set",
        Some(serde_json::json!({"key": key})),
    );
    let mut patch = SettingsPatch::default();
    match key {
        "save_path" => patch.save_path = Some(value.to_string()),
        "script_dir" => patch.script_dir = Some(value.to_string()),
        "recorder" => patch.recorder_bin = Some(value.to_string()),
        "history_limit" => match value.parse::<i64>() {
            Ok(n) if n > 0 => patch.history_limit = Some(n),
            _ => {
                span.err("parse", "E_SETTING_VALUE", "history_limit must be a positive number", None);
                return Err("E_SETTING_VALUE: history_limit must be a positive number".to_string());
            }
        },
        _ => {
            span.err("logic", "E_SETTING_UNKNOWN", "unknown setting", None);
            return Err(format!(
                "E_SETTING_UNKNOWN: unknown setting '{key}' (save_path|script_dir|recorder|history_limit)"
            ));
        }
    }
    let cur = settings::load_settings_or_recover(&state.data_dir);
    let next = settings::apply_patch(cur, patch);
    if let Err(e) = settings::save_settings(&state.data_dir, &next) {
        span.err_anyhow("io", "E_CMD_SETTINGS_SET", &e, None);
        return Err(e.to_string());
    }
    span.ok(None);
    Ok(next)
}

fn cmd_volume(state: &AppState, arg: &str) -> Result<(), String> {
    let span = cmd_span(
        &state.data_dir,
        None,
        "CMD.volume",
        Some(serde_json::json!({"arg": arg})),
    );
    let (r, details) = match arg {
        "up" => (volume::step(true), "volume up"),
        "down" => (volume::step(false), "volume down"),
        "mute" => (volume::toggle_mute(), "mute toggled"),
        _ => {
            span.err("logic", "E_VOLUME_ARG", "unknown volume argument", None);
            return Err("E_VOLUME_ARG: use volume up|down|mute".to_string());
        }
    };
    match r {
        Ok(()) => {
            if let Err(e) = activity::append(&state.db_path(), "volume", details, None) {
                crate::safe_eprintln!("activity append failed: {e:#}");
            }
            span.ok(None);
            Ok(())
        }
        Err(e) => {
            span.err_anyhow("process", "E_CMD_VOLUME", &e, None);
            Err(e.to_string())
        }
    }
}

fn cmd_activity(state: &AppState, limit: i64) -> Result<Vec<ActivityEntry>, String> {
    let span = cmd_span(
        &state.data_dir,
        None,
        "CMD.activity",
        Some(serde_json::json!({"limit": limit})),
    );
    match activity::list(&state.db_path(), limit) {
        Ok(v) => {
            span.ok(Some(serde_json::json!({"count": v.len()})));
            Ok(v)
        }
        Err(e) => {
            span.err_anyhow("db", "E_CMD_ACTIVITY", &e, None);
            Err(e.to_string())
        }
    }
}

fn cmd_activity_clear(state: &AppState) -> Result<(), String> {
    let span = cmd_span(&state.data_dir, None, "CMD.activity_clear", None);
    match activity::clear(&state.db_path()) {
        Ok(()) => {
            span.ok(None);
            Ok(())
        }
        Err(e) => {
            span.err_anyhow("db", "E_CMD_ACTIVITY_CLEAR", &e, None);
            Err(e.to_string())
        }
    }
}

const HELP: &str = "\
commands:
  start <listen|record|youtube|archive> [url]   launch a job (url defaults to the pasted link)
  stop <action|all>                             stop a job, or everything
  pause <action> / resume <action>              suspend or continue a job
  status                                        slot states, progress and the shared timer
  timer                                         just the shared elapsed clock
  watch [secs]                                  re-render status once a second
  paste                                         read a Space link from the clipboard
  copy <text>                                   put text on the clipboard
  history [n] | history clear                   recently used Space links
  links | links add <id> <url> | links rm <id>  named bookmarks
  search <@account>                             find an account's recent Spaces
  downloads | downloads rm <file>               recordings in the save folder
  settings | set <key> <value>                  save_path, script_dir, recorder, history_limit
  volume up|down|mute                           nudge the output volume
  activity [n] | activity clear                 recent panel activity
  quit                                          stop everything and leave";

pub fn dispatch(state: &AppState, parts: &[&str]) -> Result<String, String> {
    match parts {
        ["start", action] => cmd_start(state, action, None).map(|id| format!("started job {id}")),
        ["start", action, url] => {
            cmd_start(state, action, Some(url)).map(|id| format!("started job {id}"))
        }
        ["stop"] | ["stop", "all"] => cmd_stop(state, "all").map(|_| "stopped".to_string()),
        ["stop", action] => cmd_stop(state, action).map(|_| "stopped".to_string()),
        ["pause", action] => cmd_pause(state, action).map(|_| "paused".to_string()),
        ["resume", action] => cmd_resume(state, action).map(|_| "resumed".to_string()),
        ["status"] => Ok(render_status(&cmd_status(state))),
        ["timer"] => Ok(state.controller.timer().display()),
        ["watch"] => Ok(watch(state, 10)),
        ["watch", secs] => {
            let secs: u64 = secs
                .parse()
                .map_err(|_| "E_WATCH_SECS: watch takes a number of seconds".to_string())?;
            Ok(watch(state, secs))
        }
        ["paste"] => cmd_paste(state).map(|url| match recorder::extract_space_id(&url) {
            Some(id) => format!("url field set (space {id}): {url}"),
            None => format!("url field set (not a Space link): {url}"),
        }),
        ["copy", rest @ ..] if !rest.is_empty() => {
            let text = rest.join(" ");
            cmd_copy(state, &text).map(|_| "copied".to_string())
        }
        ["history"] => cmd_history_list(state, 20).map(|items| render_history(&items)),
        ["history", "clear"] => cmd_history_clear(state).map(|_| "history cleared".to_string()),
        ["history", n] => {
            let n: i64 = n
                .parse()
                .map_err(|_| "E_HISTORY_LIMIT: history takes a number".to_string())?;
            cmd_history_list(state, n).map(|items| render_history(&items))
        }
        ["links"] => cmd_links_list(state).map(|links| render_links(&links)),
        ["links", "add", id, url] => {
            cmd_links_add(state, id, url).map(|l| format!("saved '{}' -> {}", l.id, l.url))
        }
        ["links", "rm", id] => cmd_links_remove(state, id).map(|removed| {
            if removed {
                format!("removed '{id}'")
            } else {
                format!("no link named '{id}'")
            }
        }),
        ["search", query] => cmd_search(state, query).map(|r| render_search(&r)),
        ["downloads"] => cmd_downloads_list(state).map(|entries| render_downloads(&entries)),
        ["downloads", "rm", name] => {
            cmd_downloads_remove(state, name).map(|_| format!("deleted {name}"))
        }
        ["settings"] => {
            let s = cmd_settings_get(state);
            Ok(render_settings(&s))
        }
        ["set", key, value] => {
            cmd_settings_set(state, key, value).map(|s| render_settings(&s))
        }
        ["volume", arg] => cmd_volume(state, arg).map(|_| "ok".to_string()),
        ["activity"] => cmd_activity(state, 20).map(|entries| render_activity(&entries)),
        ["activity", "clear"] => cmd_activity_clear(state).map(|_| "activity cleared".to_string()),
        ["activity", n] => {
            let n: i64 = n
                .parse()
                .map_err(|_| "E_ACTIVITY_LIMIT: activity takes a number".to_string())?;
            cmd_activity(state, n).map(|entries| render_activity(&entries))
        }
        ["help"] => Ok(HELP.to_string()),
        [] => Ok(String::new()),
        _ => Err(format!(
            "E_COMMAND_UNKNOWN: unrecognized command '{}' (try 'help')",
            parts.join(" ")
        )),
    }
}

fn render_status(snap: &StatusSnapshot) -> String {
    let mut out = String::new();
    for slot in &snap.slots {
        let line = match slot.state.as_str() {
            "idle" => format!("{:<8} idle", slot.action.as_str()),
            state => {
                let mut line = format!(
                    "{:<8} {state}  {}",
                    slot.action.as_str(),
                    slot.url.as_deref().unwrap_or("")
                );
                if let Some(p) = slot.progress {
                    line.push_str(&format!("  {p:.1}%"));
                }
                line
            }
        };
        out.push_str(&line);
        out.push('\n');
    }
    out.push_str(&format!("timer    {}", snap.timer));
    out
}

// The terminal stand-in for the GUI's ticking timer label.
fn watch(state: &AppState, secs: u64) -> String {
    for _ in 0..secs {
        let snap = cmd_status(state);
        println!("{}", render_status(&snap));
        println!();
        if !state.controller.any_running() {
            break;
        }
        std::thread::sleep(Duration::from_secs(1));
    }
    String::new()
}

fn render_history(items: &[HistoryItem]) -> String {
    if items.is_empty() {
        return "no history".to_string();
    }
    let now = now_ms();
    items
        .iter()
        .map(|i| {
            format!(
                "[{} {}] {}",
                i.action,
                format_age(now.saturating_sub(i.last_used_ms)),
                i.url
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn render_links(links: &[SavedLink]) -> String {
    if links.is_empty() {
        return "no saved links".to_string();
    }
    links
        .iter()
        .map(|l| format!("{}: {}", l.id, l.url))
        .collect::<Vec<_>>()
        .join("\n")
}

fn render_search(r: &SearchResults) -> String {
    let mut out = String::new();
    if r.live_count > 0 {
        out.push_str(&format!(
            "{} live space(s) from @{}\n",
            r.live_count, r.query
        ));
    }
    let now = now_ms();
    for s in &r.spaces {
        let marker = if s.live { "LIVE " } else { "" };
        out.push_str(&format!(
            "{}{} ({} listeners, {})\n  {}\n",
            marker,
            s.title,
            s.participants,
            format_age(now.saturating_sub(s.started_ms)),
            s.url
        ));
    }
    out.trim_end().to_string()
}

fn render_downloads(entries: &[DownloadEntry]) -> String {
    if entries.is_empty() {
        return "no recordings yet".to_string();
    }
    entries
        .iter()
        .map(|e| format!("{}  {}", format_size(e.size_bytes), e.name))
        .collect::<Vec<_>>()
        .join("\n")
}

fn render_settings(s: &Settings) -> String {
    format!(
        "save_path     {}\nscript_dir    {}\nrecorder      {}\nhistory_limit {}",
        s.save_path_buf().display(),
        recorder::script_dir(s).display(),
        s.recorder_bin.as_deref().unwrap_or(recorder::DEFAULT_RECORDER_BIN),
        s.history_limit_or_default()
    )
}

fn render_activity(entries: &[ActivityEntry]) -> String {
    if entries.is_empty() {
        return "no activity".to_string();
    }
    let now = now_ms();
    entries
        .iter()
        .map(|e| {
            let url = e.url.as_deref().map(|u| format!(" {u}")).unwrap_or_default();
            format!(
                "[{}] {}: {}{}",
                format_age(now.saturating_sub(e.ts_ms)),
                e.action,
                e.details,
                url
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn now_ms() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

fn format_age(delta_ms: i64) -> String {
    let secs = delta_ms / 1000;
    if secs < 60 {
        format!("{secs}s ago")
    } else if secs < 3600 {
        format!("{}m ago", secs / 60)
    } else if secs < 86_400 {
        format!("{}h ago", secs / 3600)
    } else {
        format!("{}d ago", secs / 86_400)
    }
}

fn format_size(bytes: u64) -> String {
    const KIB: u64 = 1024;
    const MIB: u64 = KIB * 1024;
    const GIB: u64 = MIB * 1024;
    if bytes >= GIB {
        format!("{:.1} GiB", bytes as f64 / GIB as f64)
    } else if bytes >= MIB {
        format!("{:.1} MiB", bytes as f64 / MIB as f64)
    } else if bytes >= KIB {
        format!("{:.1} KiB", bytes as f64 / KIB as f64)
    } else {
        format!("{bytes} B")
    }
}

fn repl(state: &AppState) -> Result<()> {
    println!("spacedeck: control panel for live audio Spaces");
    println!("type 'help' for commands");
    let stdin = std::io::stdin();
    let mut line = String::new();
    loop {
        print!("> ");
        std::io::stdout().flush().ok();
        line.clear();
        let n = stdin.read_line(&mut line).context("read from stdin failed")?;
        if n == 0 {
            break;
        }
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.is_empty() {
            continue;
        }
        if matches!(parts[0], "quit" | "exit") {
            break;
        }
        match dispatch(state, &parts) {
            Ok(out) => {
                if !out.is_empty() {
                    println!("{out}");
                }
            }
            Err(e) => println!("error: {e}"),
        }
    }
    // leave nothing of ours behind
    if let Err(e) = state.controller.stop_all() {
        crate::safe_eprintln!("stop_all on quit failed: {e:#}");
    }
    Ok(())
}

pub fn run() -> Result<()> {
    startup_trace::mark_best_effort("run_enter");
    panic_log::install_best_effort();
    startup_trace::mark_best_effort("panic_hook_installed");

    let dir = data_dir::data_dir()?;
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("create data dir failed: {}", dir.display()))?;
    let state = AppState::new(dir);
    startup_trace::mark_best_effort("state_ready");

    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.is_empty() {
        return repl(&state);
    }
    let parts: Vec<&str> = args.iter().map(String::as_str).collect();
    match dispatch(&state, &parts) {
        Ok(out) => {
            if !out.is_empty() {
                println!("{out}");
            }
            Ok(())
        }
        Err(e) => {
            crate::safe_eprintln!("error: {e}");
            std::process::exit(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_state(td: &tempfile::TempDir) -> AppState {
        AppState::new(td.path().to_path_buf())
    }

    #[test]
    fn dispatch_rejects_unknown_commands_and_actions() {
        let td = tempfile::tempdir().expect("tempdir");
        let state = test_state(&td);

        let err = dispatch(&state, &["frobnicate"]).expect_err("unknown command");
        assert!(err.contains("E_COMMAND_UNKNOWN"));

        let err = dispatch(&state, &["start", "download", "https://x.com/i/spaces/1a"])
            .expect_err("unknown action");
        assert!(err.contains("E_ACTION_UNKNOWN"));

        let err = dispatch(&state, &["pause", "everything"]).expect_err("unknown action");
        assert!(err.contains("E_ACTION_UNKNOWN"));
    }

    #[test]
    fn start_without_url_or_pasted_link_fails() {
        let td = tempfile::tempdir().expect("tempdir");
        let state = test_state(&td);
        let err = dispatch(&state, &["start", "record"]).expect_err("no url anywhere");
        assert!(err.contains("E_URL_REQUIRED"));
    }

    #[test]
    fn stop_idle_everything_is_fine() {
        let td = tempfile::tempdir().expect("tempdir");
        let state = test_state(&td);
        assert_eq!(dispatch(&state, &["stop"]).expect("stop"), "stopped");
        assert_eq!(
            dispatch(&state, &["stop", "record"]).expect("stop record"),
            "stopped"
        );
    }

    #[test]
    fn status_renders_idle_slots_and_zero_timer() {
        let td = tempfile::tempdir().expect("tempdir");
        let state = test_state(&td);
        let out = dispatch(&state, &["status"]).expect("status");
        for action in ["listen", "record", "youtube", "archive"] {
            assert!(out.contains(action), "missing {action} in {out}");
        }
        assert!(out.contains("idle"));
        assert!(out.contains("00:00:00"));
    }

    #[test]
    fn links_round_trip_through_dispatch() {
        let td = tempfile::tempdir().expect("tempdir");
        let state = test_state(&td);

        assert_eq!(dispatch(&state, &["links"]).expect("empty"), "no saved links");
        dispatch(&state, &["links", "add", "monday", "https://x.com/i/spaces/1aaa"])
            .expect("add");
        let out = dispatch(&state, &["links"]).expect("list");
        assert!(out.contains("monday: https://x.com/i/spaces/1aaa"));

        let err = dispatch(&state, &["links", "add", "monday", "https://x.com/i/spaces/1bbb"])
            .expect_err("duplicate");
        assert!(err.contains("E_LINK_EXISTS"));

        assert_eq!(
            dispatch(&state, &["links", "rm", "monday"]).expect("rm"),
            "removed 'monday'"
        );
    }

    #[test]
    fn settings_set_and_render() {
        let td = tempfile::tempdir().expect("tempdir");
        let state = test_state(&td);

        let out = dispatch(&state, &["set", "history_limit", "10"]).expect("set");
        assert!(out.contains("history_limit 10"));
        let out = dispatch(&state, &["set", "save_path", "/tmp/spaces-out"]).expect("set");
        assert!(out.contains("/tmp/spaces-out"));

        let err = dispatch(&state, &["set", "history_limit", "zero"]).expect_err("bad value");
        assert!(err.contains("E_SETTING_VALUE"));
        let err = dispatch(&state, &["set", "theme", "dark"]).expect_err("unknown key");
        assert!(err.contains("E_SETTING_UNKNOWN"));
    }

    #[test]
    fn search_renders_live_banner_and_urls() {
        let td = tempfile::tempdir().expect("tempdir");
        let state = test_state(&td);
        let out = dispatch(&state, &["search", "@molder"]).expect("search");
        assert!(out.contains("1 live space(s) from @molder"));
        assert!(out.contains("https://x.com/i/spaces/"));
        let err = dispatch(&state, &["search", "@"]).expect_err("empty query");
        assert!(err.contains("E_QUERY_EMPTY"));
    }

    #[test]
    fn age_and_size_formatting() {
        assert_eq!(format_age(5_000), "5s ago");
        assert_eq!(format_age(120_000), "2m ago");
        assert_eq!(format_age(7_200_000), "2h ago");
        assert_eq!(format_age(172_800_000), "2d ago");
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(2048), "2.0 KiB");
        assert_eq!(format_size(5 * 1024 * 1024), "5.0 MiB");
    }
}
