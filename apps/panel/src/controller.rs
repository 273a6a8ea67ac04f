use std::{
    collections::HashMap,
    io::BufRead,
    path::{Path, PathBuf},
    process::{Child, Command, Stdio},
    sync::{Arc, Mutex},
    time::{Duration, Instant, SystemTime, UNIX_EPOCH},
};

use anyhow::{bail, Context, Result};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::recorder::{self, LaunchPlan};
use crate::timer::SharedTimer;
use crate::{activity, history, metrics, trace};

pub const DB_FILE: &str = "panel.sqlite3";

// How long a stopped recorder gets to exit on SIGTERM before SIGKILL.
const STOP_GRACE: Duration = Duration::from_secs(2);
const STOP_WAIT_MAX: Duration = Duration::from_secs(6);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Listen,
    Record,
    Youtube,
    Archive,
}

pub const ACTIONS: [Action; 4] = [
    Action::Listen,
    Action::Record,
    Action::Youtube,
    Action::Archive,
];

impl Action {
    pub fn as_str(self) -> &'static str {
        match self {
            Action::Listen => "listen",
            Action::Record => "record",
            Action::Youtube => "youtube",
            Action::Archive => "archive",
        }
    }

    pub fn parse(s: &str) -> Option<Action> {
        match s.trim().to_ascii_lowercase().as_str() {
            "listen" => Some(Action::Listen),
            "record" => Some(Action::Record),
            "youtube" => Some(Action::Youtube),
            "archive" => Some(Action::Archive),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct JobEvent {
    pub job_id: String,
    pub action: String,
    pub status: String, // started|paused|resumed|stopped|completed|failed
    pub message: String,
    pub exit_code: Option<i32>,
    pub error_code: Option<String>,
    pub elapsed_ms: Option<u128>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SlotView {
    pub action: Action,
    pub state: String, // idle|running|paused
    pub job_id: Option<String>,
    pub url: Option<String>,
    pub pid: Option<u32>,
    pub progress: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub slots: Vec<SlotView>,
    pub timer: String,
    pub timer_engaged: bool,
}

pub struct StartOpts {
    pub plan: LaunchPlan,
    pub history_limit: i64,
}

// Seam for the actual OS spawn so the lifecycle logic is testable without a
// recorder binary on disk.
pub trait Spawner: Send + Sync {
    fn spawn(&self, plan: &LaunchPlan) -> Result<Child>;
}

pub struct RecorderSpawner;

impl Spawner for RecorderSpawner {
    fn spawn(&self, plan: &LaunchPlan) -> Result<Child> {
        let mut cmd = Command::new(&plan.program);
        cmd.args(&plan.args)
            .current_dir(&plan.cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        for (k, v) in &plan.envs {
            cmd.env(k, v);
        }
        cmd.spawn()
            .with_context(|| format!("failed to launch {}", plan.program.display()))
    }
}

pub trait EventSink: Send + Sync {
    fn emit(&self, ev: &JobEvent);
}

// Default sink: the panel has no window to post to, so transitions land on
// stderr; the REPL renders current state from status() on demand.
pub struct LogSink;

impl EventSink for LogSink {
    fn emit(&self, ev: &JobEvent) {
        crate::safe_eprintln!("[{}] {}: {}", ev.action, ev.status, ev.message);
    }
}

type HistoryFn = fn(&Path, &str, &str, i64) -> Result<()>;
type ActivityFn = fn(&Path, &str, &str, Option<&str>) -> Result<()>;
type MetricsFn = fn(&Path, &serde_json::Value) -> Result<()>;

#[derive(Clone)]
struct ControllerDeps {
    history_append: HistoryFn,
    activity_append: ActivityFn,
    metrics_append: MetricsFn,
}

impl Default for ControllerDeps {
    fn default() -> Self {
        Self {
            history_append: history::append,
            activity_append: activity::append,
            metrics_append: metrics::append_jsonl::<serde_json::Value>,
        }
    }
}

#[derive(Clone)]
struct Job {
    job_id: String,
    url: String,
    pid: u32,
    paused: bool,
    progress: Arc<Mutex<Option<f64>>>,
    token: CancellationToken,
}

// One slot per action, each holding at most one live recorder process. All
// teardown goes through the owned pid: no pattern matching against process
// names, which would reach far beyond what this controller launched.
#[derive(Clone)]
pub struct Controller {
    slots: Arc<Mutex<HashMap<Action, Job>>>,
    timer: SharedTimer,
    spawner: Arc<dyn Spawner>,
    sink: Arc<dyn EventSink>,
    deps: ControllerDeps,
    data_dir: PathBuf,
}

impl Controller {
    pub fn new(data_dir: PathBuf) -> Self {
        Self::with_components(
            Arc::new(RecorderSpawner),
            Arc::new(LogSink),
            ControllerDeps::default(),
            data_dir,
        )
    }

    fn with_components(
        spawner: Arc<dyn Spawner>,
        sink: Arc<dyn EventSink>,
        deps: ControllerDeps,
        data_dir: PathBuf,
    ) -> Self {
        Self {
            slots: Arc::new(Mutex::new(HashMap::new())),
            timer: SharedTimer::new(),
            spawner,
            sink,
            deps,
            data_dir,
        }
    }

    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join(DB_FILE)
    }

    pub fn timer(&self) -> &SharedTimer {
        &self.timer
    }

    pub fn start(&self, action: Action, url: &str, opts: StartOpts) -> Result<String> {
        let url = url.trim();
        if url.is_empty() {
            bail!("E_URL_REQUIRED: paste a Space link first");
        }
        if !recorder::is_space_url(url) {
            bail!("E_URL_INVALID: not a Space link: {url}");
        }

        let job_id = Uuid::new_v4().to_string();
        trace::event(
            &self.data_dir,
            Some(&job_id),
            "Controller",
            "JOB.start",
            "ok",
            Some(serde_json::json!({"action": action.as_str()})),
        );

        let (pid, child, token, started_at_ms) = {
            let mut g = self.slots.lock().unwrap();
            if g.contains_key(&action) {
                bail!(
                    "E_SLOT_BUSY: another {} job is already running",
                    action.as_str()
                );
            }

            let mut child = match self.spawner.spawn(&opts.plan) {
                Ok(c) => c,
                Err(e) => {
                    drop(g);
                    emit_event(
                        self.sink.as_ref(),
                        self.deps.metrics_append,
                        &self.data_dir,
                        JobEvent {
                            job_id: job_id.clone(),
                            action: action.as_str().to_string(),
                            status: "failed".to_string(),
                            message: format!("{e:#}"),
                            exit_code: None,
                            error_code: Some("E_SPAWN_FAILED".to_string()),
                            elapsed_ms: None,
                        },
                    );
                    return Err(e.context(format!(
                        "E_SPAWN_FAILED: could not launch the recorder for {}",
                        action.as_str()
                    )));
                }
            };

            let pid = child.id();
            let progress = Arc::new(Mutex::new(None));
            scan_output(&mut child, &progress);
            let token = CancellationToken::new();
            let started_at_ms = now_ms();
            g.insert(
                action,
                Job {
                    job_id: job_id.clone(),
                    url: url.to_string(),
                    pid,
                    paused: false,
                    progress,
                    token: token.clone(),
                },
            );
            (pid, child, token, started_at_ms)
        };
        self.sync_timer();

        if let Err(e) = (self.deps.history_append)(
            &self.db_path(),
            url,
            action.as_str(),
            opts.history_limit,
        ) {
            crate::safe_eprintln!("history append failed: {e:#}");
        }
        if let Err(e) = (self.deps.activity_append)(
            &self.db_path(),
            &format!("{}_start", action.as_str()),
            "job started",
            Some(url),
        ) {
            crate::safe_eprintln!("activity append failed: {e:#}");
        }
        emit_event(
            self.sink.as_ref(),
            self.deps.metrics_append,
            &self.data_dir,
            JobEvent {
                job_id: job_id.clone(),
                action: action.as_str().to_string(),
                status: "started".to_string(),
                message: url.to_string(),
                exit_code: None,
                error_code: None,
                elapsed_ms: None,
            },
        );

        self.supervise(action, job_id.clone(), pid, child, token, started_at_ms);
        Ok(job_id)
    }

    // Stopping an idle slot is a no-op. Otherwise the supervise task tears the
    // process down and clears the slot; wait for that so callers observe idle.
    pub fn stop(&self, action: Action) -> Result<()> {
        let job = {
            let g = self.slots.lock().unwrap();
            g.get(&action)
                .map(|j| (j.job_id.clone(), j.pid, j.token.clone()))
        };
        let Some((job_id, pid, token)) = job else {
            trace::event(
                &self.data_dir,
                None,
                "Controller",
                "JOB.stop",
                "skipped",
                Some(serde_json::json!({"action": action.as_str()})),
            );
            return Ok(());
        };
        trace::event(
            &self.data_dir,
            Some(&job_id),
            "Controller",
            "JOB.stop",
            "ok",
            Some(serde_json::json!({"action": action.as_str()})),
        );
        token.cancel();

        let t0 = Instant::now();
        while t0.elapsed() < STOP_WAIT_MAX {
            let gone = {
                let g = self.slots.lock().unwrap();
                !matches!(g.get(&action), Some(j) if j.job_id == job_id)
            };
            if gone {
                self.sync_timer();
                return Ok(());
            }
            std::thread::sleep(Duration::from_millis(20));
        }

        // The supervise task is stuck or never ran; reclaim the slot so the
        // panel does not wedge.
        let _ = kill_pid(pid);
        {
            let mut g = self.slots.lock().unwrap();
            if g.get(&action).map(|j| j.job_id == job_id).unwrap_or(false) {
                g.remove(&action);
            }
        }
        self.sync_timer();
        trace::event(
            &self.data_dir,
            Some(&job_id),
            "Controller",
            "JOB.stop_forced",
            "err",
            Some(serde_json::json!({"action": action.as_str()})),
        );
        Ok(())
    }

    pub fn stop_all(&self) -> Result<()> {
        let mut first_err = None;
        for action in ACTIONS {
            if let Err(e) = self.stop(action) {
                crate::safe_eprintln!("stop {} failed: {e:#}", action.as_str());
                if first_err.is_none() {
                    first_err = Some(e);
                }
            }
        }
        match first_err {
            None => Ok(()),
            Some(e) => Err(e),
        }
    }

    // Pause suspends the recorder process and freezes the shared clock; the
    // job stays in its slot until resumed or stopped.
    pub fn pause(&self, action: Action) -> Result<()> {
        let (job_id, url) = {
            let mut g = self.slots.lock().unwrap();
            let Some(job) = g.get_mut(&action) else {
                bail!("E_NOT_RUNNING: no {} job to pause", action.as_str());
            };
            if job.paused {
                bail!(
                    "E_ALREADY_PAUSED: the {} job is already paused",
                    action.as_str()
                );
            }
            signal_pid(job.pid, "STOP")
                .context("E_PAUSE_FAILED: could not suspend the recorder")?;
            job.paused = true;
            (job.job_id.clone(), job.url.clone())
        };
        self.sync_timer();
        if let Err(e) = (self.deps.activity_append)(
            &self.db_path(),
            &format!("{}_pause", action.as_str()),
            "job paused",
            Some(&url),
        ) {
            crate::safe_eprintln!("activity append failed: {e:#}");
        }
        emit_event(
            self.sink.as_ref(),
            self.deps.metrics_append,
            &self.data_dir,
            JobEvent {
                job_id,
                action: action.as_str().to_string(),
                status: "paused".to_string(),
                message: url,
                exit_code: None,
                error_code: None,
                elapsed_ms: None,
            },
        );
        Ok(())
    }

    pub fn resume(&self, action: Action) -> Result<()> {
        let (job_id, url) = {
            let mut g = self.slots.lock().unwrap();
            let Some(job) = g.get_mut(&action) else {
                bail!("E_NOT_RUNNING: no {} job to resume", action.as_str());
            };
            if !job.paused {
                bail!("E_NOT_PAUSED: the {} job is not paused", action.as_str());
            }
            signal_pid(job.pid, "CONT")
                .context("E_RESUME_FAILED: could not resume the recorder")?;
            job.paused = false;
            (job.job_id.clone(), job.url.clone())
        };
        self.sync_timer();
        if let Err(e) = (self.deps.activity_append)(
            &self.db_path(),
            &format!("{}_resume", action.as_str()),
            "job resumed",
            Some(&url),
        ) {
            crate::safe_eprintln!("activity append failed: {e:#}");
        }
        emit_event(
            self.sink.as_ref(),
            self.deps.metrics_append,
            &self.data_dir,
            JobEvent {
                job_id,
                action: action.as_str().to_string(),
                status: "resumed".to_string(),
                message: url,
                exit_code: None,
                error_code: None,
                elapsed_ms: None,
            },
        );
        Ok(())
    }

    pub fn is_running(&self, action: Action) -> bool {
        self.slots.lock().unwrap().contains_key(&action)
    }

    pub fn any_running(&self) -> bool {
        !self.slots.lock().unwrap().is_empty()
    }

    pub fn status(&self) -> StatusSnapshot {
        let g = self.slots.lock().unwrap();
        let slots = ACTIONS
            .iter()
            .map(|a| match g.get(a) {
                Some(j) => SlotView {
                    action: *a,
                    state: if j.paused { "paused" } else { "running" }.to_string(),
                    job_id: Some(j.job_id.clone()),
                    url: Some(j.url.clone()),
                    pid: Some(j.pid),
                    progress: *j.progress.lock().unwrap(),
                },
                None => SlotView {
                    action: *a,
                    state: "idle".to_string(),
                    job_id: None,
                    url: None,
                    pid: None,
                    progress: None,
                },
            })
            .collect();
        drop(g);
        StatusSnapshot {
            slots,
            timer: self.timer.display(),
            timer_engaged: self.timer.is_engaged(),
        }
    }

    fn sync_timer(&self) {
        sync_slots_timer(&self.slots, &self.timer);
    }

    fn supervise(
        &self,
        action: Action,
        job_id: String,
        pid: u32,
        child: Child,
        token: CancellationToken,
        started_at_ms: i64,
    ) {
        let slots = self.slots.clone();
        let timer = self.timer.clone();
        let sink = self.sink.clone();
        let deps = self.deps.clone();
        let data_dir = self.data_dir.clone();
        let db_path = self.db_path();

        let spawned = std::thread::Builder::new()
            .name(format!("supervise_{}", action.as_str()))
            .spawn(move || {
                let outcome = run_supervise(child, pid, token);

                let cleared = {
                    let mut g = slots.lock().unwrap();
                    if g.get(&action).map(|j| j.job_id == job_id).unwrap_or(false) {
                        g.remove(&action);
                        true
                    } else {
                        false
                    }
                };
                sync_slots_timer(&slots, &timer);
                if !cleared {
                    return;
                }

                let (status, message, exit_code, error_code) = outcome.describe();
                trace::event(
                    &data_dir,
                    Some(&job_id),
                    "Controller",
                    "JOB.exit",
                    if error_code.is_some() { "err" } else { "ok" },
                    Some(serde_json::json!({
                        "action": action.as_str(),
                        "status": status,
                        "exit_code": exit_code,
                    })),
                );
                if let Err(e) = (deps.activity_append)(
                    &db_path,
                    &format!("{}_{}", action.as_str(), status),
                    &message,
                    None,
                ) {
                    crate::safe_eprintln!("activity append failed: {e:#}");
                }
                emit_event(
                    sink.as_ref(),
                    deps.metrics_append,
                    &data_dir,
                    JobEvent {
                        job_id,
                        action: action.as_str().to_string(),
                        status: status.to_string(),
                        message,
                        exit_code,
                        error_code,
                        elapsed_ms: Some(now_ms().saturating_sub(started_at_ms).max(0) as u128),
                    },
                );
            });
        if let Err(e) = spawned {
            crate::safe_eprintln!("failed to spawn supervise thread: {e}");
        }
    }
}

enum JobOutcome {
    Completed,
    Exited(Option<i32>),
    Stopped,
    Internal(String),
}

impl JobOutcome {
    fn describe(&self) -> (&'static str, String, Option<i32>, Option<String>) {
        match self {
            JobOutcome::Completed => ("completed", "recorder exited".to_string(), Some(0), None),
            JobOutcome::Exited(code) => (
                "failed",
                match code {
                    Some(c) => format!("recorder exited with status {c}"),
                    None => "recorder was killed by a signal".to_string(),
                },
                *code,
                Some("E_RECORDER_EXIT".to_string()),
            ),
            JobOutcome::Stopped => ("stopped", "stopped by user".to_string(), None, None),
            JobOutcome::Internal(msg) => (
                "failed",
                msg.clone(),
                None,
                Some("E_INTERNAL".to_string()),
            ),
        }
    }
}

// The supervise thread owns the child. It drives a small current-thread
// runtime so teardown can race process exit against cancellation without
// busy-polling.
fn run_supervise(mut child: Child, pid: u32, token: CancellationToken) -> JobOutcome {
    let rt = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            crate::safe_eprintln!("supervise: failed to create tokio runtime: {e}");
            let _ = child.kill();
            let _ = child.wait();
            return JobOutcome::Internal(format!("tokio_runtime_create_failed:{e}"));
        }
    };
    rt.block_on(async move {
        let mut waiter = tokio::task::spawn_blocking(move || child.wait());
        tokio::select! {
            res = &mut waiter => outcome_from_wait(res),
            _ = token.cancelled() => {
                // Graceful first; the pid is ours alone, never a name pattern.
                let _ = signal_pid(pid, "TERM");
                match tokio::time::timeout(STOP_GRACE, &mut waiter).await {
                    Ok(_) => JobOutcome::Stopped,
                    Err(_) => {
                        let _ = kill_pid(pid);
                        let _ = waiter.await;
                        JobOutcome::Stopped
                    }
                }
            }
        }
    })
}

fn outcome_from_wait(
    res: std::result::Result<std::io::Result<std::process::ExitStatus>, tokio::task::JoinError>,
) -> JobOutcome {
    match res {
        Ok(Ok(st)) if st.success() => JobOutcome::Completed,
        Ok(Ok(st)) => JobOutcome::Exited(st.code()),
        Ok(Err(e)) => JobOutcome::Internal(format!("wait_failed:{e}")),
        Err(e) => JobOutcome::Internal(format!("supervise_join_failed:{e}")),
    }
}

fn sync_slots_timer(slots: &Arc<Mutex<HashMap<Action, Job>>>, timer: &SharedTimer) {
    let (any_job, any_active) = {
        let g = slots.lock().unwrap();
        (!g.is_empty(), g.values().any(|j| !j.paused))
    };
    timer.apply(any_job, any_active);
}

// Watch the recorder's output for a "NN.N%" progress figure; everything else
// is the recorder's own business.
fn scan_output(child: &mut Child, progress: &Arc<Mutex<Option<f64>>>) {
    if let Some(out) = child.stdout.take() {
        spawn_line_scanner(Box::new(out), progress.clone());
    }
    if let Some(err) = child.stderr.take() {
        spawn_line_scanner(Box::new(err), progress.clone());
    }
}

fn spawn_line_scanner(
    stream: Box<dyn std::io::Read + Send>,
    progress: Arc<Mutex<Option<f64>>>,
) {
    let _ = std::thread::Builder::new()
        .name("recorder_output".to_string())
        .spawn(move || {
            let reader = std::io::BufReader::new(stream);
            for line in reader.lines() {
                let Ok(line) = line else { break };
                if let Some(p) = recorder::parse_progress_percent(&line) {
                    *progress.lock().unwrap() = Some(p);
                }
            }
        });
}

fn emit_event(sink: &dyn EventSink, metrics_append: MetricsFn, data_dir: &Path, ev: JobEvent) {
    sink.emit(&ev);
    if let Err(e) = metrics_append(
        data_dir,
        &serde_json::json!({
            "type": "job_event",
            "job_id": ev.job_id,
            "action": ev.action,
            "status": ev.status,
            "message": ev.message,
            "exit_code": ev.exit_code,
            "error_code": ev.error_code,
            "elapsed_ms": ev.elapsed_ms,
        }),
    ) {
        crate::safe_eprintln!("metrics append failed (job_event): {e:#}");
    }
}

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[cfg(unix)]
fn signal_pid(pid: u32, sig: &str) -> Result<()> {
    let status = Command::new("kill")
        .args([format!("-{sig}"), pid.to_string()])
        .status()
        .context("kill failed")?;
    if !status.success() {
        bail!("kill -{sig} exit={status}");
    }
    Ok(())
}

#[cfg(windows)]
fn signal_pid(pid: u32, sig: &str) -> Result<()> {
    match sig {
        "TERM" => kill_pid(pid),
        _ => bail!("signal {sig} is not supported on this platform"),
    }
}

#[cfg(unix)]
fn kill_pid(pid: u32) -> Result<()> {
    let status = Command::new("kill")
        .args(["-9", &pid.to_string()])
        .status()
        .context("kill failed")?;
    if !status.success() {
        bail!("kill exit={status}");
    }
    Ok(())
}

#[cfg(windows)]
fn kill_pid(pid: u32) -> Result<()> {
    let status = Command::new("taskkill")
        .args(["/PID", &pid.to_string(), "/T", "/F"])
        .status()
        .context("taskkill failed")?;
    if !status.success() {
        bail!("taskkill exit={status}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_parsing() {
        assert_eq!(Action::parse("record"), Some(Action::Record));
        assert_eq!(Action::parse("  YouTube "), Some(Action::Youtube));
        assert_eq!(Action::parse("download"), None);
        assert_eq!(Action::parse(""), None);
    }

    #[test]
    fn outcome_descriptions_carry_codes() {
        let (status, _, exit, code) = JobOutcome::Exited(Some(3)).describe();
        assert_eq!(status, "failed");
        assert_eq!(exit, Some(3));
        assert_eq!(code.as_deref(), Some("E_RECORDER_EXIT"));

        let (status, _, _, code) = JobOutcome::Stopped.describe();
        assert_eq!(status, "stopped");
        assert!(code.is_none());
    }
}

#[cfg(all(test, unix))]
mod process_tests {
    use super::*;

    const SPACE_URL: &str = "https://x.com/i/spaces/1abcXYZ";

    struct ShellSpawner(&'static str);

    impl Spawner for ShellSpawner {
        fn spawn(&self, _plan: &LaunchPlan) -> Result<Child> {
            Command::new("sh")
                .args(["-c", self.0])
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .spawn()
                .context("spawn test child failed")
        }
    }

    struct FailingSpawner;

    impl Spawner for FailingSpawner {
        fn spawn(&self, _plan: &LaunchPlan) -> Result<Child> {
            Command::new("/definitely/not/a/recorder")
                .spawn()
                .context("failed to launch /definitely/not/a/recorder")
        }
    }

    #[derive(Clone, Default)]
    struct CollectSink {
        events: Arc<Mutex<Vec<JobEvent>>>,
    }

    impl EventSink for CollectSink {
        fn emit(&self, ev: &JobEvent) {
            self.events.lock().unwrap().push(ev.clone());
        }
    }

    fn nop_history(_: &Path, _: &str, _: &str, _: i64) -> Result<()> {
        Ok(())
    }

    fn nop_activity(_: &Path, _: &str, _: &str, _: Option<&str>) -> Result<()> {
        Ok(())
    }

    fn nop_metrics(_: &Path, _: &serde_json::Value) -> Result<()> {
        Ok(())
    }

    fn test_deps() -> ControllerDeps {
        ControllerDeps {
            history_append: nop_history,
            activity_append: nop_activity,
            metrics_append: nop_metrics,
        }
    }

    fn controller_with(script: &'static str, td: &tempfile::TempDir) -> (Controller, CollectSink) {
        let sink = CollectSink::default();
        let c = Controller::with_components(
            Arc::new(ShellSpawner(script)),
            Arc::new(sink.clone()),
            test_deps(),
            td.path().to_path_buf(),
        );
        (c, sink)
    }

    fn dummy_opts(td: &tempfile::TempDir) -> StartOpts {
        StartOpts {
            plan: LaunchPlan {
                program: "unused".into(),
                args: Vec::new(),
                cwd: td.path().to_path_buf(),
                envs: Vec::new(),
            },
            history_limit: 10,
        }
    }

    fn wait_until_idle(c: &Controller, action: Action, max: Duration) -> bool {
        let t0 = Instant::now();
        while t0.elapsed() < max {
            if !c.is_running(action) && !c.timer().is_engaged() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(20));
        }
        false
    }

    // Terminal events are emitted from the supervise thread shortly after the
    // slot clears; poll instead of asserting immediately.
    fn wait_for_status(sink: &CollectSink, status: &str, max: Duration) -> bool {
        let t0 = Instant::now();
        while t0.elapsed() < max {
            if sink
                .events
                .lock()
                .unwrap()
                .iter()
                .any(|e| e.status == status)
            {
                return true;
            }
            std::thread::sleep(Duration::from_millis(20));
        }
        false
    }

    #[test]
    fn start_and_stop_one_slot() {
        let td = tempfile::tempdir().expect("tempdir");
        let (c, sink) = controller_with("sleep 30", &td);

        c.start(Action::Record, SPACE_URL, dummy_opts(&td))
            .expect("start");
        assert!(c.is_running(Action::Record));
        assert!(!c.is_running(Action::Listen));
        assert!(c.timer().is_engaged());

        c.stop(Action::Record).expect("stop");
        assert!(!c.is_running(Action::Record));
        assert!(!c.any_running());
        assert_eq!(c.timer().display(), "00:00:00");

        assert!(wait_for_status(&sink, "stopped", Duration::from_secs(2)));
        let statuses: Vec<String> = sink
            .events
            .lock()
            .unwrap()
            .iter()
            .map(|e| e.status.clone())
            .collect();
        assert_eq!(statuses.first().map(String::as_str), Some("started"));
    }

    #[test]
    fn stop_idle_slot_is_noop() {
        let td = tempfile::tempdir().expect("tempdir");
        let (c, sink) = controller_with("sleep 30", &td);
        c.stop(Action::Listen).expect("stop idle");
        assert!(sink.events.lock().unwrap().is_empty());
    }

    #[test]
    fn slots_are_independent_and_stop_all_clears_them() {
        let td = tempfile::tempdir().expect("tempdir");
        let (c, _sink) = controller_with("sleep 30", &td);

        c.start(Action::Listen, SPACE_URL, dummy_opts(&td))
            .expect("start listen");
        c.start(Action::Archive, SPACE_URL, dummy_opts(&td))
            .expect("start archive");
        assert!(c.is_running(Action::Listen));
        assert!(c.is_running(Action::Archive));
        assert!(!c.is_running(Action::Record));

        c.stop(Action::Listen).expect("stop listen");
        assert!(!c.is_running(Action::Listen));
        assert!(c.is_running(Action::Archive));
        assert!(c.timer().is_engaged());

        c.stop_all().expect("stop all");
        for action in ACTIONS {
            assert!(!c.is_running(action));
        }
        assert_eq!(c.timer().display(), "00:00:00");
    }

    #[test]
    fn start_rejects_bad_urls_and_busy_slot() {
        let td = tempfile::tempdir().expect("tempdir");
        let (c, _sink) = controller_with("sleep 30", &td);

        let err = c
            .start(Action::Listen, "  ", dummy_opts(&td))
            .expect_err("empty url");
        assert!(err.to_string().contains("E_URL_REQUIRED"));

        let err = c
            .start(Action::Listen, "https://example.com/x", dummy_opts(&td))
            .expect_err("invalid url");
        assert!(err.to_string().contains("E_URL_INVALID"));

        c.start(Action::Listen, SPACE_URL, dummy_opts(&td))
            .expect("start");
        let err = c
            .start(Action::Listen, SPACE_URL, dummy_opts(&td))
            .expect_err("busy slot");
        assert!(err.to_string().contains("E_SLOT_BUSY"));

        c.stop(Action::Listen).expect("stop");
    }

    #[test]
    fn spawn_failure_leaves_slot_idle() {
        let td = tempfile::tempdir().expect("tempdir");
        let sink = CollectSink::default();
        let c = Controller::with_components(
            Arc::new(FailingSpawner),
            Arc::new(sink.clone()),
            test_deps(),
            td.path().to_path_buf(),
        );

        let err = c
            .start(Action::Record, SPACE_URL, dummy_opts(&td))
            .expect_err("spawn must fail");
        assert!(err.to_string().contains("E_SPAWN_FAILED"));
        assert!(!c.is_running(Action::Record));
        assert!(!c.timer().is_engaged());

        let events = sink.events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].status, "failed");
        assert_eq!(events[0].error_code.as_deref(), Some("E_SPAWN_FAILED"));
    }

    #[test]
    fn process_exit_clears_the_slot() {
        let td = tempfile::tempdir().expect("tempdir");
        let (c, sink) = controller_with("exit 0", &td);

        c.start(Action::Youtube, SPACE_URL, dummy_opts(&td))
            .expect("start");
        assert!(wait_until_idle(&c, Action::Youtube, Duration::from_secs(3)));
        assert_eq!(c.timer().display(), "00:00:00");
        assert!(wait_for_status(&sink, "completed", Duration::from_secs(2)));
    }

    #[test]
    fn failing_process_reports_exit_code() {
        let td = tempfile::tempdir().expect("tempdir");
        let (c, sink) = controller_with("exit 3", &td);

        c.start(Action::Archive, SPACE_URL, dummy_opts(&td))
            .expect("start");
        assert!(wait_until_idle(&c, Action::Archive, Duration::from_secs(3)));
        assert!(wait_for_status(&sink, "failed", Duration::from_secs(2)));

        let events = sink.events.lock().unwrap();
        let failed = events
            .iter()
            .find(|e| e.status == "failed")
            .expect("failed event");
        assert_eq!(failed.exit_code, Some(3));
        assert_eq!(failed.error_code.as_deref(), Some("E_RECORDER_EXIT"));
    }

    #[test]
    fn progress_is_scanned_from_output() {
        let td = tempfile::tempdir().expect("tempdir");
        let (c, _sink) = controller_with("printf '[download]  12.5%% of 3MiB\\n'; sleep 30", &td);

        c.start(Action::Record, SPACE_URL, dummy_opts(&td))
            .expect("start");
        let t0 = Instant::now();
        let mut seen = None;
        while t0.elapsed() < Duration::from_secs(3) {
            seen = c
                .status()
                .slots
                .iter()
                .find(|s| s.action == Action::Record)
                .and_then(|s| s.progress);
            if seen.is_some() {
                break;
            }
            std::thread::sleep(Duration::from_millis(20));
        }
        assert_eq!(seen, Some(12.5));
        c.stop(Action::Record).expect("stop");
    }

    #[test]
    fn pause_freezes_clock_and_resume_continues() {
        let td = tempfile::tempdir().expect("tempdir");
        let (c, sink) = controller_with("sleep 30", &td);

        c.start(Action::Listen, SPACE_URL, dummy_opts(&td))
            .expect("start");
        std::thread::sleep(Duration::from_millis(50));

        c.pause(Action::Listen).expect("pause");
        let frozen = c.timer().elapsed();
        std::thread::sleep(Duration::from_millis(60));
        assert_eq!(c.timer().elapsed(), frozen);
        assert_eq!(c.status().slots[0].state, "paused");

        let err = c.pause(Action::Listen).expect_err("double pause");
        assert!(err.to_string().contains("E_ALREADY_PAUSED"));

        c.resume(Action::Listen).expect("resume");
        std::thread::sleep(Duration::from_millis(30));
        assert!(c.timer().elapsed() > frozen);

        c.stop(Action::Listen).expect("stop");
        assert!(wait_for_status(&sink, "paused", Duration::from_secs(1)));
        assert!(wait_for_status(&sink, "resumed", Duration::from_secs(1)));
    }

    #[test]
    fn pause_requires_a_running_job() {
        let td = tempfile::tempdir().expect("tempdir");
        let (c, _sink) = controller_with("sleep 30", &td);
        let err = c.pause(Action::Record).expect_err("idle pause");
        assert!(err.to_string().contains("E_NOT_RUNNING"));
        let err = c.resume(Action::Record).expect_err("idle resume");
        assert!(err.to_string().contains("E_NOT_RUNNING"));
    }
}
