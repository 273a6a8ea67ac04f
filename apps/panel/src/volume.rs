use std::process::Command;

use anyhow::{anyhow, Context, Result};

// Output-volume nudges go through the platform mixer utility, same as the
// GUI shells did. The step size matches them: 10 points per press.
const STEP_PERCENT: u32 = 10;

pub fn step(up: bool) -> Result<()> {
    run_mixer(MixerOp::Step { up })
}

pub fn toggle_mute() -> Result<()> {
    run_mixer(MixerOp::ToggleMute)
}

enum MixerOp {
    Step { up: bool },
    ToggleMute,
}

#[cfg(target_os = "macos")]
fn run_mixer(op: MixerOp) -> Result<()> {
    let script = match op {
        MixerOp::Step { up } => {
            let sign = if up { "+" } else { "-" };
            format!(
                "set volume output volume ((output volume of (get volume settings)) {sign} {STEP_PERCENT})"
            )
        }
        MixerOp::ToggleMute => {
            "set mute output muted to not output muted of (get volume settings)".to_string()
        }
    };
    let status = Command::new("osascript")
        .args(["-e", &script])
        .status()
        .context("osascript failed to start")?;
    if !status.success() {
        return Err(anyhow!("E_VOLUME_FAILED: osascript exit={status}"));
    }
    Ok(())
}

#[cfg(not(target_os = "macos"))]
fn run_mixer(op: MixerOp) -> Result<()> {
    let args: Vec<String> = match op {
        MixerOp::Step { up } => {
            let sign = if up { "+" } else { "-" };
            vec![
                "set-sink-volume".to_string(),
                "@DEFAULT_SINK@".to_string(),
                format!("{sign}{STEP_PERCENT}%"),
            ]
        }
        MixerOp::ToggleMute => vec![
            "set-sink-mute".to_string(),
            "@DEFAULT_SINK@".to_string(),
            "toggle".to_string(),
        ],
    };
    let status = Command::new("pactl")
        .args(&args)
        .status()
        .context("pactl failed to start")?;
    if !status.success() {
        return Err(anyhow!("E_VOLUME_FAILED: pactl exit={status}"));
    }
    Ok(())
}
