use std::{
    fs::OpenOptions,
    io::Write,
    time::{SystemTime, UNIX_EPOCH},
};

// Install a panic hook that never panics itself.
//
// The default hook prints to stderr, which may be closed when the panel is
// launched from a desktop shell; a failing write inside the hook turns one
// panic into an abort with no message. Log to the data dir instead,
// best-effort.
pub fn install_best_effort() {
    std::panic::set_hook(Box::new(|info| {
        let ts_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0);

        let bt = std::backtrace::Backtrace::force_capture();

        let msg = format!("ts_ms={ts_ms}\npanic={info}\nbacktrace={bt}\n---\n");

        if let Ok(dir) = crate::data_dir::data_dir() {
            let _ = std::fs::create_dir_all(&dir);
            let path = dir.join("panic.log");
            if let Ok(mut f) = OpenOptions::new().create(true).append(true).open(&path) {
                let _ = f.write_all(msg.as_bytes());
            }
        }
    }));
}
