use anyhow::{anyhow, Result};

// Clipboard access backs the paste button (read a Space link into the URL
// field) and the share action (copy a link out).

pub fn read_text() -> Result<String> {
    let mut clipboard = arboard::Clipboard::new()
        .map_err(|e| anyhow!("E_CLIPBOARD_UNAVAILABLE: clipboard init failed: {e}"))?;
    let text = clipboard
        .get_text()
        .map_err(|e| anyhow!("E_CLIPBOARD_READ_FAILED: clipboard read failed: {e}"))?;
    let text = text.trim().to_string();
    if text.is_empty() {
        return Err(anyhow!("E_CLIPBOARD_EMPTY: the clipboard has no text"));
    }
    Ok(text)
}

pub fn copy_text(text: &str) -> Result<()> {
    if text.trim().is_empty() {
        return Err(anyhow!("E_COPY_EMPTY: empty text cannot be copied"));
    }
    let mut clipboard = arboard::Clipboard::new()
        .map_err(|e| anyhow!("E_CLIPBOARD_UNAVAILABLE: clipboard init failed: {e}"))?;
    clipboard
        .set_text(text.to_string())
        .map_err(|e| anyhow!("E_COPY_FAILED: clipboard write failed: {e}"))
}
