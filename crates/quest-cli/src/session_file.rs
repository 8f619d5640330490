use std::io::ErrorKind;
use std::path::Path;

use anyhow::Context;
use tracing::{debug, warn};

use quest_client::Session;

/// Saved session from an earlier run, if any. An unreadable file is treated
/// as signed out.
pub fn load(path: &Path) -> anyhow::Result<Option<Session>> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e).with_context(|| format!("reading {}", path.display())),
    };

    match serde_json::from_str(&raw) {
        Ok(session) => Ok(Some(session)),
        Err(e) => {
            warn!("Ignoring unreadable session file {}: {}", path.display(), e);
            Ok(None)
        }
    }
}

pub fn save(path: &Path, session: &Session) -> anyhow::Result<()> {
    let raw = serde_json::to_string_pretty(session)?;
    std::fs::write(path, raw).with_context(|| format!("writing {}", path.display()))?;
    debug!("Saved session to {}", path.display());
    Ok(())
}

pub fn clear(path: &Path) -> anyhow::Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).with_context(|| format!("removing {}", path.display())),
    }
}
