use super::{CommChannel, Message};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Appends every message as one JSON line to a file. Write failures are
/// swallowed; the log observes execution and must never stall it. Never
/// signals termination.
#[derive(Debug, Clone)]
pub struct MessageLog {
    path: PathBuf,
}

impl MessageLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CommChannel for MessageLog {
    fn send(&self, message: Message) {
        let Ok(line) = serde_json::to_string(&message) else {
            return;
        };
        if let Some(parent) = self.path.parent() {
            let _ = fs::create_dir_all(parent);
        }
        let _ = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .and_then(|mut file| writeln!(file, "{line}"));
    }

    fn termination_requested(&self) -> bool {
        false
    }
}
