//! Archival handoff of finished run files.
//!
//! Submitting never blocks the session and the outcome never flows back into
//! run metadata; the child process is reaped on a detached task that only
//! logs its exit status.

use crate::config::ArchiveSettings;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{error, info, warn};

pub trait Archiver: Send + Sync {
    fn submit(&self, path: &Path);
}

/// Runs an external upload command with the container path appended.
pub struct CommandArchiver {
    program: String,
    args: Vec<String>,
}

impl CommandArchiver {
    /// `None` when `command` is empty.
    pub fn new(command: &[String]) -> Option<Self> {
        let (program, args) = command.split_first()?;
        Some(Self {
            program: program.clone(),
            args: args.to_vec(),
        })
    }
}

impl Archiver for CommandArchiver {
    fn submit(&self, path: &Path) {
        let spawned = Command::new(&self.program)
            .args(&self.args)
            .arg(path)
            .stdin(Stdio::null())
            .spawn();

        let mut child = match spawned {
            Ok(child) => child,
            Err(e) => {
                error!(program = %self.program, path = %path.display(), error = %e, "failed to start archival");
                return;
            }
        };

        let path = path.display().to_string();
        info!(path = %path, "archival started");
        tokio::spawn(async move {
            match child.wait().await {
                Ok(status) if status.success() => info!(path = %path, "archival finished"),
                Ok(status) => warn!(path = %path, %status, "archival command failed"),
                Err(e) => warn!(path = %path, error = %e, "archival process lost"),
            }
        });
    }
}

/// Used when archiving is disabled.
pub struct NoopArchiver;

impl Archiver for NoopArchiver {
    fn submit(&self, path: &Path) {
        info!(path = %path.display(), "archiving disabled, file left in place");
    }
}

/// Build the archiver described by `settings`.
pub fn from_settings(settings: &ArchiveSettings) -> Box<dyn Archiver> {
    match settings.enabled.then(|| CommandArchiver::new(&settings.command)).flatten() {
        Some(archiver) => Box::new(archiver),
        None => Box::new(NoopArchiver),
    }
}
