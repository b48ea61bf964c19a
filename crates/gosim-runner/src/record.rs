//! Per-run provenance log.
//!
//! Plain text, one `key<padding>value` line per field, append-only:
//!
//! ```text
//! host      node042
//! user      ned
//! wdir      /home/ned/sims/run0003
//! exec      /home/ned/bin/sim
//! args      -
//! conf      /home/ned/sims/config.cym
//! pid       48213
//! start     Thu Oct 16 08:40:12 2026
//! status    0
//! stop      Thu Oct 16 09:12:57 2026
//! parked    Thu Oct 16 09:13:02 2026
//! ```
//!
//! Writes are best effort: a failed write is logged and the run carries on.

use crate::context::Identity;
use crate::process::ExitOutcome;
use chrono::Local;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::warn;

const KEY_WIDTH: usize = 10;

#[derive(Debug, Clone)]
pub struct RunRecorder {
    file_name: String,
    identity: Identity,
}

impl RunRecorder {
    pub fn new(file_name: impl Into<String>, identity: Identity) -> Self {
        Self {
            file_name: file_name.into(),
            identity,
        }
    }

    pub fn path(&self, working_dir: &Path) -> PathBuf {
        working_dir.join(&self.file_name)
    }

    /// Truncates the record and writes the start block.
    pub fn record_start(
        &self,
        working_dir: &Path,
        executable: &Path,
        args: &[String],
        config: &Path,
        pid: u32,
    ) {
        let fields = [
            ("host", self.identity.host.clone()),
            ("user", self.identity.user.clone()),
            ("wdir", working_dir.display().to_string()),
            ("exec", executable.display().to_string()),
            ("args", args.join(" ")),
            ("conf", config.display().to_string()),
            ("pid", pid.to_string()),
            ("start", timestamp()),
        ];
        self.write_best_effort(working_dir, &fields, false);
    }

    pub fn record_end(&self, working_dir: &Path, status: &ExitOutcome) {
        let fields = [("status", status.to_string()), ("stop", timestamp())];
        self.write_best_effort(working_dir, &fields, true);
    }

    pub fn record_parked(&self, working_dir: &Path) {
        self.write_best_effort(working_dir, &[("parked", timestamp())], true);
    }

    fn write_best_effort(&self, working_dir: &Path, fields: &[(&str, String)], append: bool) {
        let path = self.path(working_dir);
        if let Err(err) = write_fields(&path, fields, append) {
            warn!(record = %path.display(), error = %err, "could not write run record");
        }
    }
}

fn write_fields(path: &Path, fields: &[(&str, String)], append: bool) -> io::Result<()> {
    let mut file = fs::OpenOptions::new()
        .create(true)
        .write(true)
        .append(append)
        .truncate(!append)
        .open(path)?;
    let mut block = String::new();
    for (key, value) in fields {
        block.push_str(&format!("{:<width$}{}\n", key, value, width = KEY_WIDTH));
    }
    file.write_all(block.as_bytes())
}

fn timestamp() -> String {
    Local::now().format("%a %b %e %H:%M:%S %Y").to_string()
}

/// Read-side view of a record file, for key lookups.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunRecord {
    entries: Vec<(String, String)>,
}

impl RunRecord {
    pub fn load(path: &Path) -> io::Result<Self> {
        Ok(Self::parse(&fs::read_to_string(path)?))
    }

    pub fn parse(text: &str) -> Self {
        let entries = text
            .lines()
            .filter_map(|line| {
                let line = line.trim_end();
                let (key, value) = match line.split_once(char::is_whitespace) {
                    Some((key, value)) => (key, value.trim_start()),
                    None => (line, ""),
                };
                (!key.is_empty()).then(|| (key.to_string(), value.to_string()))
            })
            .collect();
        Self { entries }
    }

    /// Last value written for `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }
}
