use anyhow::{Context, Result};
use chrono::Utc;
use serde_json::json;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use super::instance::InstanceId;

/// JSON-lines transcript of one instance's I/O and lifecycle
#[derive(Debug)]
pub struct Transcript {
    instance_id: InstanceId,
    path: PathBuf,
    file: File,
}

impl Transcript {
    /// Open `terminal-<id>.log` in `dir` for appending
    pub fn open(instance_id: InstanceId, dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir).context("Failed to create transcript directory")?;

        let path = dir.join(format!("terminal-{}.log", instance_id));
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .context("Failed to create transcript file")?;

        Ok(Self {
            instance_id,
            path,
            file,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn log_input(&mut self, data: &str) {
        self.write_entry(json!({ "direction": "in", "data": data }));
    }

    pub fn log_output(&mut self, data: &[u8]) {
        self.write_entry(json!({
            "direction": "out",
            "data": String::from_utf8_lossy(data),
        }));
    }

    pub fn log_resize(&mut self, cols: u16, rows: u16) {
        self.write_entry(json!({ "event": "resize", "cols": cols, "rows": rows }));
    }

    pub fn log_exit(&mut self, exit_code: i32) {
        self.write_entry(json!({ "event": "exit", "exit_code": exit_code }));
    }

    pub fn log_dispose(&mut self) {
        self.write_entry(json!({ "event": "dispose" }));
    }

    /// Transcript failures are logged and otherwise ignored
    fn write_entry(&mut self, mut entry: serde_json::Value) {
        entry["timestamp"] = json!(Utc::now().to_rfc3339());
        entry["terminal_id"] = json!(self.instance_id);

        let result = writeln!(self.file, "{}", entry).and_then(|_| self.file.flush());
        if let Err(e) = result {
            log::warn!(
                "Failed to write transcript {}: {}",
                self.path.display(),
                e
            );
        }
    }
}
