//! Process plumbing between a shell and the instance that owns it.
//!
//! [`ProcessSpawner`] and [`ShellProcess`] are the seams to the OS process facility;
//! [`ProcessHandle`] is the instance-owned wrapper that tracks liveness and drops
//! writes aimed at a process that has already gone away.

use anyhow::Result;
use std::path::PathBuf;
use std::sync::mpsc::Sender;

use super::instance::InstanceId;
use super::launch::ShellLaunchSpec;

/// Notification from a running shell process
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessEvent {
    /// The OS reported the process id
    Ready { process_id: u32 },
    /// Raw bytes read from the process output
    Output(Vec<u8>),
    /// The process terminated
    Exited { exit_code: i32 },
    /// The process failed to start after the instance was created
    SpawnFailed(String),
}

/// A process event tagged with the instance it belongs to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessMessage {
    pub instance_id: InstanceId,
    pub event: ProcessEvent,
}

/// Sending half handed to a spawned process for its notifications
#[derive(Debug, Clone)]
pub struct ProcessSink {
    instance_id: InstanceId,
    tx: Sender<ProcessMessage>,
}

impl ProcessSink {
    pub fn new(instance_id: InstanceId, tx: Sender<ProcessMessage>) -> Self {
        Self { instance_id, tx }
    }

    pub fn instance_id(&self) -> InstanceId {
        self.instance_id
    }

    /// Post an event. Returns false once the receiving registry is gone.
    pub fn send(&self, event: ProcessEvent) -> bool {
        self.tx
            .send(ProcessMessage {
                instance_id: self.instance_id,
                event,
            })
            .is_ok()
    }

    pub fn ready(&self, process_id: u32) -> bool {
        self.send(ProcessEvent::Ready { process_id })
    }

    pub fn output(&self, data: Vec<u8>) -> bool {
        self.send(ProcessEvent::Output(data))
    }

    pub fn exited(&self, exit_code: i32) -> bool {
        self.send(ProcessEvent::Exited { exit_code })
    }

    pub fn spawn_failed(&self, reason: impl Into<String>) -> bool {
        self.send(ProcessEvent::SpawnFailed(reason.into()))
    }
}

/// Everything a spawner needs to start one shell
#[derive(Debug, Clone)]
pub struct SpawnRequest<'a> {
    pub spec: &'a ShellLaunchSpec,
    pub cwd: PathBuf,
    pub env: Vec<(String, String)>,
    pub cols: u16,
    pub rows: u16,
}

/// A live shell process as seen by its owner
pub trait ShellProcess: Send {
    /// Queue bytes for the process input; must not wait on the process
    fn write(&mut self, data: &[u8]) -> Result<()>;

    fn resize(&mut self, cols: u16, rows: u16) -> Result<()>;

    fn kill(&mut self) -> Result<()>;
}

/// Facility that starts shell processes
pub trait ProcessSpawner: Send {
    /// Start a process. Readiness, output and exit are reported through `sink`.
    fn spawn(&self, request: &SpawnRequest<'_>, sink: ProcessSink) -> Result<Box<dyn ShellProcess>>;

    /// Spawner name for debugging
    fn name(&self) -> &str;
}

/// Exclusive wrapper around one instance's shell process
pub struct ProcessHandle {
    process: Box<dyn ShellProcess>,
    process_id: Option<u32>,
    alive: bool,
}

impl std::fmt::Debug for ProcessHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessHandle")
            .field("process_id", &self.process_id)
            .field("alive", &self.alive)
            .finish()
    }
}

impl ProcessHandle {
    pub fn new(process: Box<dyn ShellProcess>) -> Self {
        Self {
            process,
            process_id: None,
            alive: true,
        }
    }

    pub fn process_id(&self) -> Option<u32> {
        self.process_id
    }

    /// Record the OS pid. Only the first report is kept.
    pub(crate) fn set_process_id(&mut self, process_id: u32) -> bool {
        if self.process_id.is_some() {
            return false;
        }
        self.process_id = Some(process_id);
        true
    }

    pub fn is_alive(&self) -> bool {
        self.alive
    }

    /// Write to the process input. Writes to a dead process are dropped.
    pub fn write(&mut self, data: &[u8]) -> bool {
        if !self.alive {
            log::debug!(
                "Dropping {} byte write to exited process {:?}",
                data.len(),
                self.process_id
            );
            return false;
        }

        match self.process.write(data) {
            Ok(()) => true,
            Err(e) => {
                log::warn!("Dropping write to process {:?}: {:#}", self.process_id, e);
                false
            }
        }
    }

    pub fn resize(&mut self, cols: u16, rows: u16) {
        if !self.alive {
            return;
        }
        if let Err(e) = self.process.resize(cols, rows) {
            log::warn!("Failed to resize process {:?}: {:#}", self.process_id, e);
        }
    }

    /// The process ended on its own
    pub(crate) fn mark_exited(&mut self) {
        self.alive = false;
    }

    /// Kill the process if it is still running. Safe to call repeatedly.
    pub fn terminate(&mut self) {
        if !self.alive {
            return;
        }
        self.alive = false;
        if let Err(e) = self.process.kill() {
            // Usually the process exited between the check and the kill
            log::debug!("Kill of process {:?} failed: {:#}", self.process_id, e);
        }
    }
}

impl Drop for ProcessHandle {
    fn drop(&mut self) {
        self.terminate();
    }
}
