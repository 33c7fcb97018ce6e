/// PTY-backed shell processes (default spawner)
use anyhow::{anyhow, Context, Result};
use portable_pty::{native_pty_system, ChildKiller, CommandBuilder, MasterPty, PtySize, PtySystem};
use std::io::{ErrorKind, Read, Write};
use std::sync::mpsc::{self, Sender};
use std::thread;
use std::time::Duration;

use super::process::{ProcessSink, ProcessSpawner, ShellProcess, SpawnRequest};

const READ_BUFFER_SIZE: usize = 4096;

/// Spawns shells inside a native pseudo terminal
#[derive(Debug, Clone, Copy, Default)]
pub struct PtySpawner;

impl PtySpawner {
    pub fn new() -> Self {
        Self
    }
}

impl ProcessSpawner for PtySpawner {
    fn spawn(&self, request: &SpawnRequest<'_>, sink: ProcessSink) -> Result<Box<dyn ShellProcess>> {
        let pty_system = native_pty_system();

        let pty_pair = pty_system
            .openpty(PtySize {
                rows: request.rows,
                cols: request.cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .context("Failed to open PTY")?;

        let master = pty_pair.master;
        let reader = master
            .try_clone_reader()
            .context("Failed to clone PTY reader")?;
        let writer = master.take_writer().context("Failed to take PTY writer")?;

        let mut cmd = CommandBuilder::new(&request.spec.executable);
        cmd.args(&request.spec.args);
        if request.cwd.is_dir() {
            cmd.cwd(&request.cwd);
        } else {
            log::warn!(
                "Working directory {} does not exist, starting in the current directory",
                request.cwd.display()
            );
        }
        for (key, value) in &request.env {
            cmd.env(key, value);
        }

        let child = pty_pair
            .slave
            .spawn_command(cmd)
            .context("Failed to spawn command in PTY")?;
        // The slave end must close here or the reader never sees EOF
        drop(pty_pair.slave);

        let killer = child.clone_killer();
        match child.process_id() {
            Some(pid) => {
                sink.ready(pid);
            }
            None => log::warn!(
                "No process id reported for terminal {}",
                sink.instance_id()
            ),
        }

        let input = spawn_writer(writer);
        spawn_reader(reader, sink.clone());
        spawn_waiter(child, sink);

        Ok(Box::new(PtyProcess {
            master,
            input,
            killer,
        }))
    }

    fn name(&self) -> &str {
        "pty"
    }
}

/// Queue input on a dedicated thread so callers never block on the shell
fn spawn_writer(mut writer: Box<dyn Write + Send>) -> Sender<Vec<u8>> {
    let (tx, rx) = mpsc::channel::<Vec<u8>>();
    thread::spawn(move || {
        for chunk in rx {
            if let Err(e) = writer.write_all(&chunk).and_then(|_| writer.flush()) {
                log::debug!("PTY writer stopped: {}", e);
                break;
            }
        }
    });
    tx
}

fn spawn_reader(mut reader: Box<dyn Read + Send>, sink: ProcessSink) {
    thread::spawn(move || {
        let mut buffer = vec![0u8; READ_BUFFER_SIZE];
        loop {
            match reader.read(&mut buffer) {
                // EOF - process exited
                Ok(0) => break,
                Ok(n) => {
                    if !sink.output(buffer[..n].to_vec()) {
                        break;
                    }
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == ErrorKind::WouldBlock => {
                    thread::sleep(Duration::from_millis(10));
                }
                // Linux reports EIO once the slave side is gone
                Err(_) => break,
            }
        }
    });
}

fn spawn_waiter(mut child: Box<dyn portable_pty::Child + Send + Sync>, sink: ProcessSink) {
    thread::spawn(move || {
        let exit_code = match child.wait() {
            Ok(status) => status.exit_code() as i32,
            Err(e) => {
                log::warn!("Failed to wait for terminal {}: {}", sink.instance_id(), e);
                -1
            }
        };
        sink.exited(exit_code);
    });
}

/// A shell running in a PTY
struct PtyProcess {
    master: Box<dyn MasterPty + Send>,
    input: Sender<Vec<u8>>,
    killer: Box<dyn ChildKiller + Send + Sync>,
}

impl ShellProcess for PtyProcess {
    fn write(&mut self, data: &[u8]) -> Result<()> {
        self.input
            .send(data.to_vec())
            .map_err(|_| anyhow!("PTY input channel closed"))
    }

    fn resize(&mut self, cols: u16, rows: u16) -> Result<()> {
        self.master
            .resize(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .context("Failed to resize PTY")
    }

    fn kill(&mut self) -> Result<()> {
        self.killer.kill().context("Failed to kill child process")
    }
}
