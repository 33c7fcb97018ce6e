#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use shellplex_terminal::{
    ConfigHelper, Platform, ProcessSink, ProcessSpawner, ShellProcess, SpawnRequest,
    TerminalRegistry, TerminalSettings,
};

/// What a scripted process has seen so far
#[derive(Debug, Default, Clone)]
pub struct ProcessRecord {
    pub executable: String,
    pub args: Vec<String>,
    pub written: Vec<u8>,
    pub sizes: Vec<(u16, u16)>,
    pub kills: usize,
}

#[derive(Default)]
struct Script {
    missing: HashSet<String>,
    records: HashMap<u32, ProcessRecord>,
    sinks: HashMap<u32, ProcessSink>,
    spawned: usize,
}

/// In-memory process facility. Executables registered as missing fail to spawn;
/// everything else "starts" and waits for the test to drive it through its sink.
#[derive(Clone, Default)]
pub struct ScriptedSpawner {
    script: Arc<Mutex<Script>>,
}

impl ScriptedSpawner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_missing(&self, executable: &str) {
        self.script.lock().unwrap().missing.insert(executable.to_string());
    }

    /// Sink of the process started for instance `id`
    pub fn sink(&self, id: u32) -> ProcessSink {
        self.script
            .lock()
            .unwrap()
            .sinks
            .get(&id)
            .cloned()
            .expect("no process was spawned for this instance")
    }

    pub fn record(&self, id: u32) -> ProcessRecord {
        self.script
            .lock()
            .unwrap()
            .records
            .get(&id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn written(&self, id: u32) -> Vec<u8> {
        self.record(id).written
    }

    pub fn spawned(&self) -> usize {
        self.script.lock().unwrap().spawned
    }
}

struct ScriptedProcess {
    id: u32,
    script: Arc<Mutex<Script>>,
}

impl ScriptedProcess {
    fn with_record(&self, f: impl FnOnce(&mut ProcessRecord)) {
        let mut script = self.script.lock().unwrap();
        f(script.records.entry(self.id).or_default());
    }
}

impl ShellProcess for ScriptedProcess {
    fn write(&mut self, data: &[u8]) -> anyhow::Result<()> {
        self.with_record(|record| record.written.extend_from_slice(data));
        Ok(())
    }

    fn resize(&mut self, cols: u16, rows: u16) -> anyhow::Result<()> {
        self.with_record(|record| record.sizes.push((cols, rows)));
        Ok(())
    }

    fn kill(&mut self) -> anyhow::Result<()> {
        self.with_record(|record| record.kills += 1);
        Ok(())
    }
}

impl ProcessSpawner for ScriptedSpawner {
    fn spawn(
        &self,
        request: &SpawnRequest<'_>,
        sink: ProcessSink,
    ) -> anyhow::Result<Box<dyn ShellProcess>> {
        let mut script = self.script.lock().unwrap();
        if script.missing.contains(&request.spec.executable) {
            anyhow::bail!("No such file or directory (os error 2)");
        }

        let id = sink.instance_id();
        script.spawned += 1;
        script.records.insert(
            id,
            ProcessRecord {
                executable: request.spec.executable.clone(),
                args: request.spec.args.clone(),
                ..Default::default()
            },
        );
        script.sinks.insert(id, sink);

        Ok(Box::new(ScriptedProcess {
            id,
            script: Arc::clone(&self.script),
        }))
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// Linux-flavoured configuration isolated from the host environment
pub fn test_config() -> ConfigHelper {
    ConfigHelper::new()
        .with_platform(Platform::Linux)
        .with_env([("SHELL", "/bin/bash"), ("HOME", "/tmp")])
        .with_settings(TerminalSettings::default())
}

pub fn test_registry() -> (TerminalRegistry, ScriptedSpawner) {
    let spawner = ScriptedSpawner::new();
    let registry = TerminalRegistry::with_spawner(test_config(), Box::new(spawner.clone()));
    (registry, spawner)
}

/// Drain everything an observer has received so far
pub fn drain<T>(rx: &mut tokio::sync::mpsc::UnboundedReceiver<T>) -> Vec<T> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
