use std::collections::HashMap;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;

use super::config::{ConfigHelper, TerminalSettings};
use super::error::{Result, TerminalError};
use super::events::{EventBus, TerminalEvent};
use super::instance::{InstanceId, TerminalInstance};
use super::launch::{LaunchOptions, ShellLaunchSpec};
use super::process::{ProcessEvent, ProcessMessage, ProcessSink, ProcessSpawner};
use super::pty_process::PtySpawner;
use super::{DEFAULT_COLS, DEFAULT_ROWS};

/// Owns every terminal instance and tracks which one is active.
///
/// Instances live in an arena keyed by id; creation order is a separate sequence of
/// ids, so positions can shift on disposal without invalidating identities. All
/// mutation goes through `&mut self`, and process notifications are applied by
/// [`TerminalRegistry::process_pending`] on the same thread.
pub struct TerminalRegistry {
    instances: HashMap<InstanceId, TerminalInstance>,
    order: Vec<InstanceId>,
    active: Option<InstanceId>,
    next_id: InstanceId,
    config: ConfigHelper,
    spawner: Box<dyn ProcessSpawner>,
    events: EventBus,
    process_tx: Sender<ProcessMessage>,
    process_rx: Receiver<ProcessMessage>,
    default_size: (u16, u16),
    panel_visible: bool,
}

impl std::fmt::Debug for TerminalRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TerminalRegistry")
            .field("order", &self.order)
            .field("active", &self.active)
            .field("next_id", &self.next_id)
            .field("spawner", &self.spawner.name())
            .field("subscribers", &self.events.subscriber_count())
            .finish()
    }
}

impl TerminalRegistry {
    /// Create a registry that spawns shells in native PTYs
    pub fn new(config: ConfigHelper) -> Self {
        Self::with_spawner(config, Box::new(PtySpawner::new()))
    }

    /// Create a registry with a custom process facility
    pub fn with_spawner(config: ConfigHelper, spawner: Box<dyn ProcessSpawner>) -> Self {
        let (process_tx, process_rx) = mpsc::channel();
        Self {
            instances: HashMap::new(),
            order: Vec::new(),
            active: None,
            next_id: 0,
            config,
            spawner,
            events: EventBus::new(),
            process_tx,
            process_rx,
            default_size: (DEFAULT_COLS, DEFAULT_ROWS),
            panel_visible: false,
        }
    }

    /// Size (cols, rows) new instances start with
    pub fn with_default_size(mut self, cols: u16, rows: u16) -> Self {
        self.default_size = (cols.max(1), rows.max(1));
        self
    }

    pub fn config(&self) -> &ConfigHelper {
        &self.config
    }

    /// Receive every event published from now on, in publication order
    pub fn subscribe(&mut self) -> UnboundedReceiver<TerminalEvent> {
        self.events.subscribe()
    }

    /// Create and start a new instance.
    ///
    /// Only the first instance of an empty registry becomes active. Nothing is
    /// registered if the shell fails to spawn.
    pub fn create_instance(&mut self, options: LaunchOptions) -> Result<&mut TerminalInstance> {
        let max_instances = self.config.get_max_instances();
        if self.order.len() >= max_instances {
            return Err(TerminalError::LimitReached(max_instances));
        }

        let id = self.next_id;
        self.next_id += 1;

        let spec = ShellLaunchSpec::resolve(&options, &self.config);
        let sink = ProcessSink::new(id, self.process_tx.clone());
        let instance = match TerminalInstance::spawn(
            id,
            options.name.clone(),
            spec,
            self.spawner.as_ref(),
            &self.config,
            sink,
            self.default_size,
        ) {
            Ok(instance) => instance,
            Err(e) => {
                log::warn!("Terminal {} not created: {}", id, e);
                return Err(e);
            }
        };

        self.instances.insert(id, instance);
        self.order.push(id);
        self.events.publish(TerminalEvent::InstancesChanged);

        if self.active.is_none() {
            self.active = Some(id);
            self.sync_visibility();
            self.events
                .publish(TerminalEvent::ActiveInstanceChanged { id: Some(id) });
        }

        self.instances
            .get_mut(&id)
            .ok_or(TerminalError::NotFound(id))
    }

    pub fn get_instance_from_id(&self, id: InstanceId) -> Option<&TerminalInstance> {
        self.instances.get(&id)
    }

    pub fn get_instance_from_id_mut(&mut self, id: InstanceId) -> Option<&mut TerminalInstance> {
        self.instances.get_mut(&id)
    }

    /// Like [`Self::get_instance_from_id`], but reports unknown ids as an error
    pub fn instance(&self, id: InstanceId) -> Result<&TerminalInstance> {
        self.instances.get(&id).ok_or(TerminalError::NotFound(id))
    }

    pub fn instance_mut(&mut self, id: InstanceId) -> Result<&mut TerminalInstance> {
        self.instances.get_mut(&id).ok_or(TerminalError::NotFound(id))
    }

    /// Instances in creation order
    pub fn instances(&self) -> impl Iterator<Item = &TerminalInstance> + '_ {
        self.order.iter().filter_map(|id| self.instances.get(id))
    }

    pub fn instance_ids(&self) -> &[InstanceId] {
        &self.order
    }

    pub fn instance_count(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// "1: bash", "2: htop", ... in creation order
    pub fn get_instance_labels(&self) -> Vec<String> {
        self.instances()
            .enumerate()
            .map(|(index, instance)| format!("{}: {}", index + 1, instance.title()))
            .collect()
    }

    pub fn active_index(&self) -> Option<usize> {
        let active = self.active?;
        self.order.iter().position(|id| *id == active)
    }

    pub fn active_id(&self) -> Option<InstanceId> {
        self.active
    }

    pub fn get_active_instance(&self) -> Option<&TerminalInstance> {
        self.active.and_then(|id| self.instances.get(&id))
    }

    pub fn get_active_instance_mut(&mut self) -> Option<&mut TerminalInstance> {
        let id = self.active?;
        self.instances.get_mut(&id)
    }

    pub fn set_active_instance(&mut self, id: InstanceId) -> Result<()> {
        if !self.instances.contains_key(&id) {
            return Err(TerminalError::NotFound(id));
        }
        if self.active == Some(id) {
            return Ok(());
        }

        self.active = Some(id);
        self.sync_visibility();
        self.events
            .publish(TerminalEvent::ActiveInstanceChanged { id: Some(id) });
        Ok(())
    }

    pub fn set_active_instance_by_index(&mut self, index: usize) -> Result<()> {
        let id = *self.order.get(index).ok_or(TerminalError::InvalidIndex {
            index,
            len: self.order.len(),
        })?;
        self.set_active_instance(id)
    }

    pub fn set_active_instance_to_next(&mut self) {
        let len = self.order.len();
        if len <= 1 {
            return;
        }
        let next = self.active_index().map_or(0, |index| (index + 1) % len);
        self.activate_position(next);
    }

    pub fn set_active_instance_to_previous(&mut self) {
        let len = self.order.len();
        if len <= 1 {
            return;
        }
        let previous = self.active_index().map_or(0, |index| (index + len - 1) % len);
        self.activate_position(previous);
    }

    /// Remove an instance and kill its shell. Returns false if it was already gone.
    ///
    /// When the active instance goes, the one that followed it becomes active, or
    /// failing that the one before it.
    pub fn dispose(&mut self, id: InstanceId) -> bool {
        let Some(position) = self.order.iter().position(|other| *other == id) else {
            return false;
        };

        self.order.remove(position);
        if let Some(mut instance) = self.instances.remove(&id) {
            instance.dispose();
        }

        self.events.publish(TerminalEvent::InstanceDisposed { id });
        self.events.publish(TerminalEvent::InstancesChanged);

        if self.active == Some(id) {
            let successor = self
                .order
                .get(position)
                .or_else(|| position.checked_sub(1).and_then(|p| self.order.get(p)))
                .copied();
            self.active = successor;
            self.sync_visibility();
            self.events
                .publish(TerminalEvent::ActiveInstanceChanged { id: successor });
        }
        true
    }

    pub fn dispose_all(&mut self) {
        for id in self.order.clone() {
            self.dispose(id);
        }
    }

    /// Show or hide the terminal panel; only the active instance is visible while shown
    pub fn set_panel_visible(&mut self, visible: bool) {
        self.panel_visible = visible;
        self.sync_visibility();
    }

    /// Push the current configuration to every live instance. Never restarts a process.
    /// Returns how many instances changed.
    pub fn update_config(&mut self) -> usize {
        let snapshot = self.config.snapshot();
        let mut changed = 0;
        for id in &self.order {
            if let Some(instance) = self.instances.get_mut(id) {
                if !instance.update_config(&snapshot).is_empty() {
                    changed += 1;
                }
            }
        }
        log::debug!("Configuration update changed {} terminals", changed);
        changed
    }

    /// Replace the user settings layer and broadcast the result
    pub fn update_config_from(&mut self, settings: TerminalSettings) -> usize {
        self.config.set_settings(settings);
        self.update_config()
    }

    /// Apply every queued process notification without blocking
    pub fn process_pending(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(message) = self.process_rx.try_recv() {
            self.handle_process_message(message);
            handled += 1;
        }
        handled
    }

    /// Wait up to `timeout` for a process notification, then apply everything queued
    pub fn process_pending_timeout(&mut self, timeout: Duration) -> usize {
        match self.process_rx.recv_timeout(timeout) {
            Ok(message) => {
                self.handle_process_message(message);
                1 + self.process_pending()
            }
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => 0,
        }
    }

    fn handle_process_message(&mut self, message: ProcessMessage) {
        let id = message.instance_id;
        let Some(instance) = self.instances.get_mut(&id) else {
            log::debug!("Ignoring {:?} for disposed terminal {}", message.event, id);
            return;
        };

        match message.event {
            ProcessEvent::Ready { process_id } => {
                if instance.on_process_ready(process_id) {
                    self.events
                        .publish(TerminalEvent::InstanceProcessIdReady { id, process_id });
                }
            }
            ProcessEvent::Output(data) => {
                if let Some(title) = instance.on_output(&data) {
                    self.events
                        .publish(TerminalEvent::InstanceTitleChanged { id, title });
                }
            }
            ProcessEvent::Exited { exit_code } => {
                if !instance.on_process_exit(exit_code) {
                    return;
                }
                if instance.spec().wait_on_exit {
                    self.events
                        .publish(TerminalEvent::InstanceExited { id, exit_code });
                } else {
                    self.dispose(id);
                }
            }
            ProcessEvent::SpawnFailed(reason) => {
                log::warn!("Terminal {} failed to start: {}", id, reason);
                self.dispose(id);
            }
        }
    }

    fn activate_position(&mut self, position: usize) {
        if let Some(id) = self.order.get(position).copied() {
            // The id comes from `order`, so it is always registered
            let _ = self.set_active_instance(id);
        }
    }

    fn sync_visibility(&mut self) {
        let active = self.active;
        let panel_visible = self.panel_visible;
        for (id, instance) in self.instances.iter_mut() {
            instance.set_visible(panel_visible && Some(*id) == active);
        }
    }
}

impl Drop for TerminalRegistry {
    fn drop(&mut self) {
        // Kill all shells on drop
        self.dispose_all();
    }
}
