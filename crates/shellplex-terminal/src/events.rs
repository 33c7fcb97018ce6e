//! Typed lifecycle events and their fan-out to observers.

use serde::Serialize;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use super::instance::InstanceId;

/// Lifecycle and configuration events published by the registry
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TerminalEvent {
    /// The active instance changed; `None` once the registry is empty
    ActiveInstanceChanged { id: Option<InstanceId> },
    InstanceDisposed { id: InstanceId },
    InstanceProcessIdReady { id: InstanceId, process_id: u32 },
    /// An instance was added or removed
    InstancesChanged,
    InstanceTitleChanged { id: InstanceId, title: String },
    /// A wait-on-exit instance's shell ended; the instance stays until disposed
    InstanceExited { id: InstanceId, exit_code: i32 },
}

impl TerminalEvent {
    /// Instance the event originates from, if any
    pub fn instance_id(&self) -> Option<InstanceId> {
        match self {
            Self::ActiveInstanceChanged { id } => *id,
            Self::InstanceDisposed { id }
            | Self::InstanceProcessIdReady { id, .. }
            | Self::InstanceTitleChanged { id, .. }
            | Self::InstanceExited { id, .. } => Some(*id),
            Self::InstancesChanged => None,
        }
    }
}

/// Multi-subscriber dispatcher. Each subscriber gets its own FIFO channel, so
/// every observer sees events in publication order.
#[derive(Debug, Default)]
pub struct EventBus {
    subscribers: Vec<UnboundedSender<TerminalEvent>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self) -> UnboundedReceiver<TerminalEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.push(tx);
        rx
    }

    /// Deliver to every live subscriber, dropping those whose receiver is gone
    pub fn publish(&mut self, event: TerminalEvent) {
        log::debug!("Terminal event: {:?}", event);
        self.subscribers
            .retain(|subscriber| subscriber.send(event.clone()).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_subscriber_sees_events_in_order() {
        let mut bus = EventBus::new();
        let mut first = bus.subscribe();
        let mut second = bus.subscribe();

        bus.publish(TerminalEvent::InstancesChanged);
        bus.publish(TerminalEvent::InstanceDisposed { id: 4 });

        for rx in [&mut first, &mut second] {
            assert_eq!(rx.try_recv().unwrap(), TerminalEvent::InstancesChanged);
            assert_eq!(rx.try_recv().unwrap(), TerminalEvent::InstanceDisposed { id: 4 });
            assert!(rx.try_recv().is_err());
        }
    }

    #[test]
    fn test_closed_subscribers_are_pruned() {
        let mut bus = EventBus::new();
        let rx = bus.subscribe();
        let _kept = bus.subscribe();
        drop(rx);

        bus.publish(TerminalEvent::InstancesChanged);
        assert_eq!(bus.subscriber_count(), 1);
    }

    #[test]
    fn test_event_serialization() {
        let event = TerminalEvent::InstanceTitleChanged {
            id: 2,
            title: "htop".to_string(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "instance_title_changed");
        assert_eq!(json["id"], 2);
        assert_eq!(event.instance_id(), Some(2));
    }
}
