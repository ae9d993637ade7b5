use tokio::sync::mpsc;

use crate::{CommandClassId, EndpointId, NodeId};

/// A value decoded from a report, as published to the event bus.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ValueEvent {
    pub node_id: NodeId,
    pub endpoint: EndpointId,
    pub command_class: CommandClassId,
    pub value: u8,
}

/// Sending half of the event bus.
///
/// Publishing never waits on subscribers: the channel is unbounded, and a bus that has gone away
/// is the bus's problem, so the event is logged and dropped.
#[derive(Clone, Debug)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<ValueEvent>,
}

impl EventSink {
    pub fn new(tx: mpsc::UnboundedSender<ValueEvent>) -> Self {
        Self { tx }
    }

    pub fn publish(&self, event: ValueEvent) {
        debug!("publishing {:?}", event);
        if let Err(error) = self.tx.send(event) {
            warn!("event bus closed, dropping {:?}", error.0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event() -> ValueEvent {
        ValueEvent {
            node_id: 3,
            endpoint: 0,
            command_class: CommandClassId::SwitchBinary,
            value: 0xFF,
        }
    }

    #[test]
    fn publish_delivers_event() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sink = EventSink::new(tx);

        sink.publish(event());

        assert_eq!(rx.try_recv().unwrap(), event());
    }

    #[test]
    fn publish_survives_closed_bus() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        let sink = EventSink::new(tx);

        sink.publish(event());
    }
}
