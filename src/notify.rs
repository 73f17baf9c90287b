use dashmap::DashMap;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::model::Event;

const CHANNEL_CAPACITY: usize = 256;

/// Per-unit broadcast of committed events.
///
/// Channels are created lazily on first subscribe. Events sent to a unit
/// nobody listens on are dropped.
#[derive(Default)]
pub struct NotifyHub {
    channels: DashMap<Ulid, broadcast::Sender<Event>>,
}

impl NotifyHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, unit_id: Ulid) -> broadcast::Receiver<Event> {
        self.channels
            .entry(unit_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    pub fn send(&self, unit_id: Ulid, event: &Event) {
        if let Some(sender) = self.channels.get(&unit_id) {
            let _ = sender.send(event.clone());
        }
    }

    pub fn subscriber_count(&self, unit_id: &Ulid) -> usize {
        self.channels.get(unit_id).map_or(0, |s| s.receiver_count())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::BookingStatus;

    #[tokio::test]
    async fn subscriber_receives_unit_events() {
        let hub = NotifyHub::new();
        let unit = Ulid::new();
        let mut rx = hub.subscribe(unit);
        assert_eq!(hub.subscriber_count(&unit), 1);

        let event = Event::BookingStatusChanged {
            id: Ulid::new(),
            unit_id: unit,
            status: BookingStatus::Confirmed,
        };
        hub.send(unit, &event);
        assert_eq!(rx.recv().await.unwrap(), event);
    }

    #[tokio::test]
    async fn other_units_are_not_delivered() {
        let hub = NotifyHub::new();
        let watched = Ulid::new();
        let other = Ulid::new();
        let mut rx = hub.subscribe(watched);

        hub.send(other, &Event::BlockRemoved { id: Ulid::new(), unit_id: other });
        assert!(matches!(rx.try_recv(), Err(broadcast::error::TryRecvError::Empty)));
        assert_eq!(hub.subscriber_count(&other), 0);
    }
}
