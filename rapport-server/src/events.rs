use rapport_common::FriendEvent;
use tokio::sync::broadcast;

/// Change notification hook. Subscribers get every successful transition;
/// a subscriber that falls more than `capacity` events behind sees `Lagged`.
#[derive(Clone)]
pub struct EventHub {
    sender: broadcast::Sender<FriendEvent>,
}

impl EventHub {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FriendEvent> {
        self.sender.subscribe()
    }

    /// Returns how many subscribers got the event. Having none is not an error.
    pub fn publish(&self, event: FriendEvent) -> usize {
        let request = event.request();
        tracing::debug!(request = %request.id, sender = %request.sender, receiver = %request.receiver, ?event, "publishing friend event");
        self.sender.send(event).unwrap_or(0)
    }
}
