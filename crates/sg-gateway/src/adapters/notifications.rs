//! Channel-backed notification source.

use crate::domain::event::Notification;
use crate::ports::NotificationSource;
use async_trait::async_trait;
use tokio::sync::mpsc;

/// Receives notifications pushed through a [`mpsc::Sender`].
pub struct ChannelNotifications(mpsc::Receiver<Notification>);

#[async_trait]
impl NotificationSource for ChannelNotifications {
    async fn next_notification(&mut self) -> Option<Notification> {
        self.0.recv().await
    }
}

/// Create a notification sender and the source that drains it.
pub fn notification_channel(buffer: usize) -> (mpsc::Sender<Notification>, ChannelNotifications) {
    let (tx, rx) = mpsc::channel(buffer);
    (tx, ChannelNotifications(rx))
}
