use async_trait::async_trait;
use kairos_rs_protocol::{DeliveryError, Notifier};
use parking_lot::Mutex;
use std::sync::Arc;

#[derive(Debug, Clone, Default)]
pub struct RecordingNotifier {
    notifications: Arc<Mutex<Vec<(String, String)>>>,
}

impl RecordingNotifier {
    /// `(title, message)` pairs in delivery order.
    pub fn notifications(&self) -> Vec<(String, String)> {
        self.notifications.lock().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, title: &str, message: &str) -> Result<(), DeliveryError> {
        self.notifications
            .lock()
            .push((title.to_string(), message.to_string()));
        Ok(())
    }
}
