use async_trait::async_trait;
use kairos_rs_protocol::{DeliveryError, Notifier};
use log::info;

/// Notifier that writes notifications to the log.
#[derive(Debug, Clone, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, title: &str, message: &str) -> Result<(), DeliveryError> {
        info!("notification (title={title:?}, message={message:?})");
        Ok(())
    }
}
