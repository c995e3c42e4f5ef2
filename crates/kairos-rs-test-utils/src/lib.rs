//! Test helpers shared across Kairos crates.

pub mod messenger;
pub mod model;
pub mod notifier;

pub use messenger::RecordingMessenger;
pub use model::{FailingModel, RecordingModel, ScriptedModel};
pub use notifier::RecordingNotifier;
