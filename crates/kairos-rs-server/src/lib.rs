//! HTTP surface for Kairos: the webhook server, reqwest clients for the
//! messenger and model backends, and the wiring that ties them to the core.

mod app;
mod messenger;
mod model;
mod notifier;
pub mod routes;

pub use app::{App, Collaborators};
pub use messenger::HttpMessenger;
pub use model::HttpModelClient;
pub use notifier::LogNotifier;
pub use routes::{AppState, SECRET_HEADER, router};
