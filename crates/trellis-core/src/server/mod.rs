//! Serving side: per-request dispatch, shared port listeners and
//! lease-bound registration.

mod dispatch;
mod listener;
mod registration;

pub use dispatch::{endpoint, BoxedEndpoint};
pub use listener::PortListener;
pub use registration::Registration;
