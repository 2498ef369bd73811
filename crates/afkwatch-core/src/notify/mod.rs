//! Outbound notification boundary (webhook today, anything with a title and a color later).

pub mod port;
pub mod throttled;
pub mod types;

pub use port::NotificationSink;
pub use types::{Notification, Tone};
