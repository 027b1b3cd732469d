//! Publishing of show/click actions to the message broker.

#![warn(clippy::unwrap_used)]

pub mod nats;
pub mod publisher;

pub use nats::NatsPublisher;
pub use publisher::{capture_publisher, noop_publisher, CapturePublisher, EventPublisher, NoOpPublisher};
