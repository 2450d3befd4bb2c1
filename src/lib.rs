//! Pushem - topic-based Web Push delivery.
//!
//! Browsers subscribe to named topics; publishing to a topic sends an
//! encrypted, VAPID-authenticated web push to every subscriber.
//!
//! # Modules
//!
//! - [`notifications`] - Key management, signing, delivery, fan-out
//! - [`store`] - Subscriber storage (SQLite and in-memory)
//! - [`config`] - Configuration loading
//! - [`error`] - Error taxonomy

pub mod config;
pub mod error;
pub mod notifications;
pub mod store;

pub use config::Config;
pub use error::{PushError, PushResult};
pub use notifications::{Dispatcher, NotificationPayload, PublishTally};
pub use store::{SqliteStore, SubscriberStore};
