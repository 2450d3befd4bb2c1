//! Web push delivery engine.
//!
//! Turns "publish to topic T" into one authenticated, encrypted web push
//! per subscriber, and prunes subscribers the push service reports gone.
//!
//! # Architecture
//!
//! ```text
//! Dispatcher::publish(topic, payload)
//!     ↓
//! SubscriberStore::list_by_topic
//!     ↓  (bounded fan-out, one task per subscriber)
//! determine_provider → TokenSigner → PushTransport::deliver → classify
//!     ↓
//! Gone → SubscriberStore::delete_by_endpoint
//!     ↓
//! PublishTally { sent, failed }
//! ```
//!
//! # VAPID Keys
//!
//! One P-256 keypair per installation ([`vapid::KeyStore`]). Browsers bind
//! their subscriptions to its public key, so it is loaded once at startup
//! and injected everywhere as an immutable `Arc<VapidKeys>`.
//!
//! # Providers
//!
//! Apple's push service needs a pinned audience and sub-hour tokens; see
//! [`provider`] for the rules and [`signer`] for how they reach the JWT.

// Rust guideline compliant 2026-02

pub mod classify;
pub mod dispatcher;
pub mod provider;
pub mod push;
pub mod signer;
pub mod vapid;

pub use classify::{classify, DeliveryOutcome};
pub use dispatcher::{Dispatcher, PublishTally};
pub use provider::{determine_provider, ProviderProfile, TokenLifetimes};
pub use push::{NotificationPayload, PushTransport, WebPushTransport};
pub use signer::{Assertion, TokenSigner};
pub use vapid::{KeyStore, VapidKeys};
