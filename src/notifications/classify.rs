//! Delivery outcome classification.
//!
//! Only a 410 from the provider means the subscription is dead. Everything
//! else that is not a 2xx (rate limiting, 404 on a flaky CDN edge, 5xx,
//! timeouts) leaves the subscriber in place.

use super::push::{PushResponse, TransportError};

/// Terminal state of one delivery attempt.
///
/// Each attempt moves `Pending -> Delivering -> {Delivered | Gone | Transient}`
/// exactly once; there is no retry within a publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Provider accepted the message.
    Delivered,
    /// Provider declared the subscription permanently invalid.
    Gone,
    /// Any other failure. Never causes deletion.
    Transient,
}

impl DeliveryOutcome {
    /// Whether the subscriber record should be pruned.
    pub fn should_prune(self) -> bool {
        matches!(self, Self::Gone)
    }

    /// Whether this attempt counts as sent.
    pub fn is_delivered(self) -> bool {
        matches!(self, Self::Delivered)
    }
}

/// Classify a provider HTTP status.
pub fn classify(status: u16) -> DeliveryOutcome {
    match status {
        200..=299 => DeliveryOutcome::Delivered,
        410 => DeliveryOutcome::Gone,
        _ => DeliveryOutcome::Transient,
    }
}

/// Classify a full transport result; transport errors are always transient.
pub fn classify_outcome(result: &Result<PushResponse, TransportError>) -> DeliveryOutcome {
    match result {
        Ok(response) => classify(response.status),
        Err(_) => DeliveryOutcome::Transient,
    }
}
