//! Push provider detection.
//!
//! Providers differ in what they accept in the VAPID assertion. Most take
//! the endpoint origin as `aud` and tokens valid for up to 24h. Apple's
//! push service (`*.push.apple.com`) pins `aud` to its own origin and
//! rejects tokens whose expiry is an hour or more away, without telling
//! the sender why. All such branching lives here so the signer and the
//! transport never inspect hostnames themselves.

use std::time::Duration;

use reqwest::Url;

use crate::error::{PushError, PushResult};

/// Host suffix that identifies Apple's push service.
pub const APPLE_PUSH_HOST: &str = "push.apple.com";

/// Audience Apple expects regardless of the endpoint host.
pub const APPLE_AUDIENCE: &str = "https://web.push.apple.com";

/// Hard ceiling Apple applies to token lifetime.
pub const APPLE_MAX_TOKEN_TTL: Duration = Duration::from_secs(60 * 60);

/// Which push service an endpoint belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    /// Apple Push Notification service for web (Safari).
    Apple,
    /// Any standards-following provider (FCM, Mozilla autopush, ...).
    Generic,
}

/// Value of the `Urgency` request header (RFC 8030 §5.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Urgency {
    /// Deliver only when on power and wifi.
    VeryLow,
    /// Deliver on power or wifi.
    Low,
    /// Deliver on neither power nor wifi.
    Normal,
    /// Deliver immediately, even on low battery.
    High,
}

impl Urgency {
    /// Header value.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::VeryLow => "very-low",
            Self::Low => "low",
            Self::Normal => "normal",
            Self::High => "high",
        }
    }
}

/// How the assertion audience is chosen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AudienceStrategy {
    /// Use the endpoint's own origin (scheme + host + non-default port).
    EndpointOrigin(String),
    /// Use a provider-mandated origin.
    Fixed(&'static str),
}

impl AudienceStrategy {
    /// The `aud` claim value.
    pub fn audience(&self) -> &str {
        match self {
            Self::EndpointOrigin(origin) => origin.as_str(),
            Self::Fixed(origin) => origin,
        }
    }
}

/// Everything provider-specific about one delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderProfile {
    /// Detected provider.
    pub provider: Provider,
    /// Audience for the assertion.
    pub audience: AudienceStrategy,
    /// Lifetime of the assertion.
    pub token_ttl: Duration,
    /// `Urgency` header to send, if any.
    pub urgency: Option<Urgency>,
}

/// Token lifetimes per provider family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenLifetimes {
    /// Lifetime for standards-following providers.
    pub generic: Duration,
    /// Lifetime for Apple. Must stay below [`APPLE_MAX_TOKEN_TTL`].
    pub apple: Duration,
}

impl Default for TokenLifetimes {
    fn default() -> Self {
        Self {
            generic: Duration::from_secs(12 * 60 * 60),
            apple: Duration::from_secs(45 * 60),
        }
    }
}

/// Whether `host` belongs to Apple's push service.
pub fn is_apple_host(host: &str) -> bool {
    let host = host.trim_end_matches('.').to_ascii_lowercase();
    host == APPLE_PUSH_HOST || host.ends_with(&format!(".{APPLE_PUSH_HOST}"))
}

/// Inspect `endpoint` and return the profile to sign and deliver with.
pub fn determine_provider(
    endpoint: &str,
    lifetimes: TokenLifetimes,
) -> PushResult<ProviderProfile> {
    let url = Url::parse(endpoint).map_err(|e| invalid(endpoint, e.to_string()))?;
    if !matches!(url.scheme(), "https" | "http") {
        return Err(invalid(endpoint, format!("unsupported scheme '{}'", url.scheme())));
    }
    let host = url
        .host_str()
        .ok_or_else(|| invalid(endpoint, "missing host".to_string()))?;

    if is_apple_host(host) {
        // Clamp in case a caller bypassed config validation.
        let ttl = lifetimes
            .apple
            .min(APPLE_MAX_TOKEN_TTL - Duration::from_secs(60));
        return Ok(ProviderProfile {
            provider: Provider::Apple,
            audience: AudienceStrategy::Fixed(APPLE_AUDIENCE),
            token_ttl: ttl,
            urgency: Some(Urgency::High),
        });
    }

    Ok(ProviderProfile {
        provider: Provider::Generic,
        audience: AudienceStrategy::EndpointOrigin(url.origin().ascii_serialization()),
        token_ttl: lifetimes.generic,
        urgency: None,
    })
}

fn invalid(endpoint: &str, reason: String) -> PushError {
    PushError::InvalidEndpoint {
        endpoint: endpoint.to_string(),
        reason,
    }
}
