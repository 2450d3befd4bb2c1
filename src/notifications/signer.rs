//! VAPID assertion signing (RFC 8292).
//!
//! An assertion is a compact ES256 JWT:
//!
//! ```text
//! base64url({"typ":"JWT","alg":"ES256"}) . base64url({"aud","exp","sub"}) . base64url(r || s)
//! ```
//!
//! It travels in the `Authorization: vapid t=<jwt>, k=<public key>` header.
//! The JWT is produced by `web-push`'s `VapidSignatureBuilder`. The `aud`
//! and `exp` claims are always set explicitly from the provider profile, so
//! Apple's pinned audience and short lifetime are what gets signed.
//!
//! A fresh assertion is minted per delivery; signing is a single ECDSA
//! operation and avoids any shared token cache across workers.

// Rust guideline compliant 2026-02

use std::sync::Arc;
use std::time::Duration;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD as BASE64URL, Engine};
use web_push::{SubscriptionInfo, VapidSignatureBuilder};

use super::provider::{determine_provider, ProviderProfile, TokenLifetimes, Urgency};
use super::vapid::VapidKeys;
use crate::error::{PushError, PushResult};

/// Default `sub` claim when none is configured.
pub const DEFAULT_SUBJECT: &str = "mailto:admin@pushem.local";

/// A signed VAPID assertion, ready for the Authorization header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assertion {
    /// The compact JWT.
    pub token: String,
    /// Base64url uncompressed public key (`k=` parameter).
    pub public_key: String,
    /// The `aud` claim that was signed.
    pub audience: String,
    /// The `exp` claim, seconds since the Unix epoch.
    pub expires_at: i64,
    /// Urgency the provider expects alongside this token.
    pub urgency: Option<Urgency>,
}

impl Assertion {
    /// `Authorization` header value.
    pub fn authorization_header(&self) -> String {
        format!("vapid t={}, k={}", self.token, self.public_key)
    }
}

/// Sign an assertion for `endpoint` with `audience`, valid for `ttl` from now.
pub fn sign(
    keys: &VapidKeys,
    subject: &str,
    endpoint: &str,
    audience: &str,
    ttl: Duration,
) -> PushResult<Assertion> {
    sign_at(keys, subject, endpoint, audience, ttl, chrono::Utc::now().timestamp())
}

fn sign_at(
    keys: &VapidKeys,
    subject: &str,
    endpoint: &str,
    audience: &str,
    ttl: Duration,
    now: i64,
) -> PushResult<Assertion> {
    let ttl_secs = i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX);
    let expires_at = now.saturating_add(ttl_secs);
    let exp = u64::try_from(expires_at).map_err(|_| {
        PushError::SigningFailure(format!("expiry {expires_at} is before the epoch"))
    })?;

    // Only the endpoint is read when signing; the browser keys are not.
    let sub_info = SubscriptionInfo::new(endpoint, "", "");
    let private_key = keys.private_key_base64url();
    let mut builder = VapidSignatureBuilder::from_base64(&private_key, &sub_info)
        .map_err(|e| PushError::SigningFailure(format!("failed to load VAPID key: {e}")))?;
    builder.add_claim("sub", subject);
    builder.add_claim("aud", audience);
    builder.add_claim("exp", exp);
    let signature = builder
        .build()
        .map_err(|e| PushError::SigningFailure(format!("failed to sign VAPID JWT: {e}")))?;

    Ok(Assertion {
        token: signature.auth_t,
        public_key: BASE64URL.encode(&signature.auth_k),
        audience: audience.to_string(),
        expires_at,
        urgency: None,
    })
}

/// Normalize a contact identifier into a valid `sub` claim.
///
/// `https:` URLs and `mailto:` URIs pass through; a bare address gets a
/// `mailto:` prefix; empty input falls back to [`DEFAULT_SUBJECT`].
pub fn normalize_subject(subject: &str) -> String {
    let subject = subject.trim();
    if subject.is_empty() {
        DEFAULT_SUBJECT.to_string()
    } else if subject.starts_with("mailto:") || subject.starts_with("https:") {
        subject.to_string()
    } else {
        format!("mailto:{subject}")
    }
}

/// Mints per-endpoint assertions from the installation keypair.
///
/// Holds the keys by `Arc`; the keys are never mutated, so workers share a
/// signer without locking.
#[derive(Debug, Clone)]
pub struct TokenSigner {
    keys: Arc<VapidKeys>,
    subject: String,
    lifetimes: TokenLifetimes,
}

impl TokenSigner {
    /// Create a signer. `subject` is normalized with [`normalize_subject`].
    pub fn new(keys: Arc<VapidKeys>, subject: &str, lifetimes: TokenLifetimes) -> Self {
        Self {
            keys,
            subject: normalize_subject(subject),
            lifetimes,
        }
    }

    /// The `sub` claim used for every assertion.
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Public key handed to subscribers at registration time.
    pub fn public_key_base64url(&self) -> &str {
        self.keys.public_key_base64url()
    }

    /// Sign an assertion appropriate for `endpoint`'s provider.
    pub fn sign_for_endpoint(&self, endpoint: &str) -> PushResult<Assertion> {
        let profile = determine_provider(endpoint, self.lifetimes)?;
        self.sign_for_profile(endpoint, &profile)
    }

    /// Sign an assertion for `endpoint` with an already-resolved provider profile.
    pub fn sign_for_profile(
        &self,
        endpoint: &str,
        profile: &ProviderProfile,
    ) -> PushResult<Assertion> {
        let mut assertion = sign(
            &self.keys,
            &self.subject,
            endpoint,
            profile.audience.audience(),
            profile.token_ttl,
        )?;
        assertion.urgency = profile.urgency;
        Ok(assertion)
    }
}
