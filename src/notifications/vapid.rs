//! VAPID key management for Web Push (RFC 8292).
//!
//! One P-256 ECDSA keypair per installation. The browser embeds the public
//! key in every subscription it creates, so the pair must survive restarts
//! unchanged: regenerating it silently invalidates every stored subscriber.
//!
//! The pair is kept in a small JSON file created with owner-only
//! permissions:
//!
//! ```text
//! vapid_keys.json   (0600)
//! {
//!   "private_key": "<32-byte scalar, base64url>",
//!   "public_key":  "<65-byte uncompressed point, base64url>"
//! }
//! ```

// Rust guideline compliant 2026-02

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use base64::{engine::general_purpose::URL_SAFE_NO_PAD as BASE64URL, Engine};
use p256::ecdsa::{SigningKey, VerifyingKey};
use p256::elliptic_curve::rand_core::OsRng;
use serde::{Deserialize, Serialize};

use crate::error::{PushError, PushResult};

/// Width of a P-256 private scalar in bytes.
const SCALAR_LEN: usize = 32;

/// Length of an uncompressed SEC1 P-256 point (0x04 || x || y).
const PUBLIC_KEY_LEN: usize = 65;

/// Distinguishes staging files written by threads of one process.
static STAGING_COUNTER: AtomicU64 = AtomicU64::new(0);

/// On-disk representation of the keypair.
#[derive(Debug, Serialize, Deserialize)]
struct StoredKeys {
    private_key: String,
    public_key: String,
}

/// VAPID keypair for web push authentication.
///
/// Immutable once constructed. Cheap to share behind an `Arc`; every read
/// is lock-free.
#[derive(Clone)]
pub struct VapidKeys {
    signing_key: SigningKey,
    public_key: [u8; PUBLIC_KEY_LEN],
    public_key_b64: String,
}

impl std::fmt::Debug for VapidKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VapidKeys")
            .field("public_key", &self.public_key_b64)
            .finish_non_exhaustive()
    }
}

impl VapidKeys {
    /// Generate a fresh keypair from the OS CSPRNG.
    pub fn generate() -> Self {
        Self::from_signing_key(SigningKey::random(&mut OsRng))
    }

    fn from_signing_key(signing_key: SigningKey) -> Self {
        let point = signing_key.verifying_key().to_encoded_point(false);
        let mut public_key = [0u8; PUBLIC_KEY_LEN];
        public_key.copy_from_slice(point.as_bytes());
        let public_key_b64 = BASE64URL.encode(public_key);

        Self {
            signing_key,
            public_key,
            public_key_b64,
        }
    }

    /// Reconstruct from base64url-encoded halves.
    ///
    /// A private scalar shorter than 32 bytes is left-padded with zeros
    /// (some generators strip leading zero bytes). The public point must be
    /// the one derived from the scalar.
    pub fn from_base64url(private_key_b64: &str, public_key_b64: &str) -> Result<Self, String> {
        let priv_bytes = BASE64URL
            .decode(private_key_b64.trim_end_matches('='))
            .map_err(|e| format!("private key is not base64url: {e}"))?;
        let scalar = pad_scalar(&priv_bytes)?;
        let signing_key = SigningKey::from_slice(&scalar)
            .map_err(|e| format!("private key is not a valid P-256 scalar: {e}"))?;

        let pub_bytes = BASE64URL
            .decode(public_key_b64.trim_end_matches('='))
            .map_err(|e| format!("public key is not base64url: {e}"))?;
        if pub_bytes.len() != PUBLIC_KEY_LEN || pub_bytes[0] != 0x04 {
            return Err(format!(
                "public key must be a {PUBLIC_KEY_LEN}-byte uncompressed P-256 point, got {} bytes",
                pub_bytes.len()
            ));
        }
        VerifyingKey::from_sec1_bytes(&pub_bytes)
            .map_err(|e| format!("public key is not on the P-256 curve: {e}"))?;

        let keys = Self::from_signing_key(signing_key);
        if keys.public_key.as_slice() != pub_bytes.as_slice() {
            return Err("public key does not match private key".to_string());
        }
        Ok(keys)
    }

    /// Uncompressed public key bytes (65 bytes).
    pub fn public_key(&self) -> &[u8] {
        &self.public_key
    }

    /// Base64url-encoded uncompressed public key.
    ///
    /// This is the `applicationServerKey` handed to browsers at subscribe
    /// time and the `k=` parameter of every Authorization header.
    pub fn public_key_base64url(&self) -> &str {
        &self.public_key_b64
    }

    /// Base64url-encoded raw 32-byte private scalar.
    pub fn private_key_base64url(&self) -> String {
        BASE64URL.encode(self.signing_key.to_bytes().as_slice())
    }

    fn to_stored(&self) -> StoredKeys {
        StoredKeys {
            private_key: self.private_key_base64url(),
            public_key: self.public_key_b64.clone(),
        }
    }
}

/// Left-pad a big-endian scalar to the curve's field width.
fn pad_scalar(bytes: &[u8]) -> Result<[u8; SCALAR_LEN], String> {
    if bytes.is_empty() || bytes.len() > SCALAR_LEN {
        return Err(format!(
            "private key must be at most {SCALAR_LEN} bytes, got {}",
            bytes.len()
        ));
    }
    let mut scalar = [0u8; SCALAR_LEN];
    scalar[SCALAR_LEN - bytes.len()..].copy_from_slice(bytes);
    Ok(scalar)
}

/// File-backed owner of the installation's single keypair.
#[derive(Debug, Clone)]
pub struct KeyStore {
    path: PathBuf,
}

impl KeyStore {
    /// Key store rooted at `path`. Nothing is read until [`Self::load_or_create`].
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the key file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the persisted keypair, or generate and persist one.
    ///
    /// The key file only ever appears fully written: keys are staged in a
    /// sibling file and hard-linked into place. If another process wins
    /// the race, its keys are loaded instead of being overwritten.
    pub fn load_or_create(&self) -> PushResult<VapidKeys> {
        if self.path.exists() {
            let keys = self.load()?;
            log::info!("[WebPush] Loaded existing VAPID keys from {:?}", self.path);
            return Ok(keys);
        }

        log::info!("[WebPush] Generating new VAPID keys...");
        let keys = VapidKeys::generate();
        match self.persist(&keys) {
            Ok(()) => {
                log::info!("[WebPush] Generated new VAPID keys and saved to {:?}", self.path);
                log::info!("[WebPush] Public key: {}", keys.public_key_base64url());
                Ok(keys)
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                log::info!("[WebPush] Key file appeared concurrently, loading it instead");
                self.load()
            }
            Err(source) => Err(PushError::KeyStoreIo {
                path: self.path.clone(),
                source,
            }),
        }
    }

    fn load(&self) -> PushResult<VapidKeys> {
        let content = fs::read_to_string(&self.path).map_err(|source| PushError::KeyStoreIo {
            path: self.path.clone(),
            source,
        })?;
        let stored: StoredKeys =
            serde_json::from_str(&content).map_err(|e| self.corrupt(format!("invalid JSON: {e}")))?;
        VapidKeys::from_base64url(&stored.private_key, &stored.public_key)
            .map_err(|reason| self.corrupt(reason))
    }

    fn persist(&self, keys: &VapidKeys) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(&keys.to_stored())?;

        let staging = self.staging_path();
        let result = write_owner_only(&staging, content.as_bytes())
            .and_then(|()| fs::hard_link(&staging, &self.path));
        if let Err(e) = fs::remove_file(&staging) {
            if e.kind() != ErrorKind::NotFound {
                log::warn!("[WebPush] Failed to remove staging file {:?}: {}", staging, e);
            }
        }
        result
    }

    /// Unique sibling of the key file, so the final link stays on one filesystem.
    fn staging_path(&self) -> PathBuf {
        let name = self
            .path
            .file_name()
            .map_or_else(|| "vapid_keys".into(), |n| n.to_string_lossy());
        let seq = STAGING_COUNTER.fetch_add(1, Ordering::Relaxed);
        self.path
            .with_file_name(format!(".{name}.{}.{seq}.tmp", std::process::id()))
    }

    fn corrupt(&self, reason: String) -> PushError {
        PushError::CorruptKeyStore {
            path: self.path.clone(),
            reason,
        }
    }
}

/// Create `path` exclusively with owner-only permissions and flush `content`.
fn write_owner_only(path: &Path, content: &[u8]) -> std::io::Result<()> {
    let mut options = fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(path)?;
    file.write_all(content)?;
    file.sync_all()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_vapid_keys() {
        let keys = VapidKeys::generate();

        let pub_bytes = BASE64URL.decode(keys.public_key_base64url()).expect("decode public key");
        assert_eq!(pub_bytes.len(), 65, "uncompressed P-256 public key is 65 bytes");
        assert_eq!(pub_bytes[0], 0x04, "uncompressed point starts with 0x04");
        assert_eq!(keys.public_key(), pub_bytes.as_slice());

        let priv_bytes = BASE64URL
            .decode(keys.private_key_base64url())
            .expect("decode private key");
        assert_eq!(priv_bytes.len(), 32, "raw P-256 scalar is 32 bytes");
    }

    #[test]
    fn test_from_base64url_roundtrip() {
        let keys = VapidKeys::generate();
        let reconstructed =
            VapidKeys::from_base64url(&keys.private_key_base64url(), keys.public_key_base64url())
                .expect("should reconstruct from base64url");

        assert_eq!(keys.public_key_base64url(), reconstructed.public_key_base64url());
        assert_eq!(keys.private_key_base64url(), reconstructed.private_key_base64url());
    }

    #[test]
    fn test_short_scalar_is_zero_padded() {
        // Scalar 1 encoded minimally: the generator point is the public key.
        let short = BASE64URL.encode([1u8]);
        let mut full = [0u8; 32];
        full[31] = 1;
        let expected = VapidKeys::from_signing_key(SigningKey::from_slice(&full).expect("scalar"));

        let keys = VapidKeys::from_base64url(&short, expected.public_key_base64url())
            .expect("short scalar should be accepted");
        assert_eq!(keys.private_key_base64url(), BASE64URL.encode(full));
        assert_eq!(BASE64URL.decode(keys.private_key_base64url()).unwrap().len(), 32);
    }

    #[test]
    fn test_from_base64url_rejects_mismatched_public_key() {
        let a = VapidKeys::generate();
        let b = VapidKeys::generate();
        let err = VapidKeys::from_base64url(&a.private_key_base64url(), b.public_key_base64url())
            .expect_err("mismatched pair must be rejected");
        assert!(err.contains("does not match"), "got: {err}");
    }

    #[test]
    fn test_from_base64url_rejects_invalid() {
        assert!(VapidKeys::from_base64url("also-bad!", "not-valid-key").is_err());
        assert!(VapidKeys::from_base64url(&BASE64URL.encode([7u8; 33]), "AAAA").is_err());
    }

    #[test]
    fn test_load_or_create_persists_once() {
        let dir = tempfile::tempdir().unwrap();
        let store = KeyStore::new(dir.path().join("vapid_keys.json"));

        let first = store.load_or_create().expect("create keys");
        assert!(store.path().exists());
        let second = store.load_or_create().expect("load keys");

        assert_eq!(first.public_key_base64url(), second.public_key_base64url());
        assert_eq!(first.private_key_base64url(), second.private_key_base64url());
    }

    #[test]
    fn test_concurrent_first_start_agrees_on_one_keypair() {
        for _ in 0..25 {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("vapid_keys.json");

            let handles: Vec<_> = (0..4)
                .map(|_| {
                    let store = KeyStore::new(&path);
                    std::thread::spawn(move || store.load_or_create())
                })
                .collect();
            let public_keys: Vec<String> = handles
                .into_iter()
                .map(|h| h.join().unwrap().expect("no caller sees a partial key file"))
                .map(|keys| keys.public_key_base64url().to_string())
                .collect();

            assert!(public_keys.windows(2).all(|w| w[0] == w[1]), "{public_keys:?}");
            let leftovers: Vec<_> = fs::read_dir(dir.path())
                .unwrap()
                .map(|e| e.unwrap().file_name())
                .collect();
            assert_eq!(leftovers, vec![std::ffi::OsString::from("vapid_keys.json")]);
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_key_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let store = KeyStore::new(dir.path().join("nested/vapid_keys.json"));
        store.load_or_create().expect("create keys");

        let mode = fs::metadata(store.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_malformed_key_file_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vapid_keys.json");
        fs::write(&path, "{ not json").unwrap();

        let err = KeyStore::new(&path).load_or_create().unwrap_err();
        assert!(matches!(err, PushError::CorruptKeyStore { .. }), "got: {err}");
        // The corrupt file must not be replaced with fresh keys.
        assert_eq!(fs::read_to_string(&path).unwrap(), "{ not json");
    }

    #[test]
    fn test_key_file_with_bad_scalar_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vapid_keys.json");
        let keys = VapidKeys::generate();
        let content = serde_json::json!({
            "private_key": BASE64URL.encode([0u8; 32]),
            "public_key": keys.public_key_base64url(),
        });
        fs::write(&path, content.to_string()).unwrap();

        let err = KeyStore::new(&path).load_or_create().unwrap_err();
        assert!(matches!(err, PushError::CorruptKeyStore { .. }), "got: {err}");
    }
}
