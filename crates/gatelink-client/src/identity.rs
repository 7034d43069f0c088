//! Device identity for the signed handshake.
//!
//! A device is an Ed25519 keypair. Its id is the hex SHA-256 of the raw
//! 32-byte public key; keys and signatures travel as unpadded base64url.
//!
//! [`FileIdentityStore`] persists the keypair as JSON with 0o600 permissions
//! and regenerates it when the file is missing or unreadable.
//! [`EphemeralIdentity`] keeps a key for the life of the process.

use std::fmt;
use std::path::{Path, PathBuf};

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use ed25519_dalek::{Signer, SigningKey};
use parking_lot::Mutex;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

/// Errors from loading, persisting, or using a device identity.
#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    /// File I/O failed.
    #[error("identity I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// The identity file could not be (de)serialized.
    #[error("identity JSON error: {0}")]
    Json(#[from] serde_json::Error),
    /// A stored key is malformed.
    #[error("invalid identity key: {0}")]
    InvalidKey(String),
    /// The file was written by a newer or unknown store format.
    #[error("unsupported identity version {0}")]
    UnsupportedVersion(u32),
}

/// A loaded device keypair.
#[derive(Clone)]
pub struct DeviceIdentity {
    device_id: String,
    public_key: String,
    signing_key: SigningKey,
}

impl DeviceIdentity {
    /// Generate a fresh random keypair.
    pub fn generate() -> Self {
        let mut seed = [0u8; 32];
        rand::rng().fill_bytes(&mut seed);
        Self::from_seed(seed)
    }

    /// Build from a 32-byte private key seed.
    pub fn from_seed(seed: [u8; 32]) -> Self {
        let signing_key = SigningKey::from_bytes(&seed);
        let public = signing_key.verifying_key().to_bytes();
        Self {
            device_id: device_id_for(&public),
            public_key: URL_SAFE_NO_PAD.encode(public),
            signing_key,
        }
    }

    /// Hex SHA-256 of the raw public key.
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Base64url raw public key.
    pub fn public_key(&self) -> &str {
        &self.public_key
    }

    /// Sign `payload`, returning a base64url signature.
    pub fn sign(&self, payload: &[u8]) -> String {
        URL_SAFE_NO_PAD.encode(self.signing_key.sign(payload).to_bytes())
    }

    fn seed_b64(&self) -> String {
        URL_SAFE_NO_PAD.encode(self.signing_key.to_bytes())
    }
}

impl fmt::Debug for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceIdentity")
            .field("device_id", &self.device_id)
            .field("public_key", &self.public_key)
            .finish_non_exhaustive()
    }
}

/// Hex SHA-256 of a raw public key.
pub fn device_id_for(public_key: &[u8]) -> String {
    format!("{:x}", Sha256::digest(public_key))
}

/// Source of the device keypair used to sign handshakes.
pub trait DeviceIdentityProvider: Send + Sync {
    /// Load the existing keypair, creating one if none exists.
    fn load_or_create(&self) -> Result<DeviceIdentity, IdentityError>;

    /// Sign a payload with the identity's private key.
    fn sign(&self, identity: &DeviceIdentity, payload: &[u8]) -> Result<String, IdentityError> {
        Ok(identity.sign(payload))
    }
}

/// In-memory identity, stable for the provider's lifetime.
#[derive(Debug)]
pub struct EphemeralIdentity {
    identity: DeviceIdentity,
}

impl EphemeralIdentity {
    /// Generate a new in-memory identity.
    pub fn new() -> Self {
        Self {
            identity: DeviceIdentity::generate(),
        }
    }
}

impl Default for EphemeralIdentity {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceIdentityProvider for EphemeralIdentity {
    fn load_or_create(&self) -> Result<DeviceIdentity, IdentityError> {
        Ok(self.identity.clone())
    }
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredIdentity {
    version: u32,
    device_id: String,
    public_key: String,
    private_key: String,
    created_at_ms: i64,
}

const STORE_VERSION: u32 = 1;

/// Identity persisted to a JSON file.
pub struct FileIdentityStore {
    path: PathBuf,
    cached: Mutex<Option<DeviceIdentity>>,
}

impl FileIdentityStore {
    /// Store backed by `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            cached: Mutex::new(None),
        }
    }

    /// Backing file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> Result<Option<DeviceIdentity>, IdentityError> {
        let data = match std::fs::read_to_string(&self.path) {
            Ok(d) => d,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let stored: StoredIdentity = serde_json::from_str(&data)?;
        if stored.version != STORE_VERSION {
            return Err(IdentityError::UnsupportedVersion(stored.version));
        }
        let seed: [u8; 32] = URL_SAFE_NO_PAD
            .decode(stored.private_key.as_bytes())
            .map_err(|e| IdentityError::InvalidKey(e.to_string()))?
            .try_into()
            .map_err(|_| IdentityError::InvalidKey("private key must be 32 bytes".into()))?;
        let identity = DeviceIdentity::from_seed(seed);
        if identity.device_id != stored.device_id {
            return Err(IdentityError::InvalidKey(
                "device id does not match stored key".into(),
            ));
        }
        Ok(Some(identity))
    }

    fn write(&self, identity: &DeviceIdentity) -> Result<(), IdentityError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let stored = StoredIdentity {
            version: STORE_VERSION,
            device_id: identity.device_id.clone(),
            public_key: identity.public_key.clone(),
            private_key: identity.seed_b64(),
            created_at_ms: chrono::Utc::now().timestamp_millis(),
        };
        std::fs::write(&self.path, serde_json::to_string_pretty(&stored)?)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let _ = std::fs::set_permissions(&self.path, std::fs::Permissions::from_mode(0o600));
        }
        Ok(())
    }
}

impl DeviceIdentityProvider for FileIdentityStore {
    fn load_or_create(&self) -> Result<DeviceIdentity, IdentityError> {
        let mut cached = self.cached.lock();
        if let Some(identity) = cached.as_ref() {
            return Ok(identity.clone());
        }
        let identity = match self.read() {
            Ok(Some(identity)) => {
                debug!(path = ?self.path, device_id = identity.device_id(), "loaded device identity");
                identity
            }
            Ok(None) => {
                let identity = DeviceIdentity::generate();
                self.write(&identity)?;
                info!(path = ?self.path, device_id = identity.device_id(), "created device identity");
                identity
            }
            Err(e @ (IdentityError::Json(_) | IdentityError::InvalidKey(_))) => {
                warn!(path = ?self.path, error = %e, "corrupt device identity, regenerating");
                let identity = DeviceIdentity::generate();
                self.write(&identity)?;
                identity
            }
            Err(e) => return Err(e),
        };
        *cached = Some(identity.clone());
        Ok(identity)
    }
}

/// Fields bound into the handshake signature.
#[derive(Clone, Debug)]
pub struct SignedPayload<'a> {
    /// Device id.
    pub device_id: &'a str,
    /// Client id.
    pub client_id: &'a str,
    /// Client mode.
    pub client_mode: &'a str,
    /// Role.
    pub role: &'a str,
    /// Scopes.
    pub scopes: &'a [String],
    /// Signing time in epoch milliseconds.
    pub signed_at_ms: i64,
    /// Auth token, if any.
    pub token: Option<&'a str>,
    /// Server nonce.
    pub nonce: &'a str,
}

impl SignedPayload<'_> {
    /// `v2|deviceId|clientId|clientMode|role|scopes|signedAtMs|token|nonce`.
    pub fn canonical(&self) -> String {
        let scopes = self.scopes.join(",");
        let signed_at = self.signed_at_ms.to_string();
        [
            "v2",
            self.device_id,
            self.client_id,
            self.client_mode,
            self.role,
            scopes.as_str(),
            signed_at.as_str(),
            self.token.unwrap_or(""),
            self.nonce,
        ]
        .join("|")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::{Signature, Verifier, VerifyingKey};

    fn verify(identity: &DeviceIdentity, payload: &[u8], sig_b64: &str) -> bool {
        let public: [u8; 32] = URL_SAFE_NO_PAD
            .decode(identity.public_key())
            .unwrap()
            .try_into()
            .unwrap();
        let key = VerifyingKey::from_bytes(&public).unwrap();
        let sig: [u8; 64] = URL_SAFE_NO_PAD.decode(sig_b64).unwrap().try_into().unwrap();
        key.verify(payload, &Signature::from_bytes(&sig)).is_ok()
    }

    #[test]
    fn device_id_is_sha256_of_public_key() {
        let identity = DeviceIdentity::from_seed([7u8; 32]);
        let raw = URL_SAFE_NO_PAD.decode(identity.public_key()).unwrap();
        assert_eq!(raw.len(), 32);
        assert_eq!(identity.device_id(), device_id_for(&raw));
        assert_eq!(identity.device_id().len(), 64);
    }

    #[test]
    fn signature_verifies() {
        let identity = DeviceIdentity::generate();
        let sig = identity.sign(b"hello");
        assert!(verify(&identity, b"hello", &sig));
        assert!(!verify(&identity, b"hellp", &sig));
    }

    #[test]
    fn same_seed_same_identity() {
        let a = DeviceIdentity::from_seed([1u8; 32]);
        let b = DeviceIdentity::from_seed([1u8; 32]);
        assert_eq!(a.device_id(), b.device_id());
        assert_eq!(a.sign(b"x"), b.sign(b"x"));
    }

    #[test]
    fn debug_hides_private_key() {
        let identity = DeviceIdentity::from_seed([2u8; 32]);
        let debug = format!("{identity:?}");
        assert!(debug.contains(identity.device_id()));
        assert!(!debug.contains(&identity.seed_b64()));
    }

    #[test]
    fn ephemeral_is_stable() {
        let provider = EphemeralIdentity::new();
        let a = provider.load_or_create().unwrap();
        let b = provider.load_or_create().unwrap();
        assert_eq!(a.device_id(), b.device_id());
    }

    #[test]
    fn file_store_creates_then_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("identity").join("device.json");

        let first = FileIdentityStore::new(&path).load_or_create().unwrap();
        assert!(path.exists());
        let second = FileIdentityStore::new(&path).load_or_create().unwrap();
        assert_eq!(first.device_id(), second.device_id());

        let stored: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(stored["version"], 1);
        assert_eq!(stored["deviceId"], first.device_id());
    }

    #[cfg(unix)]
    #[test]
    fn file_store_restricts_permissions() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("device.json");
        let _ = FileIdentityStore::new(&path).load_or_create().unwrap();
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn file_store_regenerates_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("device.json");
        std::fs::write(&path, "garbage").unwrap();
        let identity = FileIdentityStore::new(&path).load_or_create().unwrap();
        let reloaded = FileIdentityStore::new(&path).load_or_create().unwrap();
        assert_eq!(identity.device_id(), reloaded.device_id());
    }

    #[test]
    fn file_store_regenerates_mismatched_device_id() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("device.json");
        let first = FileIdentityStore::new(&path).load_or_create().unwrap();

        let mut stored: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        stored["deviceId"] = "not-this-key".into();
        std::fs::write(&path, stored.to_string()).unwrap();

        let second = FileIdentityStore::new(&path).load_or_create().unwrap();
        assert_ne!(first.device_id(), second.device_id());
    }

    #[test]
    fn file_store_keeps_unknown_version() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("device.json");
        let contents = r#"{"version":2,"deviceId":"d","publicKey":"p","privateKey":"k","createdAtMs":0}"#;
        std::fs::write(&path, contents).unwrap();

        let err = FileIdentityStore::new(&path).load_or_create().unwrap_err();
        assert!(matches!(err, IdentityError::UnsupportedVersion(2)));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), contents);
    }

    #[test]
    fn file_store_propagates_io_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("device.json");
        std::fs::create_dir(&path).unwrap();

        let err = FileIdentityStore::new(&path).load_or_create().unwrap_err();
        assert!(matches!(err, IdentityError::Io(_)));
        assert!(path.is_dir());
    }

    #[test]
    fn canonical_payload_layout() {
        let scopes = vec!["operator.read".to_string(), "operator.write".to_string()];
        let payload = SignedPayload {
            device_id: "dev",
            client_id: "gatelink-cli",
            client_mode: "cli",
            role: "operator",
            scopes: &scopes,
            signed_at_ms: 1_700_000_000_000,
            token: Some("tok"),
            nonce: "abc123",
        };
        assert_eq!(
            payload.canonical(),
            "v2|dev|gatelink-cli|cli|operator|operator.read,operator.write|1700000000000|tok|abc123"
        );
    }

    #[test]
    fn canonical_payload_without_token() {
        let payload = SignedPayload {
            device_id: "d",
            client_id: "c",
            client_mode: "m",
            role: "r",
            scopes: &[],
            signed_at_ms: 1,
            token: None,
            nonce: "n",
        };
        assert_eq!(payload.canonical(), "v2|d|c|m|r||1||n");
    }
}
