use crate::error::TorError;
use base32::{self, Alphabet};
use base64::Engine;
use ed25519_dalek::{hazmat::ExpandedSecretKey, VerifyingKey};
use sha3::{Digest, Sha3_256};
use std::{fmt, str::FromStr};
use strum::{Display, EnumString};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

/// Key algorithms understood by `ADD_ONION`
#[derive(Clone, Copy, Debug, PartialEq, Eq, Display, EnumString)]
pub enum OnionKeyAlgorithm {
    #[strum(serialize = "RSA1024")]
    Rsa1024,
    #[strum(serialize = "ED25519-V3")]
    Ed25519V3,
}

/// An onion service private key in Tor's `<algorithm>:<base64 blob>` form.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct OnionPrivateKey {
    #[zeroize(skip)]
    algorithm: OnionKeyAlgorithm,
    blob: String,
}

impl OnionPrivateKey {
    pub fn algorithm(&self) -> OnionKeyAlgorithm {
        self.algorithm
    }

    /// The v3 service id this key serves, if it is a well-formed ED25519-V3 key.
    pub fn service_id(&self) -> Option<String> {
        if self.algorithm != OnionKeyAlgorithm::Ed25519V3 {
            return None;
        }
        let blob = Zeroizing::new(
            base64::engine::general_purpose::STANDARD
                .decode(&self.blob)
                .ok()?,
        );
        let bytes: Zeroizing<[u8; 64]> = Zeroizing::new(blob.as_slice().try_into().ok()?);
        let expanded_secret_key = ExpandedSecretKey::from_bytes(&bytes);
        Some(tor_service_id(&VerifyingKey::from(&expanded_secret_key)))
    }
}

impl FromStr for OnionPrivateKey {
    type Err = TorError;

    fn from_str(key: &str) -> Result<Self, Self::Err> {
        let (algorithm, blob) = key
            .split_once(':')
            .ok_or_else(|| TorError::InvalidPrivateKey("expected <algorithm>:<blob>".into()))?;
        let algorithm = OnionKeyAlgorithm::from_str(algorithm).map_err(|_| {
            TorError::InvalidPrivateKey(format!("unknown key algorithm {}", algorithm))
        })?;
        if blob.is_empty() {
            return Err(TorError::InvalidPrivateKey("empty key blob".into()));
        }
        Ok(Self {
            algorithm,
            blob: blob.to_string(),
        })
    }
}

impl fmt::Debug for OnionPrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("OnionPrivateKey")
            .field("algorithm", &self.algorithm)
            .field("blob", &"<redacted>")
            .finish()
    }
}

/// The v3 onion service id (without `.onion`) for an ed25519 public key.
pub fn tor_service_id(verifying_key: &VerifyingKey) -> String {
    const VERSION: u8 = 3;

    let mut hasher = Sha3_256::new();
    hasher.update(b".onion checksum");
    hasher.update(verifying_key.as_bytes());
    hasher.update([VERSION]);
    let checksum = hasher.finalize();

    let mut onion_bytes = verifying_key.as_bytes().to_vec();
    onion_bytes.extend_from_slice(&checksum[..2]);
    onion_bytes.push(VERSION);
    base32::encode(Alphabet::RFC4648 { padding: false }, &onion_bytes).to_lowercase()
}
