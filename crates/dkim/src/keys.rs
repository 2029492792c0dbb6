use crate::DKIMError;
use base64::engine::general_purpose;
use base64::Engine;
use chrono::{DateTime, Utc};
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs8::{DecodePrivateKey, EncodePublicKey};
use rsa::RsaPrivateKey;
use std::fmt;
use std::sync::Arc;

pub const DEFAULT_KEY_BITS: usize = 2048;
const ALLOWED_KEY_BITS: &[usize] = &[1024, 2048, 4096];

/// Keys whose expiry falls inside this window count as rotation
/// candidates even if they are younger than the rotation age.
const EXPIRY_ROTATION_WINDOW_DAYS: i64 = 7;

/// A signing keypair owned by a domain.
///
/// At most one key per (domain, selector) should be active at a time;
/// that bookkeeping belongs to the key store behind [KeyProvider].
/// The private half is deliberately unreachable outside the signing
/// path and never appears in Debug output or error text.
#[derive(Clone)]
pub struct DkimKey {
    pub id: String,
    pub domain: String,
    pub selector: String,
    private_key: RsaPrivateKey,
    /// SPKI DER of the public half; empty marks the key revoked
    pub public_key: Vec<u8>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl fmt::Debug for DkimKey {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        fmt.debug_struct("DkimKey")
            .field("id", &self.id)
            .field("domain", &self.domain)
            .field("selector", &self.selector)
            .field("is_active", &self.is_active)
            .field("created_at", &self.created_at)
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}

fn validate_selector(selector: &str) -> Result<(), DKIMError> {
    if selector.is_empty()
        || !selector
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(DKIMError::InvalidSelector(selector.to_string()));
    }
    Ok(())
}

impl DkimKey {
    /// Generate a fresh RSA keypair for (domain, selector).
    ///
    /// The new key comes back inactive; activation is a key-store
    /// decision.
    pub fn generate(domain: &str, selector: &str, bits: usize) -> Result<Self, DKIMError> {
        validate_selector(selector)?;
        if !ALLOWED_KEY_BITS.contains(&bits) {
            return Err(DKIMError::UnsupportedKeySize(bits));
        }

        let mut rng = rand::rngs::OsRng;
        let private_key = RsaPrivateKey::new(&mut rng, bits)
            .map_err(|err| DKIMError::KeyGenerationFailed(err.to_string()))?;
        let public_key = private_key
            .to_public_key()
            .to_public_key_der()
            .map_err(|err| DKIMError::KeyGenerationFailed(err.to_string()))?
            .as_bytes()
            .to_vec();

        Ok(Self {
            id: uuid::Uuid::new_v4().to_string(),
            domain: domain.to_string(),
            selector: selector.to_string(),
            private_key,
            public_key,
            is_active: false,
            created_at: Utc::now(),
            expires_at: None,
        })
    }

    /// Wrap an existing private key, deriving the published half.
    pub fn from_private_key(
        domain: &str,
        selector: &str,
        private_key: RsaPrivateKey,
    ) -> Result<Self, DKIMError> {
        validate_selector(selector)?;
        let public_key = private_key
            .to_public_key()
            .to_public_key_der()
            .map_err(|err| DKIMError::PrivateKeyLoadError(err.to_string()))?
            .as_bytes()
            .to_vec();

        Ok(Self {
            id: uuid::Uuid::new_v4().to_string(),
            domain: domain.to_string(),
            selector: selector.to_string(),
            private_key,
            public_key,
            is_active: false,
            created_at: Utc::now(),
            expires_at: None,
        })
    }

    pub(crate) fn private_key(&self) -> &RsaPrivateKey {
        &self.private_key
    }

    pub fn is_revoked(&self) -> bool {
        self.public_key.is_empty()
    }

    /// The value of the TXT record to publish for this key.
    pub fn txt_value(&self) -> String {
        format!(
            "v=DKIM1; k=rsa; p={}",
            general_purpose::STANDARD.encode(&self.public_key)
        )
    }

    /// A zone-file style line for the record. Providers that require
    /// 255-octet chunking can split the quoted string; this emits the
    /// one logical record.
    pub fn dns_record(&self) -> String {
        format!(
            "{}._domainkey.{}. TXT \"{}\"",
            self.selector,
            self.domain,
            self.txt_value()
        )
    }
}

/// Parse RSA private key material, accepting PKCS#1 or PKCS#8 in
/// either DER or PEM.
pub fn parse_private_key(data: &[u8]) -> Result<RsaPrivateKey, DKIMError> {
    let mut errors = vec![];

    match RsaPrivateKey::from_pkcs1_der(data) {
        Ok(key) => return Ok(key),
        Err(err) => errors.push(format!("from_pkcs1_der: {err:#}")),
    }
    match RsaPrivateKey::from_pkcs8_der(data) {
        Ok(key) => return Ok(key),
        Err(err) => errors.push(format!("from_pkcs8_der: {err:#}")),
    }

    match std::str::from_utf8(data) {
        Ok(s) => {
            match RsaPrivateKey::from_pkcs1_pem(s) {
                Ok(key) => return Ok(key),
                Err(err) => errors.push(format!("from_pkcs1_pem: {err:#}")),
            }
            match RsaPrivateKey::from_pkcs8_pem(s) {
                Ok(key) => return Ok(key),
                Err(err) => errors.push(format!("from_pkcs8_pem: {err:#}")),
            }
        }
        Err(err) => errors.push(format!("from_pkcs1_pem: data is not UTF-8: {err:#}")),
    }

    Err(DKIMError::PrivateKeyLoadError(errors.join(". ")))
}

/// Load RSA private key material from a file
pub fn private_key_from_file<P: AsRef<std::path::Path>>(path: P) -> Result<RsaPrivateKey, DKIMError> {
    let path = path.as_ref();
    let data = std::fs::read(path).map_err(|err| {
        DKIMError::PrivateKeyLoadError(format!("failed to read file {path:?}: {err:#}"))
    })?;
    parse_private_key(&data)
}

/// The active keys that are due for replacement: older than
/// `rotation_age`, or expiring within the next seven days.
pub fn rotation_candidates<'a>(
    keys: &'a [DkimKey],
    rotation_age: chrono::Duration,
) -> Vec<&'a DkimKey> {
    rotation_candidates_at(keys, rotation_age, Utc::now())
}

fn rotation_candidates_at(
    keys: &[DkimKey],
    rotation_age: chrono::Duration,
    now: DateTime<Utc>,
) -> Vec<&DkimKey> {
    let expiry_window = chrono::Duration::try_days(EXPIRY_ROTATION_WINDOW_DAYS)
        .expect("window to be in-range");

    keys.iter()
        .filter(|key| {
            if !key.is_active {
                return false;
            }
            if now - key.created_at >= rotation_age {
                return true;
            }
            match key.expires_at {
                Some(expires_at) => expires_at - now <= expiry_window,
                None => false,
            }
        })
        .collect()
}

/// Source of signing keys, backed by whatever stores the domain
/// configuration. Called once per signed message; implementations are
/// expected to be cheap and safe for concurrent use.
pub trait KeyProvider: Send + Sync {
    fn get_active_dkim_key(&self, domain: &str) -> Option<Arc<DkimKey>>;
}
