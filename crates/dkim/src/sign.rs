use crate::canonicalization;
use crate::hash;
use crate::header::{DkimHeader, DkimHeaderBuilder, DKIM_SIGNATURE_HEADER_NAME};
use crate::keys::{DkimKey, KeyProvider};
use crate::{DKIMError, ParsedEmail};
use base64::engine::general_purpose;
use base64::Engine;
use dns_resolver::Name;
use rsa::{Pkcs1v15Sign, RsaPrivateKey};
use sha2::Sha256;
use std::collections::HashMap;

/// The headers offered for signing when the caller does not say
/// otherwise; each is only included when the message carries it.
pub const DEFAULT_SIGNED_HEADERS: &[&str] = &[
    "from",
    "to",
    "cc",
    "subject",
    "date",
    "message-id",
    "reply-to",
    "references",
    "in-reply-to",
    "content-type",
    "mime-version",
];

const DEFAULT_EXPIRE_AFTER_DAYS: i64 = 7;

/// Per-call signing options for [sign_message].
#[derive(Clone, Debug)]
pub struct SignatureConfig {
    /// Headers to sign, in order; duplicate names sign multiple
    /// instances of that header. `from` must be present.
    pub headers: Vec<String>,
    pub header_canonicalization: canonicalization::Type,
    pub body_canonicalization: canonicalization::Type,
    /// Emit l= and hash only this many canonical body bytes; 0 means
    /// the whole body.
    pub body_length_limit: usize,
    /// Emit x= this far after the signing timestamp; None omits x=.
    pub expire_after: Option<chrono::Duration>,
    /// Optional i= agent identity; its domain must be the signing
    /// domain or a subdomain of it.
    pub identity: Option<String>,
}

impl Default for SignatureConfig {
    fn default() -> Self {
        Self {
            headers: DEFAULT_SIGNED_HEADERS
                .iter()
                .map(|h| h.to_string())
                .collect(),
            header_canonicalization: canonicalization::Type::Relaxed,
            body_canonicalization: canonicalization::Type::Relaxed,
            body_length_limit: 0,
            expire_after: chrono::Duration::try_days(DEFAULT_EXPIRE_AFTER_DAYS),
            identity: None,
        }
    }
}

/// Builder for the Signer
pub struct SignerBuilder {
    signed_headers: Option<Vec<String>>,
    private_key: Option<RsaPrivateKey>,
    selector: Option<String>,
    signing_domain: Option<String>,
    identity: Option<String>,
    time: Option<chrono::DateTime<chrono::Utc>>,
    header_canonicalization: canonicalization::Type,
    body_canonicalization: canonicalization::Type,
    body_length_limit: Option<usize>,
    expiry: Option<chrono::Duration>,
}

impl SignerBuilder {
    pub fn new() -> Self {
        Self {
            signed_headers: None,
            private_key: None,
            selector: None,
            signing_domain: None,
            identity: None,
            expiry: None,
            time: None,
            body_length_limit: None,

            header_canonicalization: canonicalization::Type::Simple,
            body_canonicalization: canonicalization::Type::Simple,
        }
    }

    /// Specify headers to be used in the DKIM signature.
    /// The From header is required.
    pub fn with_signed_headers(
        mut self,
        headers: impl IntoIterator<Item = impl Into<String>>,
    ) -> Result<Self, DKIMError> {
        let headers: Vec<String> = headers
            .into_iter()
            .map(|h| h.into().to_lowercase())
            .collect();

        if !headers.iter().any(|h| h == "from") {
            return Err(DKIMError::BuilderError("missing From in signed headers"));
        }

        self.signed_headers = Some(headers);
        Ok(self)
    }

    /// Specify the private key used to sign the email
    pub fn with_private_key(mut self, key: RsaPrivateKey) -> Self {
        self.private_key = Some(key);
        self
    }

    /// Take the private key, selector and signing domain from a
    /// managed key in one step
    pub fn with_key(mut self, key: &DkimKey) -> Self {
        self.private_key = Some(key.private_key().clone());
        self.selector = Some(key.selector.clone());
        self.signing_domain = Some(key.domain.clone());
        self
    }

    pub fn with_selector(mut self, value: impl Into<String>) -> Self {
        self.selector = Some(value.into());
        self
    }

    /// Specify for which domain the email should be signed
    pub fn with_signing_domain(mut self, value: impl Into<String>) -> Self {
        self.signing_domain = Some(value.into());
        self
    }

    /// Specify the i= agent identity
    pub fn with_identity(mut self, value: impl Into<String>) -> Self {
        self.identity = Some(value.into());
        self
    }

    pub fn with_header_canonicalization(mut self, value: canonicalization::Type) -> Self {
        self.header_canonicalization = value;
        self
    }

    pub fn with_body_canonicalization(mut self, value: canonicalization::Type) -> Self {
        self.body_canonicalization = value;
        self
    }

    /// Hash at most this many canonical body bytes and emit l=
    pub fn with_body_length_limit(mut self, value: usize) -> Self {
        self.body_length_limit = Some(value);
        self
    }

    /// Specify the signing time. Mostly used for testing
    pub fn with_time(mut self, value: chrono::DateTime<chrono::Utc>) -> Self {
        self.time = Some(value);
        self
    }

    /// Specify an expiry duration for the signature validity
    pub fn with_expiry(mut self, value: chrono::Duration) -> Self {
        self.expiry = Some(value);
        self
    }

    /// Build an instance of the Signer.
    /// Must be provided: signed_headers, private_key, selector and
    /// signing_domain.
    pub fn build(self) -> Result<Signer, DKIMError> {
        use DKIMError::BuilderError;

        let signing_domain = self
            .signing_domain
            .ok_or(BuilderError("missing required signing domain"))?;

        if let Some(identity) = &self.identity {
            let Some((_local, domain)) = identity.split_once('@') else {
                return Err(DKIMError::DomainMismatch);
            };
            let i_domain = Name::from_str_relaxed(domain).map_err(|_| DKIMError::DomainMismatch)?;
            let d_domain =
                Name::from_str_relaxed(&signing_domain).map_err(|_| DKIMError::DomainMismatch)?;
            if !d_domain.zone_of(&i_domain) {
                return Err(DKIMError::DomainMismatch);
            }
        }

        Ok(Signer {
            signed_headers: self
                .signed_headers
                .ok_or(BuilderError("missing required signed headers"))?,
            private_key: self
                .private_key
                .ok_or(BuilderError("missing required private key"))?,
            selector: self
                .selector
                .ok_or(BuilderError("missing required selector"))?,
            signing_domain,
            identity: self.identity,
            header_canonicalization: self.header_canonicalization,
            body_canonicalization: self.body_canonicalization,
            body_length_limit: self.body_length_limit,
            expiry: self.expiry,
            time: self.time,
        })
    }
}

impl Default for SignerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

pub struct Signer {
    signed_headers: Vec<String>,
    private_key: RsaPrivateKey,
    selector: String,
    signing_domain: String,
    identity: Option<String>,
    header_canonicalization: canonicalization::Type,
    body_canonicalization: canonicalization::Type,
    body_length_limit: Option<usize>,
    expiry: Option<chrono::Duration>,
    time: Option<chrono::DateTime<chrono::Utc>>,
}

/// DKIM signer. Use the [SignerBuilder] to build an instance.
impl Signer {
    /// Sign a message, returning the complete DKIM-Signature header
    /// (name, colon, folded value).
    /// <https://datatracker.ietf.org/doc/html/rfc6376#section-5>
    pub fn sign(&self, email: &ParsedEmail) -> Result<String, DKIMError> {
        let (body_hash, body_hashed) = hash::compute_body_hash(
            self.body_canonicalization,
            self.body_length_limit,
            email,
        )?;

        let builder = self.dkim_header_builder(&body_hash, body_hashed)?;

        // For hashing, the header carries an empty b= value
        let unsigned: DkimHeader = builder.clone().add_tag("b", "").build();
        let header_hash = hash::compute_headers_hash(
            self.header_canonicalization,
            &self.signed_headers,
            &unsigned,
            email,
        )?;

        let signature = self
            .private_key
            .sign(Pkcs1v15Sign::new::<Sha256>(), &header_hash)
            .map_err(|err| DKIMError::FailedToSign(err.to_string()))?;

        let dkim_header = builder
            .add_tag("b", &general_purpose::STANDARD.encode(signature))
            .build();

        Ok(format!(
            "{}: {}",
            DKIM_SIGNATURE_HEADER_NAME,
            dkim_header.raw()
        ))
    }

    fn dkim_header_builder(
        &self,
        body_hash: &str,
        body_hashed: usize,
    ) -> Result<DkimHeaderBuilder, DKIMError> {
        let time = self.time.unwrap_or_else(chrono::Utc::now);

        let mut builder = DkimHeaderBuilder::new()
            .add_tag("v", "1")
            .add_tag("a", "rsa-sha256")
            .add_tag(
                "c",
                &format!(
                    "{}/{}",
                    self.header_canonicalization.canon_name(),
                    self.body_canonicalization.canon_name()
                ),
            )
            .add_tag("d", &self.signing_domain)
            .add_tag("s", &self.selector);
        if let Some(identity) = &self.identity {
            builder = builder.add_tag("i", identity);
        }
        builder = builder.set_time(time);
        if let Some(expiry) = self.expiry {
            builder = builder.set_expiry(expiry)?;
        }
        if self.body_length_limit.is_some() {
            builder = builder.add_tag("l", &body_hashed.to_string());
        }
        builder = builder
            .set_signed_headers(&self.signed_headers)
            .add_tag("bh", body_hash);

        Ok(builder)
    }
}

/// The headers from `wanted` that the message actually carries, in
/// order, consuming one instance per occurrence so that listing a
/// name twice signs two instances.
fn select_signable_headers(
    wanted: &[String],
    email: &ParsedEmail,
) -> Result<Vec<String>, DKIMError> {
    let mut remaining: HashMap<String, usize> = HashMap::new();
    let mut selected = vec![];

    for name in wanted {
        let name = name.to_ascii_lowercase();
        let available = remaining
            .entry(name.clone())
            .or_insert_with(|| email.count_header(&name));
        if *available > 0 {
            *available -= 1;
            selected.push(name);
        }
    }

    if !selected.iter().any(|name| name == "from") {
        return Err(DKIMError::FromFieldNotSigned);
    }

    Ok(selected)
}

/// Sign `message` on behalf of `domain` using the domain's active
/// key, returning the signed message: the DKIM-Signature header
/// prepended to the original bytes, which are otherwise untouched.
pub fn sign_message(
    provider: &dyn KeyProvider,
    domain: &str,
    message: &[u8],
    config: &SignatureConfig,
) -> Result<Vec<u8>, DKIMError> {
    let key: std::sync::Arc<DkimKey> = provider
        .get_active_dkim_key(domain)
        .ok_or_else(|| DKIMError::NoActiveKey(domain.to_string()))?;
    if key.is_revoked() {
        return Err(DKIMError::KeyRevoked);
    }

    let email = ParsedEmail::parse_bytes(message)?;
    let signed_headers = select_signable_headers(&config.headers, &email)?;

    let mut builder = SignerBuilder::new()
        .with_signed_headers(signed_headers)?
        .with_key(&key)
        .with_header_canonicalization(config.header_canonicalization)
        .with_body_canonicalization(config.body_canonicalization);
    if config.body_length_limit > 0 {
        builder = builder.with_body_length_limit(config.body_length_limit);
    }
    if let Some(expire_after) = config.expire_after {
        builder = builder.with_expiry(expire_after);
    }
    if let Some(identity) = &config.identity {
        builder = builder.with_identity(identity);
    }

    let header = builder.build()?.sign(&email)?;

    let mut signed = Vec::with_capacity(header.len() + 2 + message.len());
    signed.extend_from_slice(header.as_bytes());
    signed.extend_from_slice(b"\r\n");
    signed.extend_from_slice(message);
    Ok(signed)
}
