// Implementation of DKIM: https://datatracker.ietf.org/doc/html/rfc6376

use base64::engine::general_purpose;
use base64::Engine;
use dns_resolver::Resolver;
use rsa::{Pkcs1v15Sign, RsaPublicKey};
use sha2::Sha256;
use std::time::Duration;

#[macro_use]
extern crate quick_error;

pub mod canonicalization;
mod errors;
mod hash;
mod header;
mod keys;
mod parsed_email;
mod parser;
mod public_key;
mod record;
mod result;
mod sign;

pub use errors::{DKIMError, Status};
pub use header::DkimHeader;
pub use keys::{
    parse_private_key, private_key_from_file, rotation_candidates, DkimKey, KeyProvider,
    DEFAULT_KEY_BITS,
};
pub use parsed_email::ParsedEmail;
pub use parser::{tag_list as parse_tag_list, Tag};
pub use public_key::purge_key_cache;
pub use record::DkimRecord;
pub use result::{DkimResult, DkimStatus};
pub use sign::{sign_message, SignatureConfig, Signer, SignerBuilder, DEFAULT_SIGNED_HEADERS};

const DNS_NAMESPACE: &str = "_domainkey";

/// Bound on how many signatures one message is allowed to make us
/// evaluate. Limits DoS impact if a malicious message is filled with
/// signatures.
const MAX_SIGNATURES_PER_MESSAGE: usize = 10;

/// How far in the future a t= timestamp may sit before the signature
/// is rejected outright.
const FUTURE_TIMESTAMP_SKEW_SECS: i64 = 60;

/// Per-call verification options.
#[derive(Clone, Debug)]
pub struct VerifyOptions {
    /// Deadline applied to each DNS lookup. Hitting it yields a
    /// temperror for that signature.
    pub lookup_timeout: Duration,
}

impl Default for VerifyOptions {
    fn default() -> Self {
        Self {
            lookup_timeout: Duration::from_secs(5),
        }
    }
}

// https://datatracker.ietf.org/doc/html/rfc6376#section-6.1.3 Step 4
fn verify_signature(header_hash: &[u8], signature: &[u8], public_key: &RsaPublicKey) -> bool {
    public_key
        .verify(Pkcs1v15Sign::new::<Sha256>(), header_hash, signature)
        .is_ok()
}

/// <https://datatracker.ietf.org/doc/html/rfc6376#section-6.1.1> Step 4
/// and the t= sanity check: an expired signature fails, one from the
/// future can never become valid and is a permerror.
fn check_timestamps(
    dkim_header: &DkimHeader,
    now: chrono::DateTime<chrono::Utc>,
) -> Result<(), DKIMError> {
    if let Some(expiration) = dkim_header.parse_tag::<i64>("x")? {
        if now.timestamp() > expiration {
            return Err(DKIMError::SignatureExpired);
        }
    }
    if let Some(timestamp) = dkim_header.parse_tag::<i64>("t")? {
        if timestamp > now.timestamp() + FUTURE_TIMESTAMP_SKEW_SECS {
            return Err(DKIMError::FutureTimestamp);
        }
    }
    Ok(())
}

/// Evaluate one parsed signature against the message. Ok carries the
/// testing flag from the published record.
async fn verify_email_header<'a>(
    dkim_header: &DkimHeader,
    email: &'a ParsedEmail<'a>,
    resolver: &dyn Resolver,
    options: &VerifyOptions,
) -> Result<bool, DKIMError> {
    parser::parse_signature_algorithm(dkim_header.get_required_tag("a"))?;
    check_timestamps(dkim_header, chrono::Utc::now())?;

    let retrieved = public_key::retrieve_public_key(
        resolver,
        dkim_header.get_required_tag("d"),
        dkim_header.get_required_tag("s"),
        options.lookup_timeout,
    )
    .await?;

    let (header_canonicalization, body_canonicalization) =
        parser::parse_canonicalization(dkim_header.get_tag("c"))?;

    let (computed_body_hash, _) = hash::compute_body_hash(
        body_canonicalization,
        dkim_header.parse_tag::<usize>("l")?,
        email,
    )?;
    tracing::debug!("computed body hash: {computed_body_hash}");
    if dkim_header.get_required_tag("bh") != computed_body_hash {
        return Err(DKIMError::BodyHashDidNotVerify);
    }

    let header_names = dkim_header.signed_header_names();
    let computed_headers_hash = hash::compute_headers_hash(
        header_canonicalization,
        &header_names,
        dkim_header,
        email,
    )?;

    let signature = general_purpose::STANDARD
        .decode(dkim_header.get_required_tag("b"))
        .map_err(|err| {
            DKIMError::SignatureSyntaxError(format!("failed to decode signature: {}", err))
        })?;
    if !verify_signature(&computed_headers_hash, &signature, &retrieved.key) {
        return Err(DKIMError::SignatureDidNotVerify);
    }

    Ok(retrieved.testing)
}

/// Verify every DKIM-Signature on an already-parsed message.
///
/// One result per signature header, in the order the headers appear.
/// This never fails as a whole: every outcome, including malformed
/// signatures and DNS trouble, is expressed in the per-signature
/// status.
pub async fn verify_email_with_resolver<'a>(
    email: &'a ParsedEmail<'a>,
    resolver: &dyn Resolver,
    options: &VerifyOptions,
) -> Vec<DkimResult> {
    let mut results = vec![];

    for value in email.dkim_signature_values() {
        if results.len() >= MAX_SIGNATURES_PER_MESSAGE {
            break;
        }

        let value = String::from_utf8_lossy(value);
        let dkim_header = match DkimHeader::parse(&value) {
            Ok(header) => header,
            Err(err) => {
                tracing::debug!("unparseable DKIM-Signature: {err}");
                results.push(DkimResult::from_error(err, None, None, None));
                continue;
            }
        };

        let domain = dkim_header.get_required_tag("d");
        let selector = dkim_header.get_required_tag("s");
        let algorithm = dkim_header.get_required_tag("a");

        let result = match verify_email_header(&dkim_header, email, resolver, options).await {
            Ok(testing) => DkimResult::pass(domain, selector, algorithm, testing),
            Err(err) => {
                DkimResult::from_error(err, Some(domain), Some(selector), Some(algorithm))
            }
        };
        results.push(result);
    }

    results
}

/// Verify a raw RFC 5322 message.
///
/// A message with no DKIM-Signature headers yields an empty list; a
/// message that cannot be parsed at all yields a single permerror.
pub async fn verify_message(
    message: &[u8],
    resolver: &dyn Resolver,
    options: &VerifyOptions,
) -> Vec<DkimResult> {
    let email = match ParsedEmail::parse_bytes(message) {
        Ok(email) => email,
        Err(err) => return vec![DkimResult::from_error(err, None, None, None)],
    };
    verify_email_with_resolver(&email, resolver, options).await
}
