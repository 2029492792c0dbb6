use crate::canonicalization;
use crate::header::{DkimHeader, DKIM_SIGNATURE_HEADER_NAME};
use crate::{DKIMError, ParsedEmail};
use base64::engine::general_purpose;
use base64::Engine;
use sha2::{Digest as _, Sha256};
use std::collections::HashMap;

/// A SHA-256 hasher that stops consuming input once the `l=` byte
/// limit is reached.
pub(crate) struct LimitHasher {
    pub limit: usize,
    pub hashed: usize,
    pub hasher: HashImpl,
}

impl LimitHasher {
    pub fn hash(&mut self, bytes: &[u8]) {
        let remain = self.limit - self.hashed;
        let len = bytes.len().min(remain);
        self.hasher.hash(&bytes[..len]);
        self.hashed += len;
    }

    pub fn finalize(self) -> String {
        self.hasher.finalize()
    }

    #[cfg(test)]
    pub fn finalize_bytes(self) -> Vec<u8> {
        self.hasher.finalize_bytes()
    }
}

pub(crate) enum HashImpl {
    Sha256(Sha256),
    #[cfg(test)]
    Copy(Vec<u8>),
}

impl HashImpl {
    pub fn new() -> Self {
        Self::Sha256(Sha256::new())
    }

    #[cfg(test)]
    pub fn copy_data() -> Self {
        Self::Copy(vec![])
    }

    pub fn hash(&mut self, bytes: &[u8]) {
        match self {
            Self::Sha256(hasher) => hasher.update(bytes),
            #[cfg(test)]
            Self::Copy(data) => data.extend_from_slice(bytes),
        }
    }

    pub fn finalize(self) -> String {
        match self {
            Self::Sha256(hasher) => general_purpose::STANDARD.encode(hasher.finalize()),
            #[cfg(test)]
            Self::Copy(data) => String::from_utf8_lossy(&data).into(),
        }
    }

    pub fn finalize_bytes(self) -> Vec<u8> {
        match self {
            Self::Sha256(hasher) => hasher.finalize().to_vec(),
            #[cfg(test)]
            Self::Copy(data) => data,
        }
    }
}

/// Hash of the canonicalized (and possibly `l=`-truncated) body.
/// Returns the base64 digest and the number of canonical bytes that
/// were actually hashed.
/// <https://datatracker.ietf.org/doc/html/rfc6376#section-3.7>
pub(crate) fn compute_body_hash(
    canonicalization_type: canonicalization::Type,
    length: Option<usize>,
    email: &ParsedEmail,
) -> Result<(String, usize), DKIMError> {
    let body = email.get_body_bytes();

    let mut hasher = LimitHasher {
        hasher: HashImpl::new(),
        limit: length.unwrap_or(usize::MAX),
        hashed: 0,
    };

    canonicalization_type.canon_body(body, &mut hasher);

    let hashed = hasher.hashed;
    Ok((hasher.finalize(), hashed))
}

/// Pick the headers covered by an h= list, consuming instances from
/// the bottom of the header block up so that repeated names in the
/// list sign repeated headers.
/// <https://datatracker.ietf.org/doc/html/rfc6376#section-5.4.2>
fn select_headers<'a>(
    header_names: &[String],
    email: &'a ParsedEmail,
) -> Vec<(String, &'a [u8])> {
    let mut selected = vec![];

    let email_headers = email.get_headers();
    let num_headers = email_headers.len();
    let mut last_index: HashMap<&str, usize> = HashMap::new();

    'outer: for name in header_names {
        let index = last_index.get(name.as_str()).unwrap_or(&num_headers);
        for (header_index, header) in email_headers
            .iter()
            .enumerate()
            .rev()
            .skip(num_headers - index)
        {
            if header.get_key_ref().eq_ignore_ascii_case(name) {
                selected.push((header.get_key(), header.get_value_raw()));
                last_index.insert(name, header_index);
                continue 'outer;
            }
        }

        // Nothing left to consume for this name; per the RFC the
        // name still contributes a nonexistent (empty) header, which
        // canonicalizes to nothing at all.
        last_index.insert(name, 0);
    }

    selected
}

/// The hash that is actually signed: the selected headers in h= order
/// followed by this DKIM-Signature header itself with the b= value
/// blanked and no trailing CRLF.
/// <https://datatracker.ietf.org/doc/html/rfc6376#section-3.7>
pub(crate) fn compute_headers_hash(
    canonicalization_type: canonicalization::Type,
    header_names: &[String],
    dkim_header: &DkimHeader,
    email: &ParsedEmail,
) -> Result<Vec<u8>, DKIMError> {
    let mut input = Vec::new();

    for (name, value) in select_headers(header_names, email) {
        canonicalization_type.canon_header_into(&name, value, &mut input);
    }

    {
        let signature = dkim_header.get_required_raw_tag("b");
        let value = if signature.is_empty() {
            dkim_header.raw().to_owned()
        } else {
            dkim_header.raw().replacen(signature, "", 1)
        };

        let mut canonicalized = vec![];
        canonicalization_type.canon_header_into(
            DKIM_SIGNATURE_HEADER_NAME,
            value.as_bytes(),
            &mut canonicalized,
        );

        // no trailing CRLF on the final header
        canonicalized.truncate(canonicalized.len() - 2);
        input.extend_from_slice(&canonicalized);
    }

    tracing::debug!("headers to hash: {:?}", String::from_utf8_lossy(&input));

    let mut hasher = HashImpl::new();
    hasher.hash(&input);
    Ok(hasher.finalize_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canonicalization::Type;

    fn parsed(email: &str) -> String {
        email.replace('\n', "\r\n")
    }

    fn dkim_header() -> DkimHeader {
        DkimHeader::parse(
            "v=1; a=rsa-sha256; q=dns/txt; c=relaxed/relaxed; s=smtp; d=test.com; \
             t=1641506955; h=content-type:to: subject:date:from:mime-version:sender; \
             bh=PU2XIErWsXvhvt1W96ntPWZ2VImjVZ3vBY2T/A+wA3A=; \
             b=PIO0A014nyntOGKdTdtvCJor9ZxvP1M3hoLeEh8HqZ+RvAyEKdAc7VOg+/g/OTaZgsmw6U \
             sZCoN0YNVp+2o9nkaeUslsVz3M4I55HcZnarxl+fhplIMcJ/3s0nIhXL51MfGPRqPbB7/M \
             Gjg9/07/2vFoid6Kitg6Z+CfoD2wlSRa8xDfmeyA2cHpeVuGQhGxu7BXuU8kGbeM4+weit \
             Ql3t9zalhikEPI5Pr7dzYFrgWNOEO6w6rQfG7niKON1BimjdbJlGanC7cO4UL361hhXT4X \
             iXLnC9TG39xKFPT/+4nkHy8pp6YvWkD3wKlBjwkYNm0JvKGwTskCMDeTwxXhAg==",
        )
        .unwrap()
    }

    #[test]
    fn test_compute_body_hash_simple() {
        let email = parsed(
            "To: test@example.com\nSubject: subject\nFrom: Test <test@example.com>\n\nHello Alice\n        ",
        );
        let email = ParsedEmail::parse_bytes(email.as_bytes()).unwrap();

        let (hash, _) = compute_body_hash(Type::Simple, None, &email).unwrap();
        assert_eq!(hash, "KXQwQpX2zFwgixPbV6Dd18ZMJU04lLeRnwqzUp8uGwI=");
    }

    #[test]
    fn test_compute_body_hash_relaxed() {
        let email = parsed(
            "To: test@example.com\nSubject: subject\nFrom: Test <test@example.com>\n\nHello Alice\n        ",
        );
        let email = ParsedEmail::parse_bytes(email.as_bytes()).unwrap();

        let (hash, _) = compute_body_hash(Type::Relaxed, None, &email).unwrap();
        assert_eq!(hash, "1bokzbYiRgXTKMQhrNhLJo1kjDDA1GILbpyTwyNa1uk=");
    }

    #[test]
    fn test_compute_body_hash_length() {
        let email = parsed(
            "To: test@example.com\nSubject: subject\nFrom: Test <test@example.com>\n\nHello Alice\n        ",
        );
        let email = ParsedEmail::parse_bytes(email.as_bytes()).unwrap();

        let (hash, hashed) = compute_body_hash(Type::Relaxed, Some(3), &email).unwrap();
        assert_eq!(hash, "t4nCTc22jEQ3sEwYa/I5pyB+dXP7GyKnSf4ae42W0pI=");
        assert_eq!(hashed, 3);
    }

    #[test]
    fn test_compute_body_hash_empty_simple() {
        // an absent body hashes as a single CRLF under simple
        let email = ParsedEmail::parse_bytes(b"Subject: nothing\r\n\r\n").unwrap();

        let (hash, _) = compute_body_hash(Type::Simple, None, &email).unwrap();
        assert_eq!(hash, "frcCV1k9oG9oKj3dpUqdJg1PxRT2RSN/XKdLCPjaYaY=");
    }

    #[test]
    fn test_compute_body_hash_empty_relaxed() {
        // and as the empty string under relaxed
        let email = ParsedEmail::parse_bytes(b"Subject: nothing\r\n\r\n").unwrap();

        let (hash, _) = compute_body_hash(Type::Relaxed, None, &email).unwrap();
        assert_eq!(hash, "47DEQpj8HBSa+/TImW+5JCeuQeRkm5NMpJWZG3hSuFU=");
    }

    #[test]
    fn test_select_headers() {
        let names: Vec<String> = ["from", "subject", "to", "from"]
            .iter()
            .map(|s| s.to_string())
            .collect();

        let email1 = ParsedEmail::parse_bytes(
            b"from: biz\r\nfoo: bar\r\nfrom: baz\r\nsubject: boring\r\n\r\ntest",
        )
        .unwrap();
        let result1 = select_headers(&names, &email1);
        assert_eq!(
            result1,
            vec![
                ("from".to_owned(), &b"baz"[..]),
                ("subject".to_owned(), &b"boring"[..]),
                ("from".to_owned(), &b"biz"[..]),
            ]
        );

        let email2 =
            ParsedEmail::parse_bytes(b"From: biz\r\nFoo: bar\r\nSubject: Boring\r\n\r\ntest")
                .unwrap();
        let result2 = select_headers(&names, &email2);
        assert_eq!(
            result2,
            vec![
                ("From".to_owned(), &b"biz"[..]),
                ("Subject".to_owned(), &b"Boring"[..]),
            ]
        );
    }

    #[test]
    fn test_compute_headers_hash_stable() {
        let email = parsed(
            "To: test@example.com\nSubject: subject\nFrom: Test <test@example.com>\n\nHello Alice\n",
        );
        let email = ParsedEmail::parse_bytes(email.as_bytes()).unwrap();
        let names = vec!["to".to_string(), "subject".to_string()];

        let first =
            compute_headers_hash(Type::Relaxed, &names, &dkim_header(), &email).unwrap();
        let second =
            compute_headers_hash(Type::Relaxed, &names, &dkim_header(), &email).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), 32);

        let simple = compute_headers_hash(Type::Simple, &names, &dkim_header(), &email).unwrap();
        assert_ne!(first, simple);
    }
}
