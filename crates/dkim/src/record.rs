use crate::{parser, DKIMError};
use base64::engine::general_purpose;
use base64::Engine;
use rsa::{pkcs1, pkcs8, RsaPublicKey};

const RSA_KEY_TYPE: &str = "rsa";

/// A parsed `v=DKIM1` TXT record.
/// <https://datatracker.ietf.org/doc/html/rfc6376#section-3.6.1>
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DkimRecord {
    /// v= version; when present it must be DKIM1
    pub version: Option<String>,
    /// k= key type; absent means rsa
    pub key_type: Option<String>,
    /// p= decoded public key bytes; empty means the key is revoked
    pub public_key: Vec<u8>,
    /// t= flags
    pub flags: Vec<String>,
    /// h= acceptable hash algorithms
    pub hash_algorithms: Option<Vec<String>>,
    /// s= service types
    pub service_types: Option<Vec<String>>,
    /// n= human readable notes
    pub notes: Option<String>,
}

impl DkimRecord {
    /// Parse the text form of the record, validating everything that
    /// bears on whether the key can be used for an rsa-sha256
    /// signature. The revocation sentinel (absent or empty p=) parses
    /// successfully; it is surfaced when the key material is asked
    /// for.
    pub fn parse(txt: &str) -> Result<Self, DKIMError> {
        let (_, tags) = parser::tag_list(txt).map_err(|err| {
            tracing::warn!("key syntax error: {}", err);
            DKIMError::KeySyntaxError
        })?;

        let mut record = DkimRecord::default();

        for tag in &tags {
            match tag.name.as_str() {
                "v" => {
                    if tag.value != "DKIM1" {
                        return Err(DKIMError::KeyIncompatibleVersion);
                    }
                    record.version = Some(tag.value.clone());
                }
                "k" => {
                    if tag.value != RSA_KEY_TYPE {
                        return Err(DKIMError::InappropriateKeyAlgorithm);
                    }
                    record.key_type = Some(tag.value.clone());
                }
                "p" => {
                    if !tag.value.is_empty() {
                        record.public_key = general_purpose::STANDARD
                            .decode(&tag.value)
                            .map_err(|err| {
                                tracing::warn!("invalid p= value: {}", err);
                                DKIMError::KeySyntaxError
                            })?;
                    }
                }
                "t" => {
                    record.flags = tag.value.split(':').map(|f| f.trim().to_owned()).collect();
                }
                "h" => {
                    let hashes: Vec<String> =
                        tag.value.split(':').map(|h| h.trim().to_owned()).collect();
                    if !hashes.iter().any(|h| h == "sha256") {
                        return Err(DKIMError::InappropriateHashAlgorithm);
                    }
                    record.hash_algorithms = Some(hashes);
                }
                "s" => {
                    record.service_types =
                        Some(tag.value.split(':').map(|s| s.trim().to_owned()).collect());
                }
                "n" => {
                    record.notes = Some(tag.value.clone());
                }
                // Unknown tags MUST be ignored
                _ => {}
            }
        }

        Ok(record)
    }

    /// The y flag marks the domain as still testing DKIM; verifiers
    /// may pass but callers can choose to treat the result as neutral.
    pub fn is_testing(&self) -> bool {
        self.flags.iter().any(|f| f == "y")
    }

    pub fn is_revoked(&self) -> bool {
        self.public_key.is_empty()
    }

    /// The RSA public key published in p=, accepting both SPKI and
    /// bare PKCS#1 DER encodings.
    pub fn rsa_public_key(&self) -> Result<RsaPublicKey, DKIMError> {
        if self.is_revoked() {
            return Err(DKIMError::KeyRevoked);
        }

        pkcs8::DecodePublicKey::from_public_key_der(&self.public_key)
            .or_else(|_| pkcs1::DecodeRsaPublicKey::from_pkcs1_der(&self.public_key))
            .map_err(|err| {
                DKIMError::KeyUnavailable(format!("failed to parse public key: {}", err))
            })
    }
}
