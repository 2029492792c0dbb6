/// How a failed verification step is reported in the per-signature
/// result: `fail` means the signature does not validate, `permerror`
/// means the signature or key can never be evaluated, `tempfail` means
/// the evaluation could not complete right now and may be retried.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Status {
    Fail,
    Permfail,
    Tempfail,
}

quick_error! {
    #[derive(Debug, PartialEq, Clone)]
    /// DKIM errors
    pub enum DKIMError {
        UnsupportedAlgorithm(value: String) {
            display("unsupported algorithm: {}", value)
        }
        UnsupportedCanonicalizationType(value: String) {
            display("unsupported canonicalization: {}", value)
        }
        SignatureSyntaxError(err: String) {
            display("signature syntax error: {}", err)
        }
        SignatureMissingRequiredTag(name: &'static str) {
            display("signature missing required tag ({})", name)
        }
        IncompatibleVersion {
            display("incompatible version")
        }
        DomainMismatch {
            display("domain mismatch")
        }
        FromFieldNotSigned {
            display("From field not signed")
        }
        SignatureExpired {
            display("signature expired")
        }
        FutureTimestamp {
            display("signature timestamp is in the future")
        }
        UnsupportedQueryMethod {
            display("unsupported query method")
        }
        KeyUnavailable(err: String) {
            display("key unavailable: {}", err)
        }
        UnknownInternalError(err: String) {
            display("internal error: {}", err)
        }
        NoKeyForSignature {
            display("no key for signature")
        }
        KeySyntaxError {
            display("key syntax error")
        }
        KeyIncompatibleVersion {
            display("key incompatible version")
        }
        InappropriateKeyAlgorithm {
            display("inappropriate key algorithm")
        }
        InappropriateHashAlgorithm {
            display("inappropriate hash algorithm")
        }
        KeyRevoked {
            display("key revoked")
        }
        SignatureDidNotVerify {
            display("signature mismatch")
        }
        BodyHashDidNotVerify {
            display("body hash mismatch")
        }
        CanonicalLineEndingsRequired {
            display("message must use CRLF line endings")
        }
        MissingHeaderBodySeparator {
            display("no header/body separator")
        }
        MalformedMessage(err: String) {
            display("malformed message: {}", err)
        }
        NoActiveKey(domain: String) {
            display("no active DKIM key for {}", domain)
        }
        InvalidSelector(value: String) {
            display("invalid selector: {}", value)
        }
        UnsupportedKeySize(bits: usize) {
            display("unsupported RSA key size: {}", bits)
        }
        KeyGenerationFailed(err: String) {
            display("key generation failed: {}", err)
        }
        PrivateKeyLoadError(err: String) {
            display("failed to load private key: {}", err)
        }
        FailedToSign(err: String) {
            display("failed sign: {}", err)
        }
        BuilderError(err: &'static str) {
            display("failed to build object: {}", err)
        }
    }
}

impl DKIMError {
    pub fn status(&self) -> Status {
        use DKIMError::*;
        match self {
            SignatureDidNotVerify | BodyHashDidNotVerify | SignatureExpired => Status::Fail,
            SignatureSyntaxError(_)
            | SignatureMissingRequiredTag(_)
            | IncompatibleVersion
            | DomainMismatch
            | FromFieldNotSigned
            | FutureTimestamp
            | UnsupportedQueryMethod
            | NoKeyForSignature
            | KeySyntaxError
            | KeyIncompatibleVersion
            | InappropriateKeyAlgorithm
            | InappropriateHashAlgorithm
            | KeyRevoked
            | CanonicalLineEndingsRequired
            | MissingHeaderBodySeparator
            | MalformedMessage(_)
            | NoActiveKey(_)
            | InvalidSelector(_)
            | UnsupportedKeySize(_)
            | UnsupportedCanonicalizationType(_)
            | UnsupportedAlgorithm(_) => Status::Permfail,
            KeyUnavailable(_)
            | UnknownInternalError(_)
            | KeyGenerationFailed(_)
            | PrivateKeyLoadError(_)
            | BuilderError(_)
            | FailedToSign(_) => Status::Tempfail,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert_eq!(DKIMError::BodyHashDidNotVerify.status(), Status::Fail);
        assert_eq!(DKIMError::SignatureExpired.status(), Status::Fail);
        assert_eq!(DKIMError::KeyRevoked.status(), Status::Permfail);
        assert_eq!(DKIMError::FutureTimestamp.status(), Status::Permfail);
        assert_eq!(
            DKIMError::KeyUnavailable("timeout".to_string()).status(),
            Status::Tempfail
        );
    }

    #[test]
    fn test_display_strings() {
        // Callers grep these out of Authentication-Results style
        // comments, so the wording is load bearing.
        assert_eq!(DKIMError::BodyHashDidNotVerify.to_string(), "body hash mismatch");
        assert_eq!(DKIMError::SignatureDidNotVerify.to_string(), "signature mismatch");
        assert_eq!(DKIMError::SignatureExpired.to_string(), "signature expired");
        assert_eq!(DKIMError::KeyRevoked.to_string(), "key revoked");
        assert_eq!(
            DKIMError::UnsupportedAlgorithm("ed25519-sha256".to_string()).to_string(),
            "unsupported algorithm: ed25519-sha256"
        );
    }
}
