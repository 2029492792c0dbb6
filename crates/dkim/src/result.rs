use crate::errors::{DKIMError, Status};

/// Terminal state of one signature evaluation. `Fail` carries the
/// reason the signature did not validate; `PermError` and `TempError`
/// carry why it could not be evaluated. The reason is diagnostic
/// text, not a contract.
#[derive(Clone, Debug, PartialEq)]
pub enum DkimStatus {
    Pass,
    Fail(DKIMError),
    PermError(DKIMError),
    TempError(DKIMError),
    Neutral,
    Policy,
}

/// Result of verifying a single DKIM-Signature header.
#[derive(Clone, Debug)]
pub struct DkimResult {
    status: DkimStatus,
    domain: Option<String>,
    selector: Option<String>,
    algorithm: Option<String>,
    testing: bool,
}

impl DkimResult {
    pub(crate) fn pass(
        domain: &str,
        selector: &str,
        algorithm: &str,
        testing: bool,
    ) -> Self {
        DkimResult {
            status: DkimStatus::Pass,
            domain: Some(domain.to_lowercase()),
            selector: Some(selector.to_lowercase()),
            algorithm: Some(algorithm.to_string()),
            testing,
        }
    }

    pub(crate) fn from_error(
        error: DKIMError,
        domain: Option<&str>,
        selector: Option<&str>,
        algorithm: Option<&str>,
    ) -> Self {
        let status = match error.status() {
            Status::Fail => DkimStatus::Fail(error),
            Status::Permfail => DkimStatus::PermError(error),
            Status::Tempfail => DkimStatus::TempError(error),
        };
        DkimResult {
            status,
            domain: domain.map(|d| d.to_lowercase()),
            selector: selector.map(|s| s.to_lowercase()),
            algorithm: algorithm.map(|a| a.to_string()),
            testing: false,
        }
    }

    pub fn status(&self) -> &DkimStatus {
        &self.status
    }

    /// Reclassify as neutral, e.g. for a pass from a t=y domain.
    pub fn into_neutral(mut self) -> Self {
        self.status = DkimStatus::Neutral;
        self
    }

    /// Reclassify under a local policy decision, e.g. alignment rules.
    pub fn into_policy(mut self) -> Self {
        self.status = DkimStatus::Policy;
        self
    }

    /// The verification result as a summary keyword: pass, fail,
    /// permerror, temperror, neutral or policy.
    pub fn summary(&self) -> &'static str {
        match &self.status {
            DkimStatus::Pass => "pass",
            DkimStatus::Fail(_) => "fail",
            DkimStatus::PermError(_) => "permerror",
            DkimStatus::TempError(_) => "temperror",
            DkimStatus::Neutral => "neutral",
            DkimStatus::Policy => "policy",
        }
    }

    /// Similar to `summary` but with detail on the non-pass states.
    /// Typically used for the `Authentication-Results` header.
    pub fn detail(&self) -> String {
        match &self.status {
            DkimStatus::Fail(err)
            | DkimStatus::PermError(err)
            | DkimStatus::TempError(err) => {
                format!("{} ({err:#})", self.summary())
            }
            _ => self.summary().to_string(),
        }
    }

    /// True only for a cryptographically valid signature.
    pub fn valid(&self) -> bool {
        matches!(self.status, DkimStatus::Pass)
    }

    pub fn is_pass(&self) -> bool {
        self.valid()
    }

    pub fn error(&self) -> Option<&DKIMError> {
        match &self.status {
            DkimStatus::Fail(err)
            | DkimStatus::PermError(err)
            | DkimStatus::TempError(err) => Some(err),
            _ => None,
        }
    }

    /// The signing domain (d=), when the signature parsed far enough
    /// to know it.
    pub fn domain(&self) -> Option<&str> {
        self.domain.as_deref()
    }

    /// The selector (s=), likewise.
    pub fn selector(&self) -> Option<&str> {
        self.selector.as_deref()
    }

    pub fn algorithm(&self) -> Option<&str> {
        self.algorithm.as_deref()
    }

    /// Whether the signing domain advertised the t=y testing flag.
    /// The signature still verified; callers may choose to treat the
    /// result as neutral.
    pub fn is_testing(&self) -> bool {
        self.testing
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pass_result() {
        let result = DkimResult::pass("Example.COM", "S1", "rsa-sha256", false);
        assert!(result.valid());
        assert_eq!(result.summary(), "pass");
        assert_eq!(result.detail(), "pass");
        assert_eq!(result.domain(), Some("example.com"));
        assert_eq!(result.selector(), Some("s1"));
        assert_eq!(result.algorithm(), Some("rsa-sha256"));
        assert!(result.error().is_none());
    }

    #[test]
    fn test_reclassification() {
        let result = DkimResult::pass("example.com", "s1", "rsa-sha256", true);
        assert!(result.is_testing());
        let neutral = result.into_neutral();
        assert_eq!(neutral.summary(), "neutral");
        assert_eq!(neutral.detail(), "neutral");

        let policy = DkimResult::pass("example.com", "s1", "rsa-sha256", false).into_policy();
        assert_eq!(policy.summary(), "policy");
    }

    #[test]
    fn test_error_results_map_status() {
        let fail = DkimResult::from_error(
            DKIMError::BodyHashDidNotVerify,
            Some("example.com"),
            Some("s1"),
            Some("rsa-sha256"),
        );
        assert_eq!(fail.summary(), "fail");
        assert_eq!(fail.detail(), "fail (body hash mismatch)");
        assert!(!fail.valid());

        let permerror =
            DkimResult::from_error(DKIMError::KeyRevoked, Some("example.com"), Some("s1"), None);
        assert_eq!(permerror.summary(), "permerror");
        assert_eq!(permerror.detail(), "permerror (key revoked)");

        let temperror = DkimResult::from_error(
            DKIMError::KeyUnavailable("timed out".to_string()),
            None,
            None,
            None,
        );
        assert_eq!(temperror.summary(), "temperror");
        assert!(temperror.domain().is_none());
    }
}
