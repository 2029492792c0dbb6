use async_trait::async_trait;
use hickory_proto::ProtoErrorKind;
use hickory_resolver::proto::op::response_code::ResponseCode;
use hickory_resolver::{Name, ResolveError, TokioResolver};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use thiserror::Error;

#[derive(Clone, Debug, Error, PartialEq)]
pub enum DnsError {
    #[error("invalid DNS name: {0}")]
    InvalidName(String),
    #[error("no records found for {0}")]
    NotFound(String),
    #[error("DNS lookup for {0} timed out")]
    Timeout(String),
    #[error("DNS lookup for {0} was cancelled")]
    Cancelled(String),
    #[error("DNS: {0}")]
    ResolveFailed(String),
}

impl DnsError {
    /// Whether the caller can reasonably expect a retry to succeed.
    /// NXDOMAIN/NODATA and syntactically bad names are final answers;
    /// timeouts, cancellation and transport problems are not. Resolvers
    /// that surface only opaque error strings are classified by message
    /// content, with transient as the fallback.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout(_) | Self::Cancelled(_) => true,
            Self::InvalidName(_) | Self::NotFound(_) => false,
            Self::ResolveFailed(msg) => {
                let msg = msg.to_ascii_lowercase();
                !(msg.contains("nxdomain")
                    || msg.contains("no records")
                    || msg.contains("no such"))
            }
        }
    }
}

/// A trait for entities that can resolve TXT records.
///
/// The 255-octet character-string chunks of each TXT record are
/// concatenated before being returned, one string per record.
#[async_trait]
pub trait Resolver: Send + Sync + 'static {
    async fn resolve_txt(&self, name: &str) -> Result<Vec<String>, DnsError>;
}

pub struct HickoryResolver {
    inner: TokioResolver,
}

impl HickoryResolver {
    pub fn new() -> Result<Self, ResolveError> {
        Ok(Self {
            inner: TokioResolver::builder_tokio()?.build(),
        })
    }
}

fn classify_resolve_error(name: &Name, err: ResolveError) -> DnsError {
    match err.proto().map(|err| err.kind()) {
        Some(ProtoErrorKind::NoRecordsFound { response_code, .. }) => {
            tracing::debug!(
                "no records for {name}: response code {response_code}",
                response_code = *response_code
            );
            if *response_code == ResponseCode::ServFail {
                DnsError::ResolveFailed(format!("SERVFAIL resolving {name}"))
            } else {
                DnsError::NotFound(name.to_string())
            }
        }
        Some(ProtoErrorKind::Timeout) => DnsError::Timeout(name.to_string()),
        _ => DnsError::ResolveFailed(format!("failed to query DNS for {name}: {err}")),
    }
}

#[async_trait]
impl Resolver for HickoryResolver {
    async fn resolve_txt(&self, name: &str) -> Result<Vec<String>, DnsError> {
        let name = Name::from_utf8(name)
            .map_err(|err| DnsError::InvalidName(format!("invalid name {name}: {err}")))?;

        let lookup = self
            .inner
            .lookup(name.clone(), hickory_resolver::proto::rr::RecordType::TXT)
            .await
            .map_err(|err| classify_resolve_error(&name, err))?;

        let mut result = vec![];
        for rdata in lookup.iter() {
            if let Some(txt) = rdata.as_txt() {
                let mut joined = String::new();
                for chunk in txt.iter() {
                    joined.push_str(&String::from_utf8_lossy(chunk));
                }
                result.push(joined);
            }
        }
        Ok(result)
    }
}

impl From<TokioResolver> for HickoryResolver {
    fn from(inner: TokioResolver) -> Self {
        Self { inner }
    }
}

/// An in-memory resolver for tests. Records and canned failures are
/// installed up front; `num_queries` reports how many lookups were made,
/// which is what cache tests key off.
#[derive(Default)]
pub struct TestResolver {
    records: BTreeMap<String, Result<Vec<String>, DnsError>>,
    queries: AtomicUsize,
}

impl TestResolver {
    pub fn with_txt(self, name: &str, value: impl Into<String>) -> Self {
        self.with_txt_multiple(name, vec![value.into()])
    }

    /// Add multiple separate TXT records for the specified name
    pub fn with_txt_multiple(mut self, name: &str, values: Vec<String>) -> Self {
        self.records.insert(name.to_ascii_lowercase(), Ok(values));
        self
    }

    /// Make lookups for the specified name yield the supplied error
    pub fn with_error(mut self, name: &str, error: DnsError) -> Self {
        self.records.insert(name.to_ascii_lowercase(), Err(error));
        self
    }

    pub fn num_queries(&self) -> usize {
        self.queries.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Resolver for TestResolver {
    async fn resolve_txt(&self, name: &str) -> Result<Vec<String>, DnsError> {
        self.queries.fetch_add(1, Ordering::Relaxed);
        let name = name.to_ascii_lowercase();
        match self.records.get(name.trim_end_matches('.')) {
            Some(result) => result.clone(),
            None => Err(DnsError::NotFound(name)),
        }
    }
}
