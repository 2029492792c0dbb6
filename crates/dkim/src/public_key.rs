use crate::record::DkimRecord;
use crate::{DKIMError, DNS_NAMESPACE};
use dns_resolver::{DnsError, Resolver};
use lru_cache::LruCache;
use parking_lot::Mutex;
use rsa::RsaPublicKey;
use std::sync::{Arc, LazyLock};
use std::time::{Duration, Instant};

const KEY_CACHE_CAPACITY: usize = 1024;
/// TTL for a well-formed lookup result
const KEY_CACHE_TTL: Duration = Duration::from_secs(3600);
/// TTL applied when the lookup failed for any reason
const NEGATIVE_CACHE_TTL: Duration = Duration::from_secs(300);

/// A public key as retrieved from DNS, plus the record properties the
/// verifier cares about.
#[derive(Clone, Debug)]
pub(crate) struct RetrievedKey {
    pub key: Arc<RsaPublicKey>,
    pub testing: bool,
}

struct CacheEntry {
    result: Result<RetrievedKey, DKIMError>,
    expires: Instant,
}

type CacheKey = (String, String);

/// Process-wide cache of (selector, domain) -> key lookup outcomes.
/// Concurrent misses for the same name may race and both hit DNS;
/// last write wins, which is harmless.
static KEY_CACHE: LazyLock<Mutex<LruCache<CacheKey, CacheEntry>>> =
    LazyLock::new(|| Mutex::new(LruCache::new(KEY_CACHE_CAPACITY)));

/// Drop every cached lookup outcome.
pub fn purge_key_cache() {
    KEY_CACHE.lock().clear();
}

fn cache_get(selector: &str, domain: &str) -> Option<Result<RetrievedKey, DKIMError>> {
    let key = (selector.to_ascii_lowercase(), domain.to_ascii_lowercase());
    let mut cache = KEY_CACHE.lock();
    let entry = cache.get_mut(&key)?;
    if Instant::now() < entry.expires {
        Some(entry.result.clone())
    } else {
        cache.remove(&key);
        None
    }
}

fn cache_insert(selector: &str, domain: &str, result: &Result<RetrievedKey, DKIMError>) {
    let ttl = if result.is_ok() {
        KEY_CACHE_TTL
    } else {
        NEGATIVE_CACHE_TTL
    };
    let entry = CacheEntry {
        result: result.clone(),
        expires: Instant::now() + ttl,
    };
    KEY_CACHE.lock().insert(
        (selector.to_ascii_lowercase(), domain.to_ascii_lowercase()),
        entry,
    );
}

fn to_key_error(dns_name: &str, err: DnsError) -> DKIMError {
    if err.is_transient() {
        DKIMError::KeyUnavailable(format!("failed to query DNS for {dns_name}: {err}"))
    } else {
        match err {
            DnsError::InvalidName(msg) => DKIMError::SignatureSyntaxError(msg),
            _ => DKIMError::NoKeyForSignature,
        }
    }
}

/// <https://datatracker.ietf.org/doc/html/rfc6376#section-6.1.2>
async fn lookup_public_key(
    resolver: &dyn Resolver,
    domain: &str,
    selector: &str,
    lookup_timeout: Duration,
) -> Result<RetrievedKey, DKIMError> {
    let dns_name = format!("{selector}.{DNS_NAMESPACE}.{domain}");

    let txt_records = tokio::time::timeout(lookup_timeout, resolver.resolve_txt(&dns_name))
        .await
        .map_err(|_| {
            DKIMError::KeyUnavailable(format!("DNS lookup for {dns_name} timed out"))
        })?
        .map_err(|err| to_key_error(&dns_name, err))?;

    // A name should hold a single record; when rotation briefly
    // leaves several in place the first is authoritative here.
    let txt = txt_records.first().ok_or(DKIMError::NoKeyForSignature)?;
    tracing::debug!("DKIM TXT for {dns_name}: {txt:?}");

    let record = DkimRecord::parse(txt)?;
    let key = record.rsa_public_key()?;

    Ok(RetrievedKey {
        key: Arc::new(key),
        testing: record.is_testing(),
    })
}

/// Fetch the public key for (selector, domain) through the cache.
///
/// The cache lock is released before the resolver is consulted and
/// reacquired only to store the outcome.
pub(crate) async fn retrieve_public_key(
    resolver: &dyn Resolver,
    domain: &str,
    selector: &str,
    lookup_timeout: Duration,
) -> Result<RetrievedKey, DKIMError> {
    if let Some(cached) = cache_get(selector, domain) {
        return cached;
    }

    let result = lookup_public_key(resolver, domain, selector, lookup_timeout).await;
    cache_insert(selector, domain, &result);
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use dns_resolver::TestResolver;

    const TEST_RECORD: &str = "v=DKIM1; k=rsa; p=MIIBIjANBgkqhkiG9w0BAQEFAAOCAQ8AMIIBCgKCAQEA6gmVDBSBJ0l1/33uAF0gwIsrjQV6nnYjL9DMX6+ez4NNJ2um0InYy128Rd+OlIhmdSld6g3tj3O6R+BwsYsQgU8RWE8VJaRybvPw2P3Asgms4uPrFWHSFiWMPH0P9i/oPwnUO9jZKHiz4+MzFC3bG8BacX7YIxCuWnDU8XNmNsRaLmrv9CHX4/3GHyoHSmDA1ETtyz9JHRCOC8ho8C7b4f2Auwedlau9Lid9LGBhozhgRFhrFwFMe93y34MO1clPbY6HwxpudKWBkMQCTlmXVRnkKxHlJ+fYCyC2jjpCIbGWj2oLxBtFOASWMESR4biW0ph2bsZXslcUSPMTVTkFxQIDAQAB";

    fn timeout() -> Duration {
        Duration::from_secs(5)
    }

    #[tokio::test]
    async fn test_retrieve_public_key() {
        let resolver =
            TestResolver::default().with_txt("dkim._domainkey.pk-one.example", TEST_RECORD);

        let retrieved =
            retrieve_public_key(&resolver, "pk-one.example", "dkim", timeout())
                .await
                .unwrap();
        assert!(!retrieved.testing);
    }

    #[tokio::test]
    async fn test_retrieve_caches_success() {
        let resolver =
            TestResolver::default().with_txt("dkim._domainkey.pk-two.example", TEST_RECORD);

        for _ in 0..3 {
            retrieve_public_key(&resolver, "pk-two.example", "dkim", timeout())
                .await
                .unwrap();
        }
        assert_eq!(resolver.num_queries(), 1);
    }

    #[tokio::test]
    async fn test_retrieve_caches_failure() {
        let resolver = TestResolver::default();

        for _ in 0..3 {
            let err = retrieve_public_key(&resolver, "pk-three.example", "dkim", timeout())
                .await
                .unwrap_err();
            assert_eq!(err, DKIMError::NoKeyForSignature);
        }
        assert_eq!(resolver.num_queries(), 1);
    }

    #[tokio::test]
    async fn test_transient_failure_classification() {
        let resolver = TestResolver::default().with_error(
            "dkim._domainkey.pk-four.example",
            DnsError::Timeout("dkim._domainkey.pk-four.example".to_string()),
        );

        let err = retrieve_public_key(&resolver, "pk-four.example", "dkim", timeout())
            .await
            .unwrap_err();
        assert!(matches!(err, DKIMError::KeyUnavailable(_)));
    }

    #[tokio::test]
    async fn test_revoked_key() {
        let resolver = TestResolver::default()
            .with_txt("dkim._domainkey.pk-five.example", "v=DKIM1; k=rsa; p=");

        let err = retrieve_public_key(&resolver, "pk-five.example", "dkim", timeout())
            .await
            .unwrap_err();
        assert_eq!(err, DKIMError::KeyRevoked);
    }
}
