use crate::{parser, DKIMError};
use dns_resolver::Name;
use indexmap::map::IndexMap;
use std::str::FromStr;

pub(crate) const DKIM_SIGNATURE_HEADER_NAME: &str = "DKIM-Signature";

const REQUIRED_TAGS: &[&str] = &["v", "a", "b", "bh", "d", "h", "s"];

/// A parsed and validated DKIM-Signature header value.
///
/// Tags keep their parse order; `raw` is the value exactly as it
/// appeared in the message, which the header hash is computed over
/// (with the `b=` value blanked).
#[derive(Clone, Debug, Default)]
pub struct DkimHeader {
    tags: IndexMap<String, parser::Tag>,
    raw: String,
}

impl DkimHeader {
    /// <https://datatracker.ietf.org/doc/html/rfc6376#section-6.1.1>
    pub fn parse(value: &str) -> Result<Self, DKIMError> {
        let (_, tags) = parser::tag_list(value)
            .map_err(|err| DKIMError::SignatureSyntaxError(err.to_string()))?;

        let mut tags_map = IndexMap::new();
        for tag in tags {
            if tags_map.insert(tag.name.clone(), tag).is_some() {
                return Err(DKIMError::SignatureSyntaxError(
                    "duplicate tag".to_string(),
                ));
            }
        }

        let header = DkimHeader {
            tags: tags_map,
            raw: value.to_owned(),
        };

        for &required in REQUIRED_TAGS {
            if header.get_tag(required).is_none() {
                return Err(DKIMError::SignatureMissingRequiredTag(required));
            }
        }

        if header.get_required_tag("v") != "1" {
            return Err(DKIMError::IncompatibleVersion);
        }

        // The From header must be in the signed set
        if !header
            .get_required_tag("h")
            .split(':')
            .any(|h| h.trim().eq_ignore_ascii_case("from"))
        {
            return Err(DKIMError::FromFieldNotSigned);
        }

        // An absent q= means dns/txt; anything else explicit is not
        // something we can query
        if let Some(query_method) = header.get_tag("q") {
            if query_method != "dns/txt" {
                return Err(DKIMError::UnsupportedQueryMethod);
            }
        }

        // When i= is present, its domain part must be the signing
        // domain or a subdomain of it
        if let Some(identity) = header.get_tag("i") {
            let signing_domain = header.get_required_tag("d");
            let Some((_local, domain)) = identity.split_once('@') else {
                return Err(DKIMError::DomainMismatch);
            };

            let i_domain = Name::from_str_relaxed(domain).map_err(|_| DKIMError::DomainMismatch)?;
            let d_domain =
                Name::from_str_relaxed(signing_domain).map_err(|_| DKIMError::DomainMismatch)?;

            if !d_domain.zone_of(&i_domain) {
                return Err(DKIMError::DomainMismatch);
            }
        }

        Ok(header)
    }

    pub fn get_tag(&self, name: &str) -> Option<&str> {
        self.tags.get(name).map(|tag| tag.value.as_str())
    }

    pub fn get_raw_tag(&self, name: &str) -> Option<&str> {
        self.tags.get(name).map(|tag| tag.raw_value.as_str())
    }

    /// Get the named tag, attempting to parse it into an `R`
    pub fn parse_tag<R>(&self, name: &str) -> Result<Option<R>, DKIMError>
    where
        R: FromStr,
        <R as FromStr>::Err: std::fmt::Display,
    {
        match self.get_tag(name) {
            None => Ok(None),
            Some(value) => {
                let value: R = value.parse().map_err(|err| {
                    DKIMError::SignatureSyntaxError(format!(
                        "invalid \"{name}\" tag value: {err:#}"
                    ))
                })?;
                Ok(Some(value))
            }
        }
    }

    /// Required tags have been checked by `parse`, and the builder
    /// always populates them, so absence is a programming error.
    pub fn get_required_tag(&self, name: &str) -> &str {
        match self.get_tag(name) {
            Some(value) => value,
            None => panic!("required tag {name} is not present"),
        }
    }

    pub fn get_required_raw_tag(&self, name: &str) -> &str {
        match self.get_raw_tag(name) {
            Some(value) => value,
            None => panic!("required tag {name} is not present"),
        }
    }

    /// The names listed in h=, trimmed and lowercased, in order
    pub fn signed_header_names(&self) -> Vec<String> {
        self.get_required_tag("h")
            .split(':')
            .map(|name| name.trim().to_ascii_lowercase())
            .collect()
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Generate the header value from the tags.
    ///
    /// Physical lines are capped at WIDTH octets, counting the leading
    /// HTAB on continuation lines, so that the fully folded header
    /// satisfies the emission contract.
    fn serialize(&self) -> String {
        const WIDTH: usize = 72;

        let mut lines: Vec<String> = Vec::new();
        let mut line = String::new();

        for (name, tag) in &self.tags {
            let value = &tag.value;

            // The b tag always opens a fresh line: the header is
            // serialized once with b= empty for hashing and once with
            // the signature filled in, and the preceding tags must
            // wrap identically in both passes. The h tag opens a
            // fresh line so it can wrap on list element boundaries.
            let wants_fresh_line = name == "b" || name == "h";

            if !line.is_empty()
                && (wants_fresh_line || line.len() + name.len() + value.len() + 3 > WIDTH)
            {
                lines.push(std::mem::take(&mut line));
                line.push('\t');
            }

            if !(line.is_empty() || line.ends_with('\t')) {
                line.push(' ');
            }
            line.push_str(name);
            line.push('=');

            if line.len() + value.len() + 1 <= WIDTH {
                line.push_str(value);
            } else if name == "h" {
                for (idx, header) in value.split(':').enumerate() {
                    if idx > 0 {
                        line.push(':');
                    }
                    if line.len() + header.len() + 1 > WIDTH {
                        lines.push(std::mem::take(&mut line));
                        line.push('\t');
                    }
                    line.push_str(header);
                }
            } else {
                // base64 payloads and overlong atoms break wherever
                // the line fills up
                for c in value.chars() {
                    if line.len() + 1 >= WIDTH {
                        lines.push(std::mem::take(&mut line));
                        line.push('\t');
                    }
                    line.push(c);
                }
            }
            line.push(';');
        }

        if line != "\t" && !line.is_empty() {
            lines.push(line);
        }

        lines.join("\r\n")
    }
}

/// Assembles the DKIM-Signature value emitted by the signer.
#[derive(Clone)]
pub(crate) struct DkimHeaderBuilder {
    header: DkimHeader,
    time: Option<chrono::DateTime<chrono::Utc>>,
}

impl DkimHeaderBuilder {
    pub(crate) fn new() -> Self {
        DkimHeaderBuilder {
            header: DkimHeader::default(),
            time: None,
        }
    }

    pub(crate) fn add_tag(mut self, name: &str, value: &str) -> Self {
        let tag = parser::Tag {
            name: name.to_owned(),
            value: value.to_owned(),
            raw_value: value.to_owned(),
        };
        self.header.tags.insert(name.to_owned(), tag);
        self
    }

    pub(crate) fn set_signed_headers(self, headers: &[String]) -> Self {
        let value = headers.join(":");
        self.add_tag("h", &value)
    }

    pub(crate) fn set_time(mut self, time: chrono::DateTime<chrono::Utc>) -> Self {
        self.time = Some(time);
        self.add_tag("t", &time.timestamp().to_string())
    }

    pub(crate) fn set_expiry(self, duration: chrono::Duration) -> Result<Self, DKIMError> {
        let time = self.time.ok_or(DKIMError::BuilderError(
            "DkimHeaderBuilder: set_time must be called prior to calling set_expiry",
        ))?;
        let expiry = (time + duration).timestamp();
        Ok(self.add_tag("x", &expiry.to_string()))
    }

    pub(crate) fn build(mut self) -> DkimHeader {
        self.header.raw = self.header.serialize();
        self.header
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signed_header_list(headers: &[&str]) -> Vec<String> {
        headers.iter().map(|h| h.to_lowercase()).collect()
    }

    #[test]
    fn test_builder_simple() {
        let header = DkimHeaderBuilder::new()
            .add_tag("v", "1")
            .add_tag("a", "rsa-sha256")
            .build();
        k9::snapshot!(header.raw(), "v=1; a=rsa-sha256;");
    }

    #[test]
    fn test_builder_signed_headers() {
        let header = DkimHeaderBuilder::new()
            .add_tag("v", "2")
            .set_signed_headers(&signed_header_list(&["header1", "header2", "header3"]))
            .build();
        k9::snapshot!(
            header.raw(),
            r#"
v=2;\r
\th=header1:header2:header3;
"#
        );
    }

    #[test]
    fn test_builder_time() {
        use chrono::TimeZone;

        let time = chrono::Utc.with_ymd_and_hms(2021, 1, 1, 0, 0, 1).unwrap();

        let header = DkimHeaderBuilder::new()
            .set_time(time)
            .set_expiry(chrono::Duration::try_hours(3).expect("3 hours ok"))
            .unwrap()
            .build();
        k9::snapshot!(header.raw(), "t=1609459201; x=1609470001;");
    }

    #[test]
    fn test_serialized_lines_within_width() {
        let b64: String = "A".repeat(345);
        let header = DkimHeaderBuilder::new()
            .add_tag("v", "1")
            .add_tag("a", "rsa-sha256")
            .add_tag("d", "long-enough-domain-name.example.com")
            .add_tag("s", "selector2024")
            .add_tag("c", "relaxed/relaxed")
            .set_signed_headers(&signed_header_list(&[
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
            ]))
            .add_tag("bh", "ecGWgWCJeWxJFeM0urOVWP+KOlqqvsQYKOpYUP8nk7I=")
            .add_tag("b", &b64)
            .build();

        for line in header.raw().split("\r\n") {
            assert!(line.len() <= 72, "line too long: {line:?}");
        }

        // and the folded form parses back to the same tag values
        let parsed = DkimHeader::parse(header.raw()).unwrap();
        assert_eq!(parsed.get_required_tag("b"), b64);
        assert_eq!(
            parsed.get_required_tag("d"),
            "long-enough-domain-name.example.com"
        );
        assert_eq!(
            parsed.get_required_tag("h"),
            "from:to:cc:subject:date:message-id:reply-to:references:in-reply-to:content-type:mime-version"
        );
    }

    #[test]
    fn test_parse_header() {
        let header = r#"v=1; a=rsa-sha256; d=example.net; s=brisbane;
c=relaxed/simple; q=dns/txt; i=foo@eng.example.net;
t=1117574938; x=9118006938; l=200;
h=from:to:subject:date:keywords:keywords;
z=From:foo@eng.example.net|To:joe@example.com|
Subject:demo=20run|Date:July=205,=202005=203:44:08=20PM=20-0700;
bh=MTIzNDU2Nzg5MDEyMzQ1Njc4OTAxMjM0NTY3ODkwMTI=;
b=dzdVyOfAKCdLXdJOc9G2q8LoXSlEniSbav+yuU4zGeeruD00lszZ
      VoG4ZHRNiYzR
        "#;
        let parsed = DkimHeader::parse(header).unwrap();
        assert_eq!(parsed.get_required_tag("d"), "example.net");
        assert_eq!(parsed.parse_tag::<u64>("t").unwrap(), Some(1117574938));
        assert_eq!(parsed.parse_tag::<usize>("l").unwrap(), Some(200));
    }

    #[test]
    fn test_parse_header_missing_tag() {
        let header = "v=1; a=rsa-sha256; bh=a; b=b";
        assert_eq!(
            DkimHeader::parse(header).unwrap_err(),
            DKIMError::SignatureMissingRequiredTag("d")
        );
    }

    #[test]
    fn test_parse_header_incompatible_version() {
        let header =
            "v=3; a=rsa-sha256; d=example.net; s=brisbane; h=from:subject; bh=hash; b=hash";
        assert_eq!(
            DkimHeader::parse(header).unwrap_err(),
            DKIMError::IncompatibleVersion
        );
    }

    #[test]
    fn test_parse_header_missing_from_in_signed_headers() {
        let header = "v=1; a=rsa-sha256; d=example.net; s=brisbane; h=Subject:A:B; bh=hash; b=hash";
        assert_eq!(
            DkimHeader::parse(header).unwrap_err(),
            DKIMError::FromFieldNotSigned
        );
    }

    #[test]
    fn test_parse_header_domain_mismatch() {
        let header = "v=1; a=rsa-sha256; d=example.net; s=brisbane; i=foo@hein.com; h=from; bh=hash; b=hash";
        assert_eq!(
            DkimHeader::parse(header).unwrap_err(),
            DKIMError::DomainMismatch
        );
    }

    #[test]
    fn test_parse_header_subdomain_identity() {
        let header = "v=1; a=rsa-sha256; d=example.net; s=brisbane; i=foo@eng.example.net; h=from; bh=hash; b=hash";
        assert!(DkimHeader::parse(header).is_ok());
    }

    #[test]
    fn test_parse_header_query_method() {
        let header =
            "v=1; a=rsa-sha256; d=example.net; s=brisbane; q=dns/other; h=from; bh=hash; b=hash";
        assert_eq!(
            DkimHeader::parse(header).unwrap_err(),
            DKIMError::UnsupportedQueryMethod
        );
    }
}
