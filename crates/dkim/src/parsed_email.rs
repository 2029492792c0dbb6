use crate::header::DKIM_SIGNATURE_HEADER_NAME;
use crate::DKIMError;
use mailparse::MailHeader;

/// An RFC 5322 message split into headers and raw body bytes.
///
/// DKIM hashes the body exactly as it sits on the wire, so no
/// transfer decoding is applied and the original bytes are kept
/// reachable by offset. Input must use CRLF line endings and contain
/// a header/body separator; anything else is not a message we can
/// sign or verify.
pub struct ParsedEmail<'a> {
    headers: Vec<MailHeader<'a>>,
    bytes: &'a [u8],
    body_offset: usize,
}

impl<'a> ParsedEmail<'a> {
    pub fn parse_bytes(bytes: &'a [u8]) -> Result<Self, DKIMError> {
        for idx in memchr::memchr_iter(b'\n', bytes) {
            if idx == 0 || bytes[idx - 1] != b'\r' {
                return Err(DKIMError::CanonicalLineEndingsRequired);
            }
        }

        let body_offset = match memchr::memmem::find(bytes, b"\r\n\r\n") {
            Some(idx) => idx + 4,
            None => return Err(DKIMError::MissingHeaderBodySeparator),
        };

        let (headers, _) = mailparse::parse_headers(bytes)
            .map_err(|err| DKIMError::MalformedMessage(err.to_string()))?;

        Ok(Self {
            headers,
            bytes,
            body_offset,
        })
    }

    pub fn get_body_bytes(&self) -> &'a [u8] {
        &self.bytes[self.body_offset..]
    }

    pub fn get_headers(&self) -> &[MailHeader<'a>] {
        &self.headers
    }

    /// The raw values of every DKIM-Signature header, top to bottom.
    pub fn dkim_signature_values(&self) -> Vec<&[u8]> {
        self.headers
            .iter()
            .filter(|h| {
                h.get_key_ref()
                    .eq_ignore_ascii_case(DKIM_SIGNATURE_HEADER_NAME)
            })
            .map(|h| h.get_value_raw())
            .collect()
    }

    /// Case-insensitive presence count for a header name.
    pub fn count_header(&self, name: &str) -> usize {
        self.headers
            .iter()
            .filter(|h| h.get_key_ref().eq_ignore_ascii_case(name))
            .count()
    }
}
