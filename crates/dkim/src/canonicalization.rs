use crate::hash::LimitHasher;

#[derive(PartialEq, Eq, Clone, Debug, Copy)]
pub enum Type {
    Simple,
    Relaxed,
}

impl Type {
    pub fn canon_name(&self) -> &'static str {
        match self {
            Self::Simple => "simple",
            Self::Relaxed => "relaxed",
        }
    }

    pub(crate) fn canon_body(&self, body: &[u8], hasher: &mut LimitHasher) {
        match self {
            Self::Simple => body_simple(body, hasher),
            Self::Relaxed => body_relaxed(body, hasher),
        }
    }

    pub(crate) fn canon_header_into(&self, name: &str, value: &[u8], out: &mut Vec<u8>) {
        match self {
            Self::Simple => header_simple(name, value, out),
            Self::Relaxed => header_relaxed(name, value, out),
        }
    }
}

/// <https://datatracker.ietf.org/doc/html/rfc6376#section-3.4.3>
/// Trailing empty lines collapse into the single CRLF that terminates
/// the body; a missing or empty body is a single CRLF.
fn body_simple(mut body: &[u8], hasher: &mut LimitHasher) {
    if body.is_empty() {
        hasher.hash(b"\r\n");
        return;
    }

    while body.ends_with(b"\r\n\r\n") {
        body = &body[..body.len() - 2];
    }

    hasher.hash(body);
}

/// Iterate CRLF-terminated lines. The final line is yielded even if
/// the terminator is missing.
struct Lines<'a> {
    rest: &'a [u8],
}

impl<'a> Iterator for Lines<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<&'a [u8]> {
        if self.rest.is_empty() {
            return None;
        }
        match memchr::memmem::find(self.rest, b"\r\n") {
            Some(idx) => {
                let (line, rest) = self.rest.split_at(idx + 2);
                self.rest = rest;
                Some(line)
            }
            None => {
                let line = self.rest;
                self.rest = b"";
                Some(line)
            }
        }
    }
}

fn lines(body: &[u8]) -> Lines {
    Lines { rest: body }
}

/// <https://datatracker.ietf.org/doc/html/rfc6376#section-3.4.4>
/// Within each line, WSP runs become a single SP and trailing WSP is
/// dropped; trailing empty lines are dropped. A missing or empty body
/// is the empty string.
fn body_relaxed(mut body: &[u8], hasher: &mut LimitHasher) {
    if body.is_empty() {
        return;
    }

    while body.ends_with(b"\r\n\r\n") {
        body = &body[..body.len() - 2];
    }

    for line in lines(body) {
        let line = trim_ws_end(line);

        let mut idx = 0;
        while idx < line.len() {
            match line[idx] {
                b' ' | b'\t' => {
                    hasher.hash(b" ");
                    while idx < line.len() && matches!(line[idx], b' ' | b'\t') {
                        idx += 1;
                    }
                }
                _ => {
                    let start = idx;
                    while idx < line.len() && !matches!(line[idx], b' ' | b'\t') {
                        idx += 1;
                    }
                    hasher.hash(&line[start..idx]);
                }
            }
        }

        hasher.hash(b"\r\n");
    }
}

// https://datatracker.ietf.org/doc/html/rfc6376#section-3.4.1
fn header_simple(name: &str, value: &[u8], out: &mut Vec<u8>) {
    out.extend_from_slice(name.as_bytes());
    out.extend_from_slice(b": ");
    out.extend_from_slice(value);
    out.extend_from_slice(b"\r\n");
}

// https://datatracker.ietf.org/doc/html/rfc6376#section-3.4.2
fn header_relaxed(name: &str, value: &[u8], out: &mut Vec<u8>) {
    let name = name.to_lowercase();
    out.extend_from_slice(name.trim_end().as_bytes());
    out.push(b':');

    let value = trim_ws_start(trim_ws_end(value));
    let mut in_space_run = false;
    for &c in value {
        match c {
            // unfolding removes the line break itself; the WSP that
            // follows it joins the surrounding run
            b'\r' | b'\n' => {}
            b' ' | b'\t' => {
                if !in_space_run {
                    in_space_run = true;
                    out.push(b' ');
                }
            }
            _ => {
                in_space_run = false;
                out.push(c);
            }
        }
    }

    out.extend_from_slice(b"\r\n");
}

fn trim_ws_start(mut data: &[u8]) -> &[u8] {
    while let Some((b' ' | b'\t' | b'\r' | b'\n', rest)) = data.split_first() {
        data = rest;
    }
    data
}

fn trim_ws_end(mut data: &[u8]) -> &[u8] {
    while let Some((b' ' | b'\t' | b'\r' | b'\n', rest)) = data.split_last() {
        data = rest;
    }
    data
}
