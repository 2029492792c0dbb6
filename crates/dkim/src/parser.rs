use crate::{canonicalization, DKIMError};
use nom::bytes::complete::{tag, take_while, take_while1};
use nom::character::complete::alpha1;
use nom::combinator::{opt, recognize};
use nom::multi::fold_many0;
use nom::sequence::{delimited, pair, preceded, terminated};
use nom::IResult;

#[derive(Clone, Debug, PartialEq)]
/// One `tag=value` pair from a DKIM tag-list
pub struct Tag {
    /// Name of the tag (v, a, h, ...)
    pub name: String,
    /// Value with folding whitespace removed
    pub value: String,
    /// Value as it appeared in the text
    pub raw_value: String,
}

/// Parse a tag-list, the value syntax shared by the DKIM-Signature
/// header and the DKIM DNS TXT record.
/// <https://datatracker.ietf.org/doc/html/rfc6376#section-3.2>
/// tag-list  =  tag-spec *( ";" tag-spec ) [ ";" ]
pub fn tag_list(input: &str) -> IResult<&str, Vec<Tag>> {
    let (input, first) = tag_spec(input)?;

    terminated(
        fold_many0(
            preceded(tag(";"), tag_spec),
            move || vec![first.clone()],
            |mut acc: Vec<Tag>, item| {
                acc.push(item);
                acc
            },
        ),
        opt(tag(";")),
    )(input)
}

/// tag-spec  =  [FWS] tag-name [FWS] "=" [FWS] tag-value [FWS]
fn tag_spec(input: &str) -> IResult<&str, Tag> {
    let (input, name) = delimited(opt(fws), tag_name, opt(fws))(input)?;
    let (input, _) = tag("=")(input)?;

    // The value is parsed twice: once preserving the embedded folding
    // whitespace and once with it stripped.
    let value_input = input;
    let (_, raw_value) = delimited(opt(fws), raw_tag_value, opt(fws))(value_input)?;
    let (input, value) = delimited(opt(fws), tag_value, opt(fws))(value_input)?;

    Ok((
        input,
        Tag {
            name: name.to_owned(),
            value,
            raw_value,
        },
    ))
}

/// tag-name  =  ALPHA *ALNUMPUNC
/// ALNUMPUNC =  ALPHA / DIGIT / "_"
fn tag_name(input: &str) -> IResult<&str, &str> {
    recognize(pair(
        alpha1,
        take_while(|c: char| c.is_ascii_alphanumeric() || c == '_'),
    ))(input)
}

/// tval      =  1*VALCHAR
/// VALCHAR   =  %x21-3A / %x3C-7E
fn is_valchar(c: char) -> bool {
    ('!'..=':').contains(&c) || ('<'..='~').contains(&c)
}

/// tag-value =  [ tval *( 1*(WSP / FWS) tval ) ]
fn tag_value(input: &str) -> IResult<&str, String> {
    match opt(take_while1(is_valchar))(input)? {
        (input, Some(first)) => fold_many0(
            preceded(fws, take_while1(is_valchar)),
            || first.to_owned(),
            |mut acc: String, item| {
                acc += item;
                acc
            },
        )(input),
        (input, None) => Ok((input, String::new())),
    }
}

fn raw_tag_value(input: &str) -> IResult<&str, String> {
    match opt(take_while1(is_valchar))(input)? {
        (input, Some(first)) => fold_many0(
            pair(fws, take_while1(is_valchar)),
            || first.to_owned(),
            |mut acc: String, (ws, item)| {
                acc += ws;
                acc += item;
                acc
            },
        )(input),
        (input, None) => Ok((input, String::new())),
    }
}

/// FWS allows a value to be folded over multiple lines: CRLF followed
/// by at least one WSP joins onto the preceding line.
fn fws(input: &str) -> IResult<&str, &str> {
    take_while1(|c| c == ' ' || c == '\t' || c == '\r' || c == '\n')(input)
}

/// Accept only the `a=` value this implementation signs and verifies
/// with.
pub(crate) fn parse_signature_algorithm(value: &str) -> Result<(), DKIMError> {
    match value {
        "rsa-sha256" => Ok(()),
        other => Err(DKIMError::UnsupportedAlgorithm(other.to_string())),
    }
}

/// Parses the canonicalization value (passed in c=) and returns
/// canonicalization for (Header, Body). An absent or partial value
/// falls back to simple per RFC 6376 section 3.5.
pub(crate) fn parse_canonicalization(
    value: Option<&str>,
) -> Result<(canonicalization::Type, canonicalization::Type), DKIMError> {
    use canonicalization::Type::{Relaxed, Simple};

    let Some(value) = value else {
        return Ok((Simple, Simple));
    };

    let (header, body) = match value.split_once('/') {
        Some((header, body)) => (header, Some(body)),
        None => (value, None),
    };

    let header = match header {
        "simple" => Simple,
        "relaxed" => Relaxed,
        _ => return Err(DKIMError::UnsupportedCanonicalizationType(value.to_owned())),
    };
    let body = match body {
        None => Simple,
        Some("simple") => Simple,
        Some("relaxed") => Relaxed,
        Some(_) => return Err(DKIMError::UnsupportedCanonicalizationType(value.to_owned())),
    };

    Ok((header, body))
}
