#![warn(missing_docs)]

//! Content sniffing for requests without a `Content-Type` header. Only the
//! first 512 bytes are examined; magic-byte detection (PNG/JPEG/PDF) goes
//! through the `infer` crate, textual shapes are matched by hand.

use crate::body::ParserKind;

/// What the sniffer decided a body looks like.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SniffedType {
    Json,
    Xml,
    Html,
    UrlEncoded,
    Binary,
    Text,
}

impl SniffedType {
    /// The parser this sniffed type dispatches to.
    pub(crate) fn parser(&self) -> ParserKind {
        match self {
            SniffedType::Json => ParserKind::Json,
            SniffedType::Xml | SniffedType::Html | SniffedType::Text => ParserKind::Text,
            SniffedType::UrlEncoded => ParserKind::UrlEncoded,
            SniffedType::Binary => ParserKind::Raw,
        }
    }

    /// The content type recorded on the parse result.
    pub(crate) fn content_type(&self) -> &'static str {
        match self {
            SniffedType::Json => "application/json",
            SniffedType::Xml => "application/xml",
            SniffedType::Html => "text/html",
            SniffedType::UrlEncoded => "application/x-www-form-urlencoded",
            SniffedType::Binary => "application/octet-stream",
            SniffedType::Text => "text/plain",
        }
    }
}

/// Sniffs a body head (at most 512 bytes).
pub(crate) fn sniff(head: &[u8]) -> SniffedType {
    let trimmed = trim_start(head);

    if trimmed.starts_with(b"{") || trimmed.starts_with(b"[") {
        return SniffedType::Json;
    }
    if trimmed.starts_with(b"<?xml") {
        return SniffedType::Xml;
    }
    if starts_with_ignore_case(trimmed, b"<!doctype") || starts_with_ignore_case(trimmed, b"<html")
    {
        return SniffedType::Html;
    }
    if trimmed.len() >= 2
        && trimmed[0] == b'<'
        && trimmed[1].is_ascii_alphabetic()
    {
        return SniffedType::Xml;
    }
    if looks_urlencoded(trimmed) {
        return SniffedType::UrlEncoded;
    }
    if let Some(known) = infer::get(head) {
        if matches!(
            known.mime_type(),
            "image/png" | "image/jpeg" | "application/pdf"
        ) {
            return SniffedType::Binary;
        }
    }
    if head.iter().all(|&b| is_printable(b)) {
        SniffedType::Text
    } else {
        SniffedType::Binary
    }
}

fn trim_start(head: &[u8]) -> &[u8] {
    let start = head
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(head.len());
    &head[start..]
}

fn starts_with_ignore_case(head: &[u8], prefix: &[u8]) -> bool {
    head.len() >= prefix.len()
        && head[..prefix.len()]
            .iter()
            .zip(prefix)
            .all(|(a, b)| a.eq_ignore_ascii_case(b))
}

// A k=v(&k=v)* shape of printable characters with no whitespace.
fn looks_urlencoded(head: &[u8]) -> bool {
    if head.is_empty() || !head.iter().all(|&b| is_printable(b) && b != b' ') {
        return false;
    }
    let Ok(s) = std::str::from_utf8(head) else {
        return false;
    };
    s.split('&').all(|pair| {
        pair.split_once('=')
            .map(|(k, _)| !k.is_empty())
            .unwrap_or(false)
    })
}

fn is_printable(b: u8) -> bool {
    b.is_ascii_graphic() || matches!(b, b' ' | b'\t' | b'\r' | b'\n')
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn json_shapes() {
        assert_eq!(sniff(b"  {\"a\":1}"), SniffedType::Json);
        assert_eq!(sniff(b"[1,2]"), SniffedType::Json);
    }

    #[test]
    fn xml_and_html_shapes() {
        assert_eq!(sniff(b"<?xml version=\"1.0\"?><a/>"), SniffedType::Xml);
        assert_eq!(sniff(b"<record><id>1</id></record>"), SniffedType::Xml);
        assert_eq!(sniff(b"<!DOCTYPE html><html>"), SniffedType::Html);
        assert_eq!(sniff(b"<HTML><body>"), SniffedType::Html);
    }

    #[test]
    fn urlencoded_shape() {
        assert_eq!(sniff(b"a=1&b=two&c="), SniffedType::UrlEncoded);
        assert_ne!(sniff(b"not a form"), SniffedType::UrlEncoded);
        assert_ne!(sniff(b"=nokey"), SniffedType::UrlEncoded);
    }

    #[test]
    fn magic_bytes_are_binary() {
        let png = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0];
        assert_eq!(sniff(&png), SniffedType::Binary);
        let jpeg = [0xFF, 0xD8, 0xFF, 0xE0, 0, 0, 0, 0];
        assert_eq!(sniff(&jpeg), SniffedType::Binary);
        assert_eq!(sniff(b"%PDF-1.7 rest"), SniffedType::Binary);
    }

    #[test]
    fn printable_falls_back_to_text_and_bytes_to_binary() {
        assert_eq!(sniff(b"just a sentence.\n"), SniffedType::Text);
        assert_eq!(sniff(&[0x00, 0x01, 0x02]), SniffedType::Binary);
    }
}
