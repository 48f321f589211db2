//! Comparison-stable rendering of configuration file content.
//!
//! Two strategies exist. Plain text normalizes line terminators and strips
//! trailing whitespace per line. XML is parsed and re-serialized with a fixed
//! indentation, dropping whitespace-only text nodes so that documents that
//! differ only in pretty-printing canonicalize identically. Attribute values,
//! element text and tail text are written back byte-for-byte.
//!
//! XML that cannot be parsed (malformed, DOCTYPE-bearing, multiple roots)
//! falls back to the text strategy instead of failing.

use quick_xml::events::Event;
use quick_xml::{Reader, Writer};
use thiserror::Error;
use tracing::debug;

use crate::models::ContentType;

/// Indentation width used when re-serializing XML.
const XML_INDENT: usize = 2;

#[derive(Debug, Error)]
pub enum CanonicalError {
    #[error("malformed XML: {0}")]
    Malformed(String),
    #[error("unsupported XML construct: {0}")]
    Unsupported(&'static str),
}

/// Canonicalize `raw` using the strategy for `content_type`.
pub fn canonicalize(raw: &str, content_type: ContentType) -> String {
    if raw.is_empty() {
        return String::new();
    }
    match content_type {
        ContentType::Text => canonicalize_text(raw),
        ContentType::Xml => match canonicalize_xml(raw) {
            Ok(xml) => xml,
            Err(e) => {
                debug!(error = %e, "xml canonicalization failed, using text form");
                canonicalize_text(raw)
            }
        },
    }
}

/// Normalize line terminators to `\n` and strip trailing whitespace per line.
pub fn canonicalize_text(raw: &str) -> String {
    normalize_line_endings(raw)
        .split('\n')
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n")
}

fn normalize_line_endings(raw: &str) -> String {
    raw.replace("\r\n", "\n").replace('\r', "\n")
}

/// Parse and re-serialize an XML document.
pub fn canonicalize_xml(raw: &str) -> Result<String, CanonicalError> {
    let normalized = normalize_line_endings(raw);
    let source = normalized.trim_start_matches('\u{feff}');

    let mut reader = Reader::from_str(source);
    reader.config_mut().trim_text(false);
    reader.config_mut().check_end_names = true;

    let mut writer = Writer::new_with_indent(Vec::new(), b' ', XML_INDENT);
    let mut depth: usize = 0;
    let mut seen_root = false;

    loop {
        let event = reader
            .read_event()
            .map_err(|e| CanonicalError::Malformed(e.to_string()))?;
        match event {
            Event::Eof => break,
            Event::Decl(_) => {}
            Event::DocType(_) => return Err(CanonicalError::Unsupported("DOCTYPE")),
            Event::Text(text) => {
                if text.iter().all(u8::is_ascii_whitespace) {
                    continue;
                }
                if depth == 0 {
                    return Err(CanonicalError::Malformed(
                        "text outside the root element".to_string(),
                    ));
                }
                write(&mut writer, Event::Text(text))?;
            }
            Event::Start(start) => {
                if depth == 0 {
                    if seen_root {
                        return Err(CanonicalError::Malformed(
                            "multiple root elements".to_string(),
                        ));
                    }
                    seen_root = true;
                }
                depth += 1;
                write(&mut writer, Event::Start(start))?;
            }
            Event::Empty(empty) => {
                if depth == 0 {
                    if seen_root {
                        return Err(CanonicalError::Malformed(
                            "multiple root elements".to_string(),
                        ));
                    }
                    seen_root = true;
                }
                write(&mut writer, Event::Empty(empty))?;
            }
            Event::End(end) => {
                depth = depth.checked_sub(1).ok_or_else(|| {
                    CanonicalError::Malformed("unexpected closing tag".to_string())
                })?;
                write(&mut writer, Event::End(end))?;
            }
            Event::CData(data) => {
                if depth == 0 {
                    return Err(CanonicalError::Malformed(
                        "CDATA outside the root element".to_string(),
                    ));
                }
                write(&mut writer, Event::CData(data))?;
            }
            other @ (Event::Comment(_) | Event::PI(_)) => write(&mut writer, other)?,
        }
    }

    if depth != 0 {
        return Err(CanonicalError::Malformed("unclosed element".to_string()));
    }
    if !seen_root {
        return Err(CanonicalError::Malformed("no root element".to_string()));
    }

    let mut out = String::from_utf8(writer.into_inner())
        .map_err(|e| CanonicalError::Malformed(e.to_string()))?;
    out.push('\n');
    Ok(out)
}

fn write(writer: &mut Writer<Vec<u8>>, event: Event<'_>) -> Result<(), CanonicalError> {
    writer
        .write_event(event)
        .map_err(|e| CanonicalError::Malformed(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_stays_empty() {
        assert_eq!(canonicalize("", ContentType::Text), "");
        assert_eq!(canonicalize("", ContentType::Xml), "");
    }

    #[test]
    fn text_normalizes_line_endings_and_trailing_space() {
        let raw = "a = 1  \r\nb =  2\t\rc\n";
        assert_eq!(canonicalize(raw, ContentType::Text), "a = 1\nb =  2\nc\n");
    }

    #[test]
    fn text_keeps_interior_whitespace() {
        let raw = "  key   =   value\n";
        assert_eq!(canonicalize(raw, ContentType::Text), "  key   =   value\n");
    }

    #[test]
    fn xml_ignores_indentation_differences() {
        let compact = concat!(
            r#"<configuration><appSettings><add key="a" value="1"/>"#,
            "</appSettings></configuration>",
        );
        let pretty = concat!(
            "<?xml version=\"1.0\"?>\r\n<configuration>\r\n    <appSettings>\r\n",
            "\t<add key=\"a\" value=\"1\"/>\r\n    </appSettings>\r\n</configuration>\r\n",
        );
        assert_eq!(
            canonicalize(compact, ContentType::Xml),
            canonicalize(pretty, ContentType::Xml)
        );
    }

    #[test]
    fn xml_preserves_attribute_values_and_text() {
        let raw = r#"<root><item name="  spaced  ">  some text </item>tail<b/></root>"#;
        let out = canonicalize(raw, ContentType::Xml);
        assert!(out.contains(r#"name="  spaced  ""#));
        assert!(out.contains("  some text "));
        assert!(out.contains("tail"));
    }

    #[test]
    fn xml_attribute_change_is_visible() {
        let a = canonicalize(r#"<r><x v="1"/></r>"#, ContentType::Xml);
        let b = canonicalize(r#"<r><x v="2"/></r>"#, ContentType::Xml);
        assert_ne!(a, b);
    }

    #[test]
    fn malformed_xml_falls_back_to_text() {
        let raw = "<root><open></root>  \r\n";
        assert!(canonicalize_xml(raw).is_err());
        assert_eq!(canonicalize(raw, ContentType::Xml), canonicalize_text(raw));
    }

    #[test]
    fn doctype_falls_back_to_text() {
        let raw = "<!DOCTYPE root [<!ENTITY x \"y\">]>\n<root>&x;</root>\n";
        assert!(canonicalize_xml(raw).is_err());
        assert_eq!(canonicalize(raw, ContentType::Xml), canonicalize_text(raw));
    }

    #[test]
    fn unclosed_and_rootless_documents_are_rejected() {
        assert!(canonicalize_xml("<a><b></b>").is_err());
        assert!(canonicalize_xml("just words").is_err());
        assert!(canonicalize_xml("<a/><b/>").is_err());
    }

    #[test]
    fn canonicalization_is_idempotent() {
        let inputs = [
            ("k = v  \r\n\r\nother\t\n", ContentType::Text),
            (
                concat!(
                    "<?xml version=\"1.0\"?>\n<a x=\"1\">\n  <!-- note -->\n",
                    "  <b>text</b>tail\n  <c/>\n  <d></d>\n</a>\n",
                ),
                ContentType::Xml,
            ),
            ("<a><b>unclosed</a>  \n", ContentType::Xml),
            ("<r><![CDATA[ raw <stuff> ]]></r>", ContentType::Xml),
        ];
        for (raw, ct) in inputs {
            let once = canonicalize(raw, ct);
            let twice = canonicalize(&once, ct);
            assert_eq!(once, twice, "not idempotent for {raw:?}");
        }
    }
}
