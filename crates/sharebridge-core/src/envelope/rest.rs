//! SharePoint REST `$batch`: `multipart/mixed` with one part per call.
//!
//! Reads go inline in the batch; each write gets its own changeset so a
//! failing write does not roll back its siblings. Responses are matched by
//! position.

use crate::call::ApiCall;
use crate::error::{BridgeError, BridgeResult};
use crate::types::{BridgeConfig, Dialect, Payload, ResponseEntry, TransportRequest, TransportResponse};
use reqwest::Method;
use std::collections::HashMap;
use std::fmt::Write as _;
use uuid::Uuid;

const CRLF: &str = "\r\n";

pub fn encode(config: &BridgeConfig, calls: &[&ApiCall]) -> BridgeResult<TransportRequest> {
    let boundary = format!("batch_{}", Uuid::new_v4());
    let mut body = String::new();

    for call in calls {
        let mut part = String::new();
        write_http_part(&mut part, config, call)?;
        if *call.method() == Method::GET {
            let _ = write!(body, "--{}{}", boundary, CRLF);
            body.push_str(&part);
        } else {
            let changeset = format!("changeset_{}", Uuid::new_v4());
            let _ = write!(body, "--{}{}", boundary, CRLF);
            let _ = write!(
                body,
                "Content-Type: multipart/mixed; boundary=\"{}\"{}{}",
                changeset, CRLF, CRLF
            );
            let _ = write!(body, "--{}{}", changeset, CRLF);
            body.push_str(&part);
            let _ = write!(body, "--{}--{}", changeset, CRLF);
        }
    }
    let _ = write!(body, "--{}--{}", boundary, CRLF);

    Ok(TransportRequest::new(Method::POST, config.batch_url(Dialect::Rest))
        .with_header("Accept", Dialect::Rest.accept())
        .with_header("Content-Type", format!("multipart/mixed; boundary=\"{}\"", boundary))
        .with_body(body.into_bytes()))
}

fn write_http_part(out: &mut String, config: &BridgeConfig, call: &ApiCall) -> BridgeResult<()> {
    let _ = write!(out, "Content-Type: application/http{}", CRLF);
    let _ = write!(out, "Content-Transfer-Encoding: binary{}{}", CRLF, CRLF);
    let _ = write!(
        out,
        "{} {} HTTP/1.1{}",
        call.method(),
        call.absolute_url(config),
        CRLF
    );
    for (name, value) in call.headers() {
        let _ = write!(out, "{}: {}{}", name, value, CRLF);
    }
    out.push_str(CRLF);
    if let Some(json) = call.body() {
        out.push_str(&serde_json::to_string(json)?);
        out.push_str(CRLF);
    }
    out.push_str(CRLF);
    Ok(())
}

/// Split a multipart response into entries, one per embedded HTTP response.
///
/// The boundary comes from the response `Content-Type`, or from the first
/// delimiter line when that header is missing. Nested changesets are
/// flattened in order. Sub-response bodies are kept byte for byte.
pub fn decode(response: &TransportResponse) -> BridgeResult<Vec<ResponseEntry>> {
    let boundary = response
        .header("content-type")
        .and_then(boundary_param)
        .or_else(|| first_delimiter(&response.body))
        .ok_or_else(|| BridgeError::protocol("multipart response without a boundary"))?;
    let mut entries = Vec::new();
    decode_parts(&response.body, &boundary, &mut entries)?;
    Ok(entries)
}

fn decode_parts(body: &[u8], boundary: &str, entries: &mut Vec<ResponseEntry>) -> BridgeResult<()> {
    for part in split_parts(body, boundary) {
        // Parts without MIME headers start directly with the status line.
        let (mime, content) = if part.starts_with(b"HTTP/") {
            (HashMap::new(), part)
        } else {
            let (lines, rest) = split_head(part);
            (headers_of(&lines), rest)
        };
        let content_type = mime.get("content-type").map(String::as_str).unwrap_or_default();
        if content_type.to_ascii_lowercase().starts_with("multipart/") {
            let inner = boundary_param(content_type)
                .ok_or_else(|| BridgeError::protocol("changeset part without a boundary"))?;
            decode_parts(content, &inner, entries)?;
        } else if !content.iter().all(|b| b.is_ascii_whitespace()) {
            let entry = decode_http(content, entries.len())?;
            entries.push(entry);
        }
    }
    Ok(())
}

/// One embedded `HTTP/1.1 <status>` message.
fn decode_http(message: &[u8], position: usize) -> BridgeResult<ResponseEntry> {
    let (lines, body) = split_head(message);
    let status_line = lines
        .first()
        .map(|l| String::from_utf8_lossy(l).into_owned())
        .unwrap_or_default();
    let mut tokens = status_line.split_whitespace();
    let status = match (tokens.next(), tokens.next()) {
        (Some(version), Some(code)) if version.starts_with("HTTP/") => code.parse::<u16>().ok(),
        _ => None,
    }
    .ok_or_else(|| BridgeError::protocol(format!("malformed status line '{}'", status_line)))?;

    let headers = headers_of(lines.get(1..).unwrap_or_default());
    let payload = Payload::from_body(headers.get("content-type").map(String::as_str), body);
    let mut entry = ResponseEntry::new(position, status, payload);
    entry.headers = headers;
    Ok(entry)
}

/// `boundary` parameter of a multipart content type.
fn boundary_param(content_type: &str) -> Option<String> {
    content_type
        .split(';')
        .find_map(|param| {
            let (name, value) = param.split_once('=')?;
            name.trim()
                .eq_ignore_ascii_case("boundary")
                .then(|| value.trim().trim_matches('"').to_string())
        })
        .filter(|b| !b.is_empty())
}

fn first_delimiter(body: &[u8]) -> Option<String> {
    let line = body
        .split(|&b| b == b'\n')
        .map(trim_cr)
        .find(|l| !l.iter().all(|b| b.is_ascii_whitespace()))?;
    let boundary = std::str::from_utf8(line.strip_prefix(b"--")?).ok()?.trim();
    (!boundary.is_empty()).then(|| boundary.to_string())
}

/// Contents of the parts delimited by `--boundary`. The line break before
/// each delimiter belongs to the delimiter and is not part of the content.
fn split_parts<'a>(body: &'a [u8], boundary: &str) -> Vec<&'a [u8]> {
    let delimiter = format!("--{}", boundary);
    let delimiter = delimiter.as_bytes();
    let mut parts = Vec::new();
    let mut open: Option<usize> = None;
    let mut pos = 0;

    while let Some(found) = find(&body[pos..], delimiter).map(|i| i + pos) {
        let after = found + delimiter.len();
        let at_line_start = found == 0 || body[found - 1] == b'\n';
        let ends_token = body
            .get(after)
            .map_or(true, |b| matches!(b, b'-' | b'\r' | b'\n' | b' ' | b'\t'));
        if !at_line_start || !ends_token {
            pos = found + 1;
            continue;
        }

        if let Some(start) = open.take() {
            let mut end = found;
            if end > start && body[end - 1] == b'\n' {
                end -= 1;
            }
            if end > start && body[end - 1] == b'\r' {
                end -= 1;
            }
            parts.push(&body[start..end]);
        }
        if body[after..].starts_with(b"--") {
            return parts;
        }
        let next = body[after..]
            .iter()
            .position(|&b| b == b'\n')
            .map_or(body.len(), |i| after + i + 1);
        open = Some(next);
        pos = next;
    }
    // Tolerate a missing closing delimiter.
    if let Some(start) = open {
        parts.push(&body[start..]);
    }
    parts
}

/// Header lines up to the first empty line, and everything after it.
fn split_head(bytes: &[u8]) -> (Vec<&[u8]>, &[u8]) {
    let mut lines = Vec::new();
    let mut pos = 0;
    while pos < bytes.len() {
        let end = bytes[pos..]
            .iter()
            .position(|&b| b == b'\n')
            .map_or(bytes.len(), |i| pos + i);
        let line = trim_cr(&bytes[pos..end]);
        let next = (end + 1).min(bytes.len());
        if line.is_empty() {
            return (lines, &bytes[next..]);
        }
        lines.push(line);
        pos = next;
    }
    (lines, &bytes[bytes.len()..])
}

fn headers_of(lines: &[&[u8]]) -> HashMap<String, String> {
    lines
        .iter()
        .filter_map(|line| {
            let line = String::from_utf8_lossy(line);
            let (name, value) = line.split_once(':')?;
            Some((name.trim().to_lowercase(), value.trim().to_string()))
        })
        .collect()
}

fn trim_cr(line: &[u8]) -> &[u8] {
    line.strip_suffix(b"\r").unwrap_or(line)
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

// ═══════════════════════════════════════════════════════════════════════
//  Tests
// ═══════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{config, rest_batch_body};
    use serde_json::json;

    #[test]
    fn test_encode_reads_inline_writes_in_changesets() {
        let cfg = config();
        let read = ApiCall::raw(Dialect::Rest, Method::GET, "_api/web/lists");
        let write = ApiCall::raw(Dialect::Rest, Method::POST, "_api/web/lists")
            .with_header("X-HTTP-Method", "MERGE")
            .with_body(json!({"Title": "x"}));
        let req = encode(&cfg, &[&read, &write]).unwrap();

        assert_eq!(req.url, "https://contoso.sharepoint.com/sites/dev/_api/$batch");
        let ct = req.header("content-type").unwrap();
        assert!(ct.starts_with("multipart/mixed; boundary=\"batch_"));
        let body = req.body_text();
        assert!(body.contains("GET https://contoso.sharepoint.com/sites/dev/_api/web/lists HTTP/1.1\r\n"));
        assert!(body.contains("POST https://contoso.sharepoint.com/sites/dev/_api/web/lists HTTP/1.1\r\n"));
        assert_eq!(body.matches("boundary=\"changeset_").count(), 1);
        assert!(body.contains("X-HTTP-Method: MERGE\r\n"));
        assert!(body.contains("{\"Title\":\"x\"}"));
        assert!(body.trim_end().ends_with("--"));
        let get_pos = body.find("GET ").unwrap();
        let post_pos = body.find("POST ").unwrap();
        assert!(get_pos < post_pos);
    }

    #[test]
    fn test_decode_positional_entries() {
        let resp = rest_batch_body(&[
            (200, Some(json!({"d": {"Id": 1}}))),
            (204, None),
            (409, Some(json!({"error": {"code": "c", "message": {"value": "conflict"}}}))),
        ]);
        let entries = decode(&resp).unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].status, 200);
        assert_eq!(entries[0].json().unwrap()["d"]["Id"], 1);
        assert_eq!(entries[1].payload, Payload::Empty);
        assert_eq!(entries[2].status, 409);
        assert_eq!(entries[2].position, 2);
    }

    #[test]
    fn test_decode_changeset_nesting() {
        let raw = "--batchresponse_1\r\n\
Content-Type: multipart/mixed; boundary=changesetresponse_2\r\n\
\r\n\
--changesetresponse_2\r\n\
Content-Type: application/http\r\n\
Content-Transfer-Encoding: binary\r\n\
\r\n\
HTTP/1.1 204 No Content\r\n\
CONTENT-TYPE: application/json;odata=verbose;charset=utf-8\r\n\
\r\n\
\r\n\
--changesetresponse_2--\r\n\
--batchresponse_1--\r\n";
        let entries = decode(&TransportResponse::new(200, raw)).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].status, 204);
        assert_eq!(entries[0].payload, Payload::Empty);
        assert!(entries[0].header("Content-Type").is_some());
    }

    #[test]
    fn test_decode_keeps_body_bytes() {
        let binary: &[u8] = &[0xff, 0x00, b'\r', b'\n', b'-', b'-', b'x', 0x80, b' '];
        let text = "line one\r\n\r\n  indented\r\n";
        let mut raw = Vec::new();
        raw.extend_from_slice(b"--batchresponse_9\r\nContent-Type: application/http\r\n\r\n");
        raw.extend_from_slice(b"HTTP/1.1 200 OK\r\nContent-Type: application/octet-stream\r\n\r\n");
        raw.extend_from_slice(binary);
        raw.extend_from_slice(b"\r\n--batchresponse_9\r\nContent-Type: application/http\r\n\r\n");
        raw.extend_from_slice(b"HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\n\r\n");
        raw.extend_from_slice(text.as_bytes());
        raw.extend_from_slice(b"\r\n--batchresponse_9--\r\n");
        let resp = TransportResponse::new(200, raw)
            .with_header("Content-Type", "multipart/mixed; boundary=\"batchresponse_9\"");

        let entries = decode(&resp).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].payload, Payload::Binary(binary.to_vec()));
        assert_eq!(entries[1].payload, Payload::Text(text.to_string()));
    }

    #[test]
    fn test_decode_ignores_dash_lines_that_are_not_the_boundary() {
        let raw = "--batchresponse_3\r\n\
Content-Type: application/http\r\n\
\r\n\
HTTP/1.1 200 OK\r\n\
Content-Type: text/plain\r\n\
\r\n\
--batchresponse_30 is not it\r\n\
-- nor this\r\n\
--batchresponse_3--\r\n";
        let resp = TransportResponse::new(200, raw)
            .with_header("Content-Type", "multipart/mixed; boundary=batchresponse_3");
        let entries = decode(&resp).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(
            entries[0].payload,
            Payload::Text("--batchresponse_30 is not it\r\n-- nor this".to_string())
        );
    }

    #[test]
    fn test_decode_bad_status_line() {
        let raw = "--b\r\nHTTP/1.1 abc\r\n\r\n--b--\r\n";
        let err = decode(&TransportResponse::new(200, raw)).unwrap_err();
        assert_eq!(err.kind, crate::error::BridgeErrorKind::ProtocolIntegrity);
    }
}
