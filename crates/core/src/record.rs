//! Durable envelope for a captured exchange.
//!
//! A [`CacheRecord`] is the JSON document stored as one version of a key.
//! Textual bodies are kept readable; everything else is base64 so that the
//! document stays valid JSON. `binary` always travels with the body.

use std::collections::BTreeMap;

use base64::{Engine, engine::general_purpose::STANDARD};
use serde::{Deserialize, Serialize};

use crate::Error;
use crate::http::{Headers, HttpRequest, HttpResponse, declared_charset};

/// Maximum length of a store-level metadata value.
pub const MAX_METADATA_LEN: usize = 400;

/// Maximum length of a URL embedded in an object path.
pub const MAX_PATH_URL_LEN: usize = 900;

/// Longest object key the S3 API accepts, in bytes.
pub const MAX_OBJECT_KEY_LEN: usize = 1024;

/// Marker appended to truncated values.
pub const TRUNCATION_MARKER: &str = "...";

/// Request/response summary stored with every record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordMetadata {
    pub url: String,
    pub method: String,
    pub status: u16,
    pub response_url: String,
}

/// One persisted version of a cache key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheRecord {
    #[serde(rename = "binary", default)]
    pub is_binary: bool,
    pub metadata: RecordMetadata,
    #[serde(default)]
    pub request_headers: Headers,
    #[serde(default)]
    pub request_body: String,
    #[serde(default)]
    pub response_headers: Headers,
    pub response_body: String,
}

/// Text encodings the codec can round-trip without loss.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Charset {
    Utf8,
    Ascii,
    Latin1,
}

impl Charset {
    /// Resolve a charset label. `None` means the label is not supported.
    fn from_label(label: Option<&str>) -> Option<Self> {
        match label {
            None | Some("utf-8" | "utf8") => Some(Charset::Utf8),
            Some("us-ascii" | "ascii") => Some(Charset::Ascii),
            Some("iso-8859-1" | "iso8859-1" | "latin1" | "latin-1" | "l1" | "windows-1252" | "cp1252") => {
                Some(Charset::Latin1)
            }
            Some(_) => None,
        }
    }

    fn decode(self, bytes: &[u8]) -> Result<String, String> {
        match self {
            Charset::Utf8 => String::from_utf8(bytes.to_vec()).map_err(|e| format!("invalid utf-8: {e}")),
            Charset::Ascii => match bytes.iter().position(|b| !b.is_ascii()) {
                Some(pos) => Err(format!("non-ascii byte at offset {pos}")),
                None => Ok(bytes.iter().map(|&b| char::from(b)).collect()),
            },
            Charset::Latin1 => Ok(bytes.iter().map(|&b| char::from(b)).collect()),
        }
    }

    fn encode(self, text: &str) -> Result<Vec<u8>, String> {
        match self {
            Charset::Utf8 => Ok(text.as_bytes().to_vec()),
            Charset::Ascii | Charset::Latin1 => {
                let limit = if self == Charset::Ascii { 0x7F } else { 0xFF };
                text.chars()
                    .map(|c| {
                        u8::try_from(u32::from(c))
                            .ok()
                            .filter(|&b| u32::from(b) <= limit)
                            .ok_or_else(|| format!("character {c:?} not representable"))
                    })
                    .collect()
            }
        }
    }
}

impl CacheRecord {
    /// Build a record from a request and the response it produced.
    ///
    /// # Errors
    ///
    /// Returns `Error::Encode` if a textual body does not decode with its
    /// declared charset.
    pub fn encode(request: &HttpRequest, response: &HttpResponse) -> Result<Self, Error> {
        let (is_binary, response_body) = encode_body(response)?;

        Ok(Self {
            is_binary,
            metadata: RecordMetadata {
                url: request.url.clone(),
                method: request.method.clone(),
                status: response.status,
                response_url: response.url.clone(),
            },
            request_headers: request.headers.clone(),
            request_body: String::from_utf8_lossy(&request.body).into_owned(),
            response_headers: response.headers.clone(),
            response_body,
        })
    }

    /// Rebuild the response this record captured.
    ///
    /// # Errors
    ///
    /// Returns `Error::Decode` if the body cannot be restored.
    pub fn decode(&self) -> Result<HttpResponse, Error> {
        let body = if self.is_binary {
            STANDARD
                .decode(self.response_body.as_bytes())
                .map_err(|e| Error::Decode(format!("invalid base64 body: {e}")))?
        } else {
            let label = declared_charset(&self.response_headers);
            let charset = Charset::from_label(label.as_deref()).unwrap_or(Charset::Utf8);
            charset.encode(&self.response_body).map_err(Error::Decode)?
        };

        Ok(HttpResponse::new(
            self.metadata.response_url.clone(),
            self.metadata.status,
            self.response_headers.clone(),
            body,
        ))
    }

    /// Parse a stored document.
    ///
    /// # Errors
    ///
    /// Returns `Error::Decode` if the bytes are not a valid record.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, Error> {
        serde_json::from_slice(bytes).map_err(|e| Error::Decode(e.to_string()))
    }

    /// Serialize for storage.
    ///
    /// # Errors
    ///
    /// Returns `Error::Encode` if serialization fails.
    pub fn to_vec(&self) -> Result<Vec<u8>, Error> {
        serde_json::to_vec(self).map_err(|e| Error::Encode(e.to_string()))
    }

    /// Metadata attached to the stored object itself, truncated to the
    /// store's value limit.
    pub fn object_metadata(&self) -> BTreeMap<String, String> {
        let fields = [
            ("url", self.metadata.url.clone()),
            ("method", self.metadata.method.clone()),
            ("status", self.metadata.status.to_string()),
            ("response_url", self.metadata.response_url.clone()),
        ];
        truncate_metadata_fields(fields, MAX_METADATA_LEN)
    }
}

fn encode_body(response: &HttpResponse) -> Result<(bool, String), Error> {
    if response.kind.is_text() {
        let label = declared_charset(&response.headers);
        if let Some(charset) = Charset::from_label(label.as_deref()) {
            let text = charset
                .decode(&response.body)
                .map_err(|e| Error::Encode(format!("{} as {}: {e}", response.url, label.as_deref().unwrap_or("utf-8"))))?;
            tracing::debug!(url = %response.url, charset = ?charset, "stored textual body");
            return Ok((false, text));
        }
        tracing::debug!(url = %response.url, charset = ?label, "unsupported charset, storing body as binary");
    }

    tracing::debug!(url = %response.url, "encoded binary body to base64");
    Ok((true, STANDARD.encode(&response.body)))
}

/// Truncate `value` to `max_len` characters, appending the marker when cut.
pub fn truncate(value: &str, max_len: usize) -> String {
    match value.char_indices().nth(max_len) {
        Some((cut, _)) => format!("{}{TRUNCATION_MARKER}", &value[..cut]),
        None => value.to_string(),
    }
}

/// Cut a percent-encoded `value` to at most `max_bytes`, never inside an
/// `%XX` escape. The marker counts towards the limit.
pub fn truncate_encoded(value: &str, max_bytes: usize) -> String {
    if value.len() <= max_bytes {
        return value.to_string();
    }
    let mut cut = max_bytes.saturating_sub(TRUNCATION_MARKER.len()).min(value.len());
    let bytes = value.as_bytes();
    if let Some(escape) = (cut.saturating_sub(2)..cut).find(|&i| bytes[i] == b'%') {
        cut = escape;
    }
    while !value.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}{TRUNCATION_MARKER}", &value[..cut])
}

/// Truncate every metadata value to `max_len` characters.
pub fn truncate_metadata_fields<I, K>(fields: I, max_len: usize) -> BTreeMap<String, String>
where
    I: IntoIterator<Item = (K, String)>,
    K: Into<String>,
{
    fields.into_iter().map(|(k, v)| (k.into(), truncate(&v, max_len))).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> HttpRequest {
        HttpRequest::get("https://example.com/page?id=1").with_header("Accept", "text/html")
    }

    fn response(content_type: &str, body: &[u8]) -> HttpResponse {
        let headers: Headers = [("Content-Type", content_type), ("X-Trace", "abc")].into_iter().collect();
        HttpResponse::new("https://example.com/page?id=1", 200, headers, body.to_vec())
    }

    fn round_trip(resp: &HttpResponse) -> HttpResponse {
        let record = CacheRecord::encode(&request(), resp).unwrap();
        let stored = record.to_vec().unwrap();
        CacheRecord::from_slice(&stored).unwrap().decode().unwrap()
    }

    #[test]
    fn test_text_round_trip() {
        let original = response("text/html; charset=utf-8", "<p>héllo</p>".as_bytes());
        let record = CacheRecord::encode(&request(), &original).unwrap();
        assert!(!record.is_binary);
        assert_eq!(record.response_body, "<p>héllo</p>");
        assert_eq!(round_trip(&original), original);
    }

    #[test]
    fn test_latin1_round_trip_is_byte_identical() {
        let original = response("text/html; charset=ISO-8859-1", &[0x63, 0x61, 0x66, 0xE9]);
        let record = CacheRecord::encode(&request(), &original).unwrap();
        assert_eq!(record.response_body, "café");
        assert_eq!(round_trip(&original).body, vec![0x63, 0x61, 0x66, 0xE9]);
    }

    #[test]
    fn test_windows_1252_kept_as_text() {
        let original = response("text/html; charset=windows-1252", &[0x93, 0x68, 0x69, 0x94, 0xE9]);
        let record = CacheRecord::encode(&request(), &original).unwrap();
        assert!(!record.is_binary);
        assert_eq!(round_trip(&original).body, vec![0x93, 0x68, 0x69, 0x94, 0xE9]);
    }

    #[test]
    fn test_binary_round_trip() {
        let original = response("application/pdf", &[0x25, 0x50, 0x44, 0x46, 0x00, 0xFF, 0xFE]);
        let record = CacheRecord::encode(&request(), &original).unwrap();
        assert!(record.is_binary);
        assert_eq!(record.response_body, STANDARD.encode([0x25, 0x50, 0x44, 0x46, 0x00, 0xFF, 0xFE]));
        assert_eq!(round_trip(&original), original);
    }

    #[test]
    fn test_unsupported_charset_stored_as_binary() {
        let original = response("text/html; charset=shift_jis", &[0x82, 0xA0]);
        let record = CacheRecord::encode(&request(), &original).unwrap();
        assert!(record.is_binary);
        let restored = round_trip(&original);
        assert_eq!(restored.body, original.body);
        assert_eq!(restored.kind, original.kind);
    }

    #[test]
    fn test_undecodable_text_is_error() {
        let original = response("text/html; charset=utf-8", &[0xFF, 0xFE, 0x00]);
        let result = CacheRecord::encode(&request(), &original);
        assert!(matches!(result, Err(Error::Encode(_))));
    }

    #[test]
    fn test_decode_restores_kind_from_headers() {
        let original = response("application/xml", b"<rss/>");
        let restored = round_trip(&original);
        assert_eq!(restored.kind, crate::http::ResponseKind::Xml);
        assert_eq!(restored.url, original.url);
        assert_eq!(restored.status, 200);
    }

    #[test]
    fn test_persisted_layout() {
        let record = CacheRecord::encode(&request(), &response("text/plain", b"hi")).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&record.to_vec().unwrap()).unwrap();
        assert_eq!(value["binary"], false);
        assert_eq!(value["metadata"]["method"], "GET");
        assert_eq!(value["metadata"]["status"], 200);
        assert_eq!(value["metadata"]["response_url"], "https://example.com/page?id=1");
        assert_eq!(value["request_headers"]["Accept"][0], "text/html");
        assert_eq!(value["request_body"], "");
        assert_eq!(value["response_body"], "hi");
    }

    #[test]
    fn test_malformed_record_is_decode_error() {
        assert!(matches!(CacheRecord::from_slice(b"{\"binary\": true}"), Err(Error::Decode(_))));
        assert!(matches!(CacheRecord::from_slice(b"not json"), Err(Error::Decode(_))));
    }

    #[test]
    fn test_bad_base64_is_decode_error() {
        let mut record = CacheRecord::encode(&request(), &response("image/png", &[1, 2, 3])).unwrap();
        record.response_body = "***".into();
        assert!(matches!(record.decode(), Err(Error::Decode(_))));
    }

    #[test]
    fn test_truncate_long_value() {
        let long = "x".repeat(450);
        let cut = truncate(&long, MAX_METADATA_LEN);
        assert_eq!(cut.len(), 403);
        assert!(cut.ends_with(TRUNCATION_MARKER));
    }

    #[test]
    fn test_truncate_boundary_untouched() {
        let exact = "y".repeat(MAX_METADATA_LEN);
        assert_eq!(truncate(&exact, MAX_METADATA_LEN), exact);
        assert_eq!(truncate("short", MAX_METADATA_LEN), "short");
    }

    #[test]
    fn test_truncate_counts_characters() {
        let accented = "é".repeat(401);
        let cut = truncate(&accented, MAX_METADATA_LEN);
        assert_eq!(cut.chars().count(), 403);
    }

    #[test]
    fn test_truncate_encoded_never_splits_escape() {
        assert_eq!(truncate_encoded("%2F%2F%2F", 8), "%2F...");
        assert_eq!(truncate_encoded("%2F%2F%2F", 9), "%2F%2F%2F");
        assert_eq!(truncate_encoded("abcdef", 5), "ab...");
    }

    #[test]
    fn test_object_metadata_truncates_long_url() {
        let long_url = format!("https://example.com/{}", "a".repeat(500));
        let req = HttpRequest::get(long_url.clone());
        let resp = HttpResponse::new(long_url, 200, Headers::new(), b"x".to_vec());
        let record = CacheRecord::encode(&req, &resp).unwrap();

        let meta = record.object_metadata();
        assert_eq!(meta["url"].chars().count(), MAX_METADATA_LEN + TRUNCATION_MARKER.len());
        assert_eq!(meta["method"], "GET");
        assert_eq!(meta["status"], "200");
        // The body payload keeps the full URL.
        assert_eq!(record.metadata.url.len(), 520);
    }
}
