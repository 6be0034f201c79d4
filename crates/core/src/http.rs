//! Transport-neutral HTTP exchange types.
//!
//! These are the shapes the cache reads and writes. Live fetchers convert
//! their client's types into these so that a replayed response and a fresh
//! one are indistinguishable downstream.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};

/// Flag attached to responses served from history.
pub const HISTORIC_FLAG: &str = "historic";

/// Multi-valued header container.
///
/// Names keep the casing they were inserted with; lookups ignore case.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Headers(BTreeMap<String, Vec<String>>);

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a value, merging into an existing name regardless of case.
    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let existing = self.0.keys().find(|k| k.eq_ignore_ascii_case(&name)).cloned();
        self.0.entry(existing.unwrap_or(name)).or_default().push(value.into());
    }

    /// First value for `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.get_all(name).and_then(|values| values.first()).map(String::as_str)
    }

    /// All values for `name`.
    pub fn get_all(&self, name: &str) -> Option<&[String]> {
        self.0.iter().find(|(k, _)| k.eq_ignore_ascii_case(name)).map(|(_, v)| v.as_slice())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().flat_map(|(k, values)| values.iter().map(move |v| (k.as_str(), v.as_str())))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Headers {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut headers = Headers::new();
        for (k, v) in iter {
            headers.append(k, v);
        }
        headers
    }
}

impl<'de> Deserialize<'de> for Headers {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum OneOrMany {
            One(String),
            Many(Vec<String>),
        }

        let raw = BTreeMap::<String, OneOrMany>::deserialize(deserializer)?;
        Ok(Headers(
            raw.into_iter()
                .map(|(k, v)| match v {
                    OneOrMany::One(s) => (k, vec![s]),
                    OneOrMany::Many(values) => (k, values),
                })
                .collect(),
        ))
    }
}

/// An outgoing request as seen by the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: String,
    pub url: String,
    pub headers: Headers,
    pub body: Vec<u8>,
}

impl HttpRequest {
    pub fn new(method: impl Into<String>, url: impl Into<String>) -> Self {
        Self { method: method.into(), url: url.into(), headers: Headers::new(), body: Vec::new() }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new("GET", url)
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.append(name, value);
        self
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }
}

impl fmt::Display for HttpRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{} {}>", self.method, self.url)
    }
}

/// Shape of a response body, decided from headers and URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseKind {
    Html,
    Xml,
    Text,
    Binary,
}

impl ResponseKind {
    /// Classify a response from its `Content-Type`, falling back to the
    /// `Content-Disposition` filename and then the URL path extension.
    pub fn classify(headers: &Headers, url: &str) -> Self {
        if let Some(kind) = headers.get("content-type").and_then(|ct| Self::from_mime(&mime_essence(ct))) {
            return kind;
        }

        if let Some(kind) = headers.get("content-disposition").and_then(disposition_filename).and_then(Self::from_path)
        {
            return kind;
        }

        url::Url::parse(url)
            .ok()
            .and_then(|u| Self::from_path(u.path()))
            .unwrap_or(ResponseKind::Binary)
    }

    /// Map a MIME essence (`type/subtype`, lowercase) to a kind.
    ///
    /// Returns `None` for types that carry no useful hint.
    pub fn from_mime(mime: &str) -> Option<Self> {
        match mime {
            "" | "application/octet-stream" | "binary/octet-stream" | "application/x-download" => None,
            "text/html" | "application/xhtml+xml" => Some(ResponseKind::Html),
            "text/xml" | "application/xml" | "application/rss+xml" | "application/atom+xml" | "application/rdf+xml" => {
                Some(ResponseKind::Xml)
            }
            "application/json"
            | "application/ld+json"
            | "application/javascript"
            | "application/x-javascript"
            | "application/ecmascript"
            | "application/x-www-form-urlencoded" => Some(ResponseKind::Text),
            m if m.starts_with("text/") => Some(ResponseKind::Text),
            m if m.ends_with("+xml") => Some(ResponseKind::Xml),
            m if m.ends_with("+json") => Some(ResponseKind::Text),
            _ => Some(ResponseKind::Binary),
        }
    }

    fn from_path(path: &str) -> Option<Self> {
        let (_, ext) = path.rsplit_once('.')?;
        match ext.to_ascii_lowercase().as_str() {
            "html" | "htm" | "xhtml" | "shtml" => Some(ResponseKind::Html),
            "xml" | "rss" | "atom" => Some(ResponseKind::Xml),
            "txt" | "csv" | "tsv" | "json" | "js" | "css" | "md" => Some(ResponseKind::Text),
            _ => None,
        }
    }

    pub fn is_text(&self) -> bool {
        !matches!(self, ResponseKind::Binary)
    }
}

fn mime_essence(content_type: &str) -> String {
    content_type.split(';').next().unwrap_or("").trim().to_ascii_lowercase()
}

fn disposition_filename(value: &str) -> Option<&str> {
    value.split(';').map(str::trim).find_map(|part| {
        part.strip_prefix("filename=")
            .map(|name| name.trim_matches('"'))
    })
}

/// Charset declared in a `Content-Type` header, lowercased.
pub fn declared_charset(headers: &Headers) -> Option<String> {
    headers.get("content-type")?.split(';').skip(1).find_map(|param| {
        let (key, value) = param.split_once('=')?;
        key.trim()
            .eq_ignore_ascii_case("charset")
            .then(|| value.trim().trim_matches('"').to_ascii_lowercase())
    })
}

/// A response as seen by the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub url: String,
    pub status: u16,
    pub headers: Headers,
    pub body: Vec<u8>,
    pub kind: ResponseKind,
    pub flags: Vec<String>,
}

impl HttpResponse {
    /// Build a response, classifying it from its headers and URL.
    pub fn new(url: impl Into<String>, status: u16, headers: Headers, body: impl Into<Vec<u8>>) -> Self {
        let url = url.into();
        let kind = ResponseKind::classify(&headers, &url);
        Self { url, status, headers, body: body.into(), kind, flags: Vec::new() }
    }

    /// Whether this response was served from history.
    pub fn is_historic(&self) -> bool {
        self.flags.iter().any(|f| f == HISTORIC_FLAG)
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}
