use bytes::Bytes;
use http::header::{HeaderMap, HOST, TRANSFER_ENCODING};
use http::request::Parts;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::SocketAddr;

/// Header name to its values, in the order they appeared on the wire.
pub type HeaderMultimap = BTreeMap<String, Vec<String>>;

/// Snapshot of an inbound HTTP request, detached from its connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginQuery {
    pub method: String,
    pub url: RequestUrl,
    pub proto: String,
    pub host: String,
    #[serde(default)]
    pub header: HeaderMultimap,
    #[serde(default, with = "super::base64_bytes")]
    pub body: Bytes,
    #[serde(default)]
    pub remote_addr: String,
    #[serde(default)]
    pub transfer_encoding: Vec<String>,
    pub request_uri: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestUrl {
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_query: Option<String>,
}

impl PluginQuery {
    /// Build a query from the request head and an already buffered body.
    pub fn from_parts(parts: &Parts, body: Bytes, remote_addr: Option<SocketAddr>) -> Self {
        let host = parts
            .headers
            .get(HOST)
            .and_then(|h| h.to_str().ok())
            .map(str::to_string)
            .or_else(|| parts.uri.authority().map(|a| a.to_string()))
            .unwrap_or_default();

        let transfer_encoding = parts
            .headers
            .get_all(TRANSFER_ENCODING)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(','))
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .collect();

        let request_uri = parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str().to_string())
            .unwrap_or_else(|| parts.uri.to_string());

        Self {
            method: parts.method.as_str().to_string(),
            url: RequestUrl {
                path: parts.uri.path().to_string(),
                raw_query: parts.uri.query().map(str::to_string),
            },
            proto: format!("{:?}", parts.version),
            host,
            header: header_multimap(&parts.headers),
            body,
            remote_addr: remote_addr.map(|a| a.to_string()).unwrap_or_default(),
            transfer_encoding,
            request_uri,
        }
    }

    /// First value of a header, matched case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.header
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .and_then(|(_, values)| values.first())
            .map(String::as_str)
    }
}

/// Flatten an `http::HeaderMap`, keeping value order within each name.
///
/// Values are carried as text. UTF-8 values pass through unchanged. Any other
/// value (obs-text) is read as ISO-8859-1, one char per byte, so no byte is
/// ever replaced. A plugin cannot tell such a value from a UTF-8 one that
/// spells the same chars.
pub fn header_multimap(headers: &HeaderMap) -> HeaderMultimap {
    let mut map = HeaderMultimap::new();
    for name in headers.keys() {
        let values = headers
            .get_all(name)
            .iter()
            .map(|v| header_text(v.as_bytes()))
            .collect();
        map.insert(name.as_str().to_string(), values);
    }
    map
}

fn header_text(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(text) => text.to_string(),
        Err(_) => bytes.iter().map(|&b| char::from(b)).collect(),
    }
}
