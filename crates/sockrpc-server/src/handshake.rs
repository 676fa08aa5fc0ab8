//! Connection handshake context handed to the verify and identity hooks.

use std::collections::HashMap;
use std::net::SocketAddr;

use axum::extract::Query;
use axum::http::{HeaderMap, Uri};

/// What the peer presented when it opened the connection.
#[derive(Clone, Debug, Default)]
pub struct HandshakeRequest {
    pub uri: String,
    /// Header names are lowercased.
    pub headers: HashMap<String, String>,
    pub query: HashMap<String, String>,
    pub remote_addr: Option<SocketAddr>,
}

impl HandshakeRequest {
    /// Context for `uri`, with its query string parsed.
    pub fn new(uri: impl Into<String>) -> Self {
        let uri = uri.into();
        let query = uri
            .parse::<Uri>()
            .ok()
            .map(|u| parse_query(&u))
            .unwrap_or_default();
        Self {
            uri,
            query,
            ..Default::default()
        }
    }

    /// Build from an incoming HTTP upgrade request.
    pub fn from_http(uri: &Uri, headers: &HeaderMap, remote_addr: Option<SocketAddr>) -> Self {
        let headers = headers
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_ascii_lowercase(), v.to_owned()))
            })
            .collect();
        Self {
            uri: uri.to_string(),
            headers,
            query: parse_query(uri),
            remote_addr,
        }
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        let _ = self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    pub fn with_remote_addr(mut self, addr: SocketAddr) -> Self {
        self.remote_addr = Some(addr);
        self
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query.get(name).map(String::as_str)
    }
}

fn parse_query(uri: &Uri) -> HashMap<String, String> {
    Query::<HashMap<String, String>>::try_from_uri(uri)
        .map(|Query(q)| q)
        .unwrap_or_default()
}
