use http::Method;
use thiserror::Error;

use crate::proxy::cache::CacheKey;

pub const DEFAULT_PORT: &str = "80";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RequestError {
    #[error("empty request line")]
    Empty,
    #[error("malformed request line '{0}'")]
    MalformedLine(String),
    #[error("invalid method '{0}'")]
    InvalidMethod(String),
    #[error("request target '{0}' has no host")]
    MissingHost(String),
    #[error("request target '{0}' has an invalid port")]
    InvalidPort(String),
}

/// The three parts of an HTTP/1.x request line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestLine {
    pub method: Method,
    pub target: String,
    pub version: String,
}

impl RequestLine {
    pub fn is_get(&self) -> bool {
        self.method == Method::GET
    }
}

/// Origin coordinates extracted from a proxy request target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub host: String,
    pub port: String,
    pub path: String,
}

impl Target {
    pub fn cache_key(&self) -> CacheKey {
        CacheKey::new(self.host.as_str(), self.port.as_str(), self.path.as_str())
    }

    pub fn authority(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Splits `METHOD TARGET VERSION`. The method is upper-cased so `get` and `GET` compare equal.
pub fn parse_request_line(line: &str) -> Result<RequestLine, RequestError> {
    let trimmed = line.trim_end_matches(['\r', '\n']);
    if trimmed.trim().is_empty() {
        return Err(RequestError::Empty);
    }
    let mut parts = trimmed.split_whitespace();
    let (Some(method), Some(target), Some(version), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(RequestError::MalformedLine(trimmed.to_string()));
    };
    let method = Method::from_bytes(method.to_ascii_uppercase().as_bytes())
        .map_err(|_| RequestError::InvalidMethod(method.to_string()))?;
    Ok(RequestLine {
        method,
        target: target.to_string(),
        version: version.to_string(),
    })
}

/// Splits an absolute-form target such as `http://host:8080/path` into host, port and path.
///
/// The scheme prefix is optional. A colon only introduces a port when it comes before the first
/// `/`. Missing port defaults to 80 and missing path to `/`. Host and path are kept verbatim.
pub fn parse_target(target: &str) -> Result<Target, RequestError> {
    let rest = match target.find("//") {
        Some(idx) => &target[idx + 2..],
        None => target,
    };
    let (authority, path) = match rest.find('/') {
        Some(idx) => (&rest[..idx], &rest[idx..]),
        None => (rest, "/"),
    };
    let (host, port) = match authority.split_once(':') {
        Some((host, port)) => (host, port),
        None => (authority, DEFAULT_PORT),
    };
    if host.is_empty() {
        return Err(RequestError::MissingHost(target.to_string()));
    }
    if port.is_empty() || port.parse::<u16>().is_err() {
        return Err(RequestError::InvalidPort(target.to_string()));
    }
    Ok(Target {
        host: host.to_string(),
        port: port.to_string(),
        path: path.to_string(),
    })
}

/// Return a path with query parameters removed for logging purposes.
pub fn redacted_path(path: &str) -> String {
    path.split('?').next().unwrap_or("/").to_string()
}
