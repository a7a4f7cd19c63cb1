use std::fmt;

/// Identifies a cached response by origin and path.
///
/// Matching is exact and case-sensitive; nothing is normalized, so `Example.com` and
/// `example.com` are distinct entries.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    host: String,
    port: String,
    path: String,
}

impl CacheKey {
    pub fn new(host: impl Into<String>, port: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: port.into(),
            path: path.into(),
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> &str {
        &self.port
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}{}", self.host, self.port, self.path)
    }
}
