#![allow(dead_code)]

pub mod logging;
pub mod upstream;

use std::io::{Read, Write};
use std::net::{Ipv4Addr, SocketAddr, TcpStream};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use anyhow::{Context, Result};

use proxycache::{
    cli::LogFormat,
    proxy::{
        self, AppContext, ProxyHandle,
        cache::{CacheStore, EvictionPolicy},
    },
    settings::Settings,
};

pub use logging::LogCapture;
pub use upstream::TestUpstream;

pub fn default_test_settings() -> Settings {
    Settings {
        listen: SocketAddr::from((Ipv4Addr::LOCALHOST, 0)),
        log: LogFormat::Text,
        policy: EvictionPolicy::Lru,
        worker_count: 2,
        queue_capacity: 4,
        max_object_size: 1024,
        cache_base_capacity: 4096,
        max_request_line: 1024,
        client_timeout: 5,
        upstream_connect_timeout: 2,
        upstream_timeout: 5,
        metrics_listen: None,
    }
}

pub struct TestProxy {
    handle: ProxyHandle,
    cache: Arc<CacheStore>,
}

impl TestProxy {
    pub fn start(settings: Settings) -> Result<Self> {
        let app = AppContext::new(Arc::new(settings))?;
        let cache = app.cache.clone();
        let handle = proxy::spawn(app)?;
        Ok(Self { handle, cache })
    }

    pub fn addr(&self) -> SocketAddr {
        self.handle.local_addr()
    }

    pub fn handle(&self) -> &ProxyHandle {
        &self.handle
    }

    /// The proxy's cache, still reachable after shutdown.
    pub fn cache(&self) -> Arc<CacheStore> {
        self.cache.clone()
    }

    pub fn shutdown(self) {
        self.handle.shutdown();
    }

    /// Sends a raw request through the proxy and returns the whole response.
    pub fn send(&self, request: &str) -> Result<String> {
        send_raw(self.addr(), request)
    }

    pub fn get(&self, url: &str) -> Result<String> {
        self.send(&format!(
            "GET {url} HTTP/1.0\r\nUser-Agent: proxycache-tests\r\n\r\n"
        ))
    }
}

pub fn send_raw(addr: SocketAddr, request: &str) -> Result<String> {
    let mut stream = TcpStream::connect(addr).context("failed to connect to proxy")?;
    stream.set_read_timeout(Some(StdDuration::from_secs(10)))?;
    stream.write_all(request.as_bytes())?;
    let mut response = Vec::new();
    stream
        .read_to_end(&mut response)
        .context("failed to read proxy response")?;
    Ok(String::from_utf8_lossy(&response).into_owned())
}

pub fn status_line(response: &str) -> &str {
    response.split("\r\n").next().unwrap_or_default()
}
