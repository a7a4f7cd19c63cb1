use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use anyhow::{Result, anyhow};
use http::StatusCode;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing_subscriber::{EnvFilter, fmt};

use crate::cli::LogFormat;

const DEFAULT_FILTER: &str = "info";

/// Installs the global subscriber. `RUST_LOG` overrides the default `info` filter.
pub fn init_logger(format: LogFormat) -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(DEFAULT_FILTER))?;
    let builder = fmt::fmt().with_env_filter(filter).with_thread_names(true);
    let installed = match format {
        LogFormat::Json => builder
            .json()
            .flatten_event(true)
            .with_current_span(false)
            .with_span_list(false)
            .try_init(),
        LogFormat::Text => builder.with_target(false).compact().try_init(),
    };
    installed.map_err(|err| anyhow!("failed to install tracing subscriber: {err}"))
}

#[derive(Debug, Clone)]
pub struct AccessLogEvent {
    pub client_ip: IpAddr,
    pub client_port: u16,
    pub worker: usize,
    pub method: String,
    pub host: String,
    pub port: String,
    pub path: String,
    pub cache_lookup: Option<String>,
    pub cache_store: Option<String>,
    pub status: u16,
    pub outcome: String,
    pub bytes_out: u64,
    pub elapsed_ms: u128,
    pub upstream_addr: Option<String>,
    pub error_reason: Option<String>,
}

#[derive(Debug)]
pub struct AccessLogBuilder {
    event: AccessLogEvent,
}

impl AccessLogBuilder {
    pub fn new(peer: SocketAddr, worker: usize) -> Self {
        Self {
            event: AccessLogEvent {
                client_ip: peer.ip(),
                client_port: peer.port(),
                worker,
                method: String::new(),
                host: String::new(),
                port: String::new(),
                path: String::new(),
                cache_lookup: None,
                cache_store: None,
                status: 0,
                outcome: String::from("UNKNOWN"),
                bytes_out: 0,
                elapsed_ms: 0,
                upstream_addr: None,
                error_reason: None,
            },
        }
    }

    pub fn method(mut self, method: impl Into<String>) -> Self {
        self.event.method = method.into();
        self
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.event.host = host.into();
        self
    }

    pub fn port(mut self, port: impl Into<String>) -> Self {
        self.event.port = port.into();
        self
    }

    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.event.path = path.into();
        self
    }

    pub fn cache_lookup(mut self, value: impl Into<String>) -> Self {
        self.event.cache_lookup = Some(value.into());
        self
    }

    pub fn cache_store(mut self, value: impl Into<String>) -> Self {
        self.event.cache_store = Some(value.into());
        self
    }

    pub fn status(mut self, status: StatusCode) -> Self {
        self.event.status = status.as_u16();
        self
    }

    pub fn outcome(mut self, outcome: impl Into<String>) -> Self {
        self.event.outcome = outcome.into();
        self
    }

    pub fn bytes_out(mut self, bytes: u64) -> Self {
        self.event.bytes_out = bytes;
        self
    }

    pub fn elapsed(mut self, elapsed: Duration) -> Self {
        self.event.elapsed_ms = elapsed.as_millis();
        self
    }

    pub fn upstream_addr(mut self, addr: impl Into<String>) -> Self {
        self.event.upstream_addr = Some(addr.into());
        self
    }

    pub fn error_reason(mut self, reason: impl Into<String>) -> Self {
        self.event.error_reason = Some(reason.into());
        self
    }

    pub fn build(self) -> AccessLogEvent {
        self.event
    }

    pub fn log(self) {
        log_access(self.build());
    }
}

pub fn log_access(event: AccessLogEvent) {
    let ts = OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_default();

    tracing::info!(
        target: "access_log",
        ts,
        client_ip = %event.client_ip,
        client_port = event.client_port,
        worker = event.worker,
        method = event.method.as_str(),
        host = event.host.as_str(),
        port = event.port.as_str(),
        path = event.path.as_str(),
        cache_lookup = event.cache_lookup.as_deref(),
        cache_store = event.cache_store.as_deref(),
        status = event.status,
        outcome = event.outcome.as_str(),
        bytes_out = event.bytes_out,
        elapsed_ms = event.elapsed_ms,
        upstream_addr = event.upstream_addr.as_deref(),
        error_reason = event.error_reason.as_deref()
    );

    crate::metrics::record_request(
        &event.outcome,
        &event.method,
        event.status,
        Duration::from_millis(u64::try_from(event.elapsed_ms).unwrap_or(u64::MAX)),
    );
}
