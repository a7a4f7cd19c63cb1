use std::io::{BufReader, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use once_cell::sync::Lazy;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use tracing::{debug, info};

use crate::proxy::codec::read_line_limited;

static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

static REQUESTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let opts = Opts::new("requests_total", "Total requests by outcome");
    let vec = IntCounterVec::new(opts, &["outcome"]).expect("create counter vec");
    REGISTRY
        .register(Box::new(vec.clone()))
        .expect("register requests_total");
    vec
});

static REQUEST_STATUS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let opts = Opts::new("requests_status_total", "Requests by status class");
    let vec = IntCounterVec::new(opts, &["status_class"]).expect("create counter vec");
    REGISTRY
        .register(Box::new(vec.clone()))
        .expect("register requests_status_total");
    vec
});

static REQUEST_METHOD_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let opts = Opts::new("requests_method_total", "Requests by method");
    let vec = IntCounterVec::new(opts, &["method"]).expect("create counter vec");
    REGISTRY
        .register(Box::new(vec.clone()))
        .expect("register requests_method_total");
    vec
});

static REQUEST_LATENCY_SECONDS: Lazy<HistogramVec> = Lazy::new(|| {
    let opts = HistogramOpts::new("request_duration_seconds", "Request latency by outcome")
        .buckets(latency_buckets());
    let vec = HistogramVec::new(opts, &["outcome"]).expect("create histogram vec");
    REGISTRY
        .register(Box::new(vec.clone()))
        .expect("register request_duration_seconds");
    vec
});

static CACHE_LOOKUP_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let opts = Opts::new("cache_lookup_total", "Cache lookups by result");
    let vec = IntCounterVec::new(opts, &["result"]).expect("create counter vec");
    REGISTRY
        .register(Box::new(vec.clone()))
        .expect("register cache_lookup_total");
    vec
});

static CACHE_STORE_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    let counter =
        IntCounter::new("cache_store_total", "Responses stored").expect("create cache_store_total");
    REGISTRY
        .register(Box::new(counter.clone()))
        .expect("register cache_store_total");
    counter
});

static CACHE_SKIPPED_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let opts = Opts::new("cache_skipped_total", "Responses not stored, by reason");
    let vec = IntCounterVec::new(opts, &["reason"]).expect("create counter vec");
    REGISTRY
        .register(Box::new(vec.clone()))
        .expect("register cache_skipped_total");
    vec
});

static CACHE_EVICTIONS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    let counter =
        IntCounter::new("cache_evictions_total", "Cache evictions").expect("create counter");
    REGISTRY
        .register(Box::new(counter.clone()))
        .expect("register cache_evictions_total");
    counter
});

static CACHE_ENTRIES: Lazy<IntGauge> = Lazy::new(|| {
    let gauge = IntGauge::new("cache_entries", "Entries currently cached").expect("create gauge");
    REGISTRY
        .register(Box::new(gauge.clone()))
        .expect("register cache_entries");
    gauge
});

static CACHE_BYTES: Lazy<IntGauge> = Lazy::new(|| {
    let gauge = IntGauge::new("cache_bytes", "Payload bytes currently cached").expect("create gauge");
    REGISTRY
        .register(Box::new(gauge.clone()))
        .expect("register cache_bytes");
    gauge
});

static QUEUE_DEPTH: Lazy<IntGauge> = Lazy::new(|| {
    let gauge = IntGauge::new("queue_depth", "Accepted connections waiting for a worker")
        .expect("create gauge");
    REGISTRY
        .register(Box::new(gauge.clone()))
        .expect("register queue_depth");
    gauge
});

static UPSTREAM_ERRORS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let vec = IntCounterVec::new(
        Opts::new("upstream_errors_total", "Upstream errors by kind"),
        &["kind"],
    )
    .expect("create upstream_errors_total");
    REGISTRY
        .register(Box::new(vec.clone()))
        .expect("register upstream_errors_total");
    vec
});

static WORKER_PANICS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    let counter = IntCounter::new("worker_panics_total", "Connections aborted by a panic")
        .expect("create counter");
    REGISTRY
        .register(Box::new(counter.clone()))
        .expect("register worker_panics_total");
    counter
});

fn latency_buckets() -> Vec<f64> {
    // Focused buckets for proxy latency in seconds.
    vec![
        0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
    ]
}

const METRICS_MAX_REQUEST_BYTES: usize = 8192;
const METRICS_READ_TIMEOUT: Duration = Duration::from_secs(5);
const METRICS_PATH: &str = "/metrics";

fn status_class(status: u16) -> &'static str {
    match status {
        200..=299 => "2xx",
        300..=399 => "3xx",
        400..=499 => "4xx",
        500..=599 => "5xx",
        _ => "other",
    }
}

fn normalize_label(value: &str, empty: &'static str) -> String {
    if value.is_empty() {
        empty.to_string()
    } else {
        value.to_string()
    }
}

pub fn record_request(outcome: &str, method: &str, status: u16, elapsed: Duration) {
    let outcome = normalize_label(outcome, "unknown");
    let method = normalize_label(method, "none");

    REQUESTS_TOTAL.with_label_values(&[outcome.as_str()]).inc();
    REQUEST_STATUS_TOTAL
        .with_label_values(&[status_class(status)])
        .inc();
    REQUEST_METHOD_TOTAL
        .with_label_values(&[method.as_str()])
        .inc();
    REQUEST_LATENCY_SECONDS
        .with_label_values(&[outcome.as_str()])
        .observe(elapsed.as_secs_f64());
}

pub fn record_cache_lookup(hit: bool) {
    let label = if hit { "hit" } else { "miss" };
    CACHE_LOOKUP_TOTAL.with_label_values(&[label]).inc();
}

pub fn record_cache_store(evicted: usize, entries: usize, bytes: u64) {
    CACHE_STORE_TOTAL.inc();
    if evicted > 0 {
        CACHE_EVICTIONS_TOTAL.inc_by(evicted as u64);
    }
    record_cache_size(entries, bytes);
}

pub fn record_cache_skip(reason: &str) {
    CACHE_SKIPPED_TOTAL.with_label_values(&[reason]).inc();
}

pub fn record_cache_size(entries: usize, bytes: u64) {
    CACHE_ENTRIES.set(entries as i64);
    CACHE_BYTES.set(i64::try_from(bytes).unwrap_or(i64::MAX));
}

pub fn set_queue_depth(depth: usize) {
    QUEUE_DEPTH.set(depth as i64);
}

pub fn record_upstream_error(kind: &str) {
    UPSTREAM_ERRORS_TOTAL.with_label_values(&[kind]).inc();
}

pub fn record_worker_panic() {
    WORKER_PANICS_TOTAL.inc();
}

pub fn gather() -> Vec<u8> {
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    let encoder = TextEncoder::new();
    if let Err(err) = encoder.encode(&metric_families, &mut buffer) {
        debug!(error = %err, "failed to encode metrics");
    }
    buffer
}

/// Serves the registry in text format on `addr` from a dedicated thread.
pub fn spawn_server(addr: SocketAddr) -> Result<(SocketAddr, JoinHandle<()>)> {
    let listener = TcpListener::bind(addr)
        .with_context(|| format!("failed to bind metrics listener on {addr}"))?;
    let local_addr = listener.local_addr()?;
    let handle = thread::Builder::new()
        .name("metrics".into())
        .spawn(move || serve(listener))
        .context("failed to spawn metrics thread")?;
    info!(address = %local_addr, "metrics endpoint started");
    Ok((local_addr, handle))
}

fn serve(listener: TcpListener) {
    for stream in listener.incoming() {
        let stream = match stream {
            Ok(stream) => stream,
            Err(err) => {
                debug!(error = %err, "failed to accept metrics connection");
                continue;
            }
        };
        if let Err(err) = handle_stream(stream, METRICS_MAX_REQUEST_BYTES) {
            debug!(error = %err, "metrics handler error");
        }
    }
}

fn handle_stream(stream: TcpStream, max_bytes: usize) -> Result<()> {
    stream.set_read_timeout(Some(METRICS_READ_TIMEOUT))?;
    stream.set_write_timeout(Some(METRICS_READ_TIMEOUT))?;
    let mut reader = BufReader::new(stream.try_clone()?);

    let mut remaining = max_bytes;
    let Some(request_line) = next_line(&mut reader, &mut remaining)? else {
        return Ok(());
    };
    let mut parts = request_line.split_whitespace();
    let method = parts.next().unwrap_or_default();
    let uri = parts.next().unwrap_or_default();

    // Consume and ignore headers until empty line.
    while let Some(line) = next_line(&mut reader, &mut remaining)? {
        if line == "\r\n" || line == "\n" {
            break;
        }
    }

    let response = if method == "GET" && uri == METRICS_PATH {
        build_response(200, TextEncoder::new().format_type(), gather())
    } else {
        build_response(404, "text/plain", b"not found".to_vec())
    };
    let mut stream = stream;
    stream.write_all(&response)?;
    stream.flush()?;
    Ok(())
}

fn next_line(reader: &mut BufReader<TcpStream>, remaining: &mut usize) -> Result<Option<String>> {
    if *remaining == 0 {
        return Err(anyhow!("metrics request exceeded allowed size"));
    }
    let line = read_line_limited(reader, *remaining)
        .map_err(|err| anyhow!("metrics request exceeded allowed size or was invalid: {err}"))?;
    if let Some(line) = &line {
        *remaining -= line.len();
    }
    Ok(line)
}

fn build_response(status: u16, content_type: &str, body: Vec<u8>) -> Vec<u8> {
    let header = format!(
        "HTTP/1.1 {status}\r\nContent-Length: {}\r\nContent-Type: {content_type}\r\nConnection: close\r\n\r\n",
        body.len()
    );
    let mut response = header.into_bytes();
    response.extend_from_slice(&body);
    response
}
