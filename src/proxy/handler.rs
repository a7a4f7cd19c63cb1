use std::fmt::Display;
use std::io::{BufReader, Write};
use std::net::{SocketAddr, TcpStream};
use std::time::Instant;

use anyhow::{Context, Result};
use http::StatusCode;
use tracing::debug;

use super::AppContext;
use super::cache::InsertOutcome;
use super::codec::{drain_headers, read_line_limited};
use super::forward::{ForwardSummary, forward, response_status};
use super::request::{parse_request_line, parse_target, redacted_path};
use super::respond::write_error;
use crate::logging::AccessLogBuilder;
use crate::metrics;

/// Serves a single client request end to end: parse, answer from the cache or the origin, log.
pub fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    app: &AppContext,
    worker: usize,
) -> Result<()> {
    let started = Instant::now();
    let settings = &app.settings;
    stream
        .set_read_timeout(Some(settings.client_timeout()))
        .context("failed to set client read timeout")?;
    stream
        .set_write_timeout(Some(settings.client_timeout()))
        .context("failed to set client write timeout")?;
    let mut reader = BufReader::new(stream.try_clone().context("failed to clone client stream")?);
    let mut client = stream;
    let log = AccessLogBuilder::new(peer, worker);

    let line = match read_line_limited(&mut reader, settings.max_request_line) {
        Ok(Some(line)) => line,
        Ok(None) => {
            debug!(peer = %peer, "client closed connection before sending a request");
            return Ok(());
        }
        Err(err) => {
            return reject(
                &mut client,
                log,
                started,
                StatusCode::BAD_REQUEST,
                "request line",
                "Proxy could not read the request",
                err,
            );
        }
    };

    let request = match parse_request_line(&line) {
        Ok(request) => request,
        Err(err) => {
            return reject(
                &mut client,
                log,
                started,
                StatusCode::BAD_REQUEST,
                line.trim_end(),
                "Proxy received a malformed request",
                err,
            );
        }
    };
    let log = log.method(request.method.as_str());

    if let Err(err) = drain_headers(&mut reader, settings.max_request_line) {
        return reject(
            &mut client,
            log,
            started,
            StatusCode::BAD_REQUEST,
            "request headers",
            "Proxy could not read the request",
            err,
        );
    }

    if !request.is_get() {
        return reject(
            &mut client,
            log,
            started,
            StatusCode::NOT_IMPLEMENTED,
            request.method.as_str(),
            "Proxy does not implement this method",
            format!("method {} not supported", request.method),
        );
    }

    let target = match parse_target(&request.target) {
        Ok(target) => target,
        Err(err) => {
            return reject(
                &mut client,
                log,
                started,
                StatusCode::BAD_REQUEST,
                &request.target,
                "Proxy could not parse the request target",
                err,
            );
        }
    };
    let log = log
        .host(target.host.as_str())
        .port(target.port.as_str())
        .path(redacted_path(&target.path));

    let key = target.cache_key();
    let policy = settings.policy;

    if let Some(body) = app.cache.lookup(&key, policy) {
        debug!(%key, size = body.len(), "serving response from cache");
        let written = client.write_all(&body).and_then(|_| client.flush());
        let mut log = log
            .cache_lookup("hit")
            .outcome("HIT")
            .bytes_out(body.len() as u64)
            .elapsed(started.elapsed());
        if let Some(status) = response_status(&body) {
            log = log.status(status);
        }
        if let Err(err) = &written {
            log = log.error_reason(err.to_string());
        }
        log.log();
        return written.context("failed to write cached response");
    }

    let log = log.cache_lookup("miss");
    let limits = app.forward_limits();
    match forward(&target, &mut client, &limits) {
        Ok(ForwardSummary {
            upstream_addr,
            bytes_relayed,
            status,
            cacheable,
        }) => {
            let store = match cacheable {
                Some(body) => match app.cache.insert(key, body, policy) {
                    InsertOutcome::Stored { .. } => "stored",
                    InsertOutcome::Oversized => {
                        metrics::record_cache_skip("oversized");
                        "too_large"
                    }
                },
                None if bytes_relayed > limits.max_object_size => {
                    debug!(
                        %key,
                        bytes_relayed,
                        max_object_size = limits.max_object_size,
                        "response too large to cache"
                    );
                    metrics::record_cache_skip("too_large");
                    "too_large"
                }
                None => {
                    metrics::record_cache_skip("empty");
                    "skipped"
                }
            };
            let mut log = log
                .cache_store(store)
                .outcome("MISS")
                .upstream_addr(upstream_addr.to_string())
                .bytes_out(bytes_relayed)
                .elapsed(started.elapsed());
            if let Some(status) = status {
                log = log.status(status);
            }
            log.log();
            Ok(())
        }
        Err(err) if err.is_unreachable() => {
            metrics::record_upstream_error(err.kind_label());
            debug!(origin = %target.authority(), error = %err, "origin unreachable");
            reject_with_outcome(
                &mut client,
                log,
                started,
                StatusCode::NOT_FOUND,
                "UNREACHABLE",
                &target.host,
                "Proxy couldn't find the server",
                err,
            )
        }
        Err(err) => {
            metrics::record_upstream_error(err.kind_label());
            log.outcome("ERROR")
                .cache_store("skipped")
                .elapsed(started.elapsed())
                .error_reason(err.to_string())
                .log();
            Err(err.into())
        }
    }
}

fn reject<E>(
    client: &mut TcpStream,
    log: AccessLogBuilder,
    started: Instant,
    status: StatusCode,
    cause: &str,
    detail: &str,
    reason: E,
) -> Result<()>
where
    E: Display,
{
    reject_with_outcome(client, log, started, status, "REJECTED", cause, detail, reason)
}

#[allow(clippy::too_many_arguments)]
fn reject_with_outcome<E>(
    client: &mut TcpStream,
    log: AccessLogBuilder,
    started: Instant,
    status: StatusCode,
    outcome: &str,
    cause: &str,
    detail: &str,
    reason: E,
) -> Result<()>
where
    E: Display,
{
    let written = write_error(client, status, cause, detail);
    log.status(status)
        .outcome(outcome)
        .bytes_out(*written.as_ref().unwrap_or(&0))
        .elapsed(started.elapsed())
        .error_reason(reason.to_string())
        .log();
    written
        .map(|_| ())
        .context("failed to send error response")
}
