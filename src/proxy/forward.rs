use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use bytes::Bytes;
use http::StatusCode;
use thiserror::Error;
use tracing::{debug, trace};

use super::request::Target;

const USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64; rv:10.0.3) Gecko/20120305 Firefox/10.0.3";
const RELAY_CHUNK: usize = 8192;
/// Bytes of the response head kept for reading the status code.
const STATUS_PREFIX_LIMIT: usize = 32;

#[derive(Debug, Error)]
pub enum ForwardError {
    #[error("failed to resolve {authority}")]
    Resolve {
        authority: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to connect to {authority}")]
    Connect {
        authority: String,
        #[source]
        source: io::Error,
    },
    #[error("upstream {addr} failed mid-response")]
    Upstream {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
    #[error("client went away while relaying response")]
    Client(#[source] io::Error),
}

impl ForwardError {
    /// True when the origin could not be reached at all, so nothing was relayed yet.
    pub fn is_unreachable(&self) -> bool {
        matches!(self, ForwardError::Resolve { .. } | ForwardError::Connect { .. })
    }

    pub fn kind_label(&self) -> &'static str {
        match self {
            ForwardError::Resolve { .. } => "resolve",
            ForwardError::Connect { .. } => "connect",
            ForwardError::Upstream { .. } => "upstream_io",
            ForwardError::Client(_) => "client_io",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ForwardLimits {
    pub connect_timeout: Duration,
    pub io_timeout: Duration,
    pub max_object_size: u64,
}

#[derive(Debug)]
pub struct ForwardSummary {
    pub upstream_addr: SocketAddr,
    pub bytes_relayed: u64,
    pub status: Option<StatusCode>,
    /// The complete response, present only when it fit within `max_object_size`.
    pub cacheable: Option<Bytes>,
}

/// Fetches `target` from its origin and streams the response to `client` as it arrives.
pub fn forward<W>(
    target: &Target,
    client: &mut W,
    limits: &ForwardLimits,
) -> Result<ForwardSummary, ForwardError>
where
    W: Write,
{
    let mut upstream = connect(target, limits)?;
    let upstream_addr = upstream.peer_addr().map_err(|source| ForwardError::Connect {
        authority: target.authority(),
        source,
    })?;
    let io_error = |source: io::Error| ForwardError::Upstream {
        addr: upstream_addr,
        source,
    };

    upstream
        .write_all(origin_request(target).as_bytes())
        .map_err(io_error)?;
    upstream.flush().map_err(io_error)?;

    let mut chunk = vec![0u8; RELAY_CHUNK];
    let mut buffered: Option<Vec<u8>> = Some(Vec::new());
    let mut bytes_relayed = 0u64;
    let mut status = None;
    let mut status_prefix = Vec::with_capacity(STATUS_PREFIX_LIMIT);
    loop {
        let n = match upstream.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(io_error(err)),
        };
        // The status line may arrive across several reads.
        if status.is_none() && status_prefix.len() < STATUS_PREFIX_LIMIT {
            let take = n.min(STATUS_PREFIX_LIMIT - status_prefix.len());
            status_prefix.extend_from_slice(&chunk[..take]);
            status = response_status(&status_prefix);
        }
        bytes_relayed += n as u64;
        if let Some(buf) = buffered.as_mut() {
            if bytes_relayed <= limits.max_object_size {
                buf.extend_from_slice(&chunk[..n]);
            } else {
                trace!(origin = %target.authority(), bytes_relayed, "response exceeds cacheable size");
                buffered = None;
            }
        }
        client.write_all(&chunk[..n]).map_err(ForwardError::Client)?;
    }
    client.flush().map_err(ForwardError::Client)?;

    debug!(upstream = %upstream_addr, bytes_relayed, "origin response relayed");
    Ok(ForwardSummary {
        upstream_addr,
        bytes_relayed,
        status,
        cacheable: buffered.filter(|buf| !buf.is_empty()).map(Bytes::from),
    })
}

fn connect(target: &Target, limits: &ForwardLimits) -> Result<TcpStream, ForwardError> {
    let authority = target.authority();
    let addrs = authority
        .to_socket_addrs()
        .map_err(|source| ForwardError::Resolve {
            authority: authority.clone(),
            source,
        })?;

    let mut last_err = None;
    for addr in addrs {
        match TcpStream::connect_timeout(&addr, limits.connect_timeout) {
            Ok(stream) => {
                let configured = stream
                    .set_read_timeout(Some(limits.io_timeout))
                    .and_then(|_| stream.set_write_timeout(Some(limits.io_timeout)));
                if let Err(source) = configured {
                    return Err(ForwardError::Connect { authority, source });
                }
                return Ok(stream);
            }
            Err(err) => {
                trace!(%addr, error = %err, "upstream connect attempt failed");
                last_err = Some(err);
            }
        }
    }

    Err(ForwardError::Connect {
        authority,
        source: last_err
            .unwrap_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no addresses resolved")),
    })
}

/// Status code from the start of a raw HTTP response, if one is present.
pub fn response_status(head: &[u8]) -> Option<StatusCode> {
    let code = head.strip_prefix(b"HTTP/")?.split(|b| *b == b' ').nth(1)?;
    StatusCode::from_bytes(code.get(..3)?).ok()
}

/// HTTP/1.0 request sent to the origin; `Connection: close` lets EOF delimit the response.
pub fn origin_request(target: &Target) -> String {
    format!(
        "GET {path} HTTP/1.0\r\n\
         Host: {host}\r\n\
         User-Agent: {USER_AGENT}\r\n\
         Connection: close\r\n\
         Proxy-Connection: close\r\n\r\n",
        path = target.path,
        host = target.host,
    )
}
