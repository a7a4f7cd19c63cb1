use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};
use tracing::{debug, error, info};

use super::AppContext;
use super::queue::QueueClosed;

/// An accepted client waiting for a worker.
#[derive(Debug)]
pub struct Connection {
    pub stream: TcpStream,
    pub peer: SocketAddr,
}

pub struct ProxyServer {
    listener: TcpListener,
    local_addr: SocketAddr,
    app: AppContext,
    shutdown: Arc<AtomicBool>,
}

impl ProxyServer {
    pub fn bind(app: AppContext, shutdown: Arc<AtomicBool>) -> Result<Self> {
        let bind_addr = app.settings.listen;
        let listener = TcpListener::bind(bind_addr)
            .with_context(|| format!("failed to bind listener on {}", bind_addr))?;
        let local_addr = listener.local_addr().unwrap_or(bind_addr);
        info!(address = %local_addr, "proxy listener started");
        Ok(Self {
            listener,
            local_addr,
            app,
            shutdown,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accepts clients and hands them to the queue, blocking while it is full.
    pub fn serve(self) {
        loop {
            let accepted = self.listener.accept();
            if self.shutdown.load(Ordering::Acquire) {
                break;
            }
            let (stream, peer) = match accepted {
                Ok(pair) => pair,
                Err(err) => {
                    error!(error = %err, "failed to accept incoming connection");
                    continue;
                }
            };
            debug!(peer = %peer, "accepted connection");
            if let Err(err) = stream.set_nodelay(true) {
                debug!(peer = %peer, error = %err, "failed to set TCP_NODELAY on downstream stream");
            }
            if let Err(QueueClosed(conn)) = self.app.queue.insert(Connection { stream, peer }) {
                debug!(peer = %conn.peer, "queue closed; dropping connection");
                break;
            }
            crate::metrics::set_queue_depth(self.app.queue.len());
        }
        info!(address = %self.local_addr, "proxy listener stopped");
    }
}
