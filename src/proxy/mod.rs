pub mod cache;
pub mod codec;
pub mod forward;
pub mod handler;
pub mod listener;
pub mod queue;
pub mod request;
pub mod respond;
pub mod worker;

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, TcpStream};
use std::sync::{Arc, mpsc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use crate::settings::Settings;
use cache::CacheStore;
use forward::ForwardLimits;
use listener::{Connection, ProxyServer};
use queue::BoundedQueue;
use worker::WorkerPool;

const WAKE_TIMEOUT: Duration = Duration::from_secs(1);

/// Shared state handed to the listener and every worker thread.
#[derive(Clone)]
pub struct AppContext {
    pub settings: Arc<Settings>,
    pub cache: Arc<CacheStore>,
    pub queue: Arc<BoundedQueue<Connection>>,
}

impl AppContext {
    pub fn new(settings: Arc<Settings>) -> Result<Self> {
        let cache = CacheStore::with_worker_slack(
            settings.cache_base_capacity,
            settings.worker_count,
            settings.max_object_size,
        );
        let queue = BoundedQueue::new(settings.queue_capacity)?;
        info!(
            policy = %settings.policy,
            capacity = cache.capacity(),
            workers = settings.worker_count,
            queue_capacity = settings.queue_capacity,
            "cache initialised"
        );
        Ok(Self {
            settings,
            cache: Arc::new(cache),
            queue: Arc::new(queue),
        })
    }

    pub fn forward_limits(&self) -> ForwardLimits {
        ForwardLimits {
            connect_timeout: self.settings.upstream_connect_timeout(),
            io_timeout: self.settings.upstream_timeout(),
            max_object_size: self.settings.max_object_size,
        }
    }
}

/// A running proxy: one listener thread feeding a fixed pool of workers.
pub struct ProxyHandle {
    app: AppContext,
    local_addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    listener: Option<JoinHandle<()>>,
    workers: Option<WorkerPool>,
}

impl ProxyHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn cache(&self) -> &CacheStore {
        &self.app.cache
    }

    /// Stops accepting, lets workers finish queued connections, then frees the cache.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        self.app.queue.close();
        if let Some(listener) = self.listener.take() {
            wake_listener(self.local_addr);
            if listener.join().is_err() {
                warn!("proxy listener thread panicked");
            }
        }
        if let Some(workers) = self.workers.take() {
            workers.join();
        }
        let freed = self.app.cache.clear();
        info!(freed, "proxy stopped");
    }
}

impl Drop for ProxyHandle {
    fn drop(&mut self) {
        if self.listener.is_some() || self.workers.is_some() {
            self.stop();
        }
    }
}

/// Unblocks a pending `accept` so the listener observes the shutdown flag.
fn wake_listener(addr: SocketAddr) {
    let target = match addr.ip() {
        IpAddr::V4(ip) if ip.is_unspecified() => SocketAddr::new(Ipv4Addr::LOCALHOST.into(), addr.port()),
        IpAddr::V6(ip) if ip.is_unspecified() => SocketAddr::new(Ipv6Addr::LOCALHOST.into(), addr.port()),
        _ => addr,
    };
    if let Err(err) = TcpStream::connect_timeout(&target, WAKE_TIMEOUT) {
        debug!(address = %target, error = %err, "failed to wake proxy listener");
    }
}

pub fn spawn(app: AppContext) -> Result<ProxyHandle> {
    let shutdown = Arc::new(AtomicBool::new(false));
    let server = ProxyServer::bind(app.clone(), shutdown.clone())?;
    let local_addr = server.local_addr();
    let workers = WorkerPool::spawn(&app)?;
    let listener = match thread::Builder::new()
        .name("proxy-listener".into())
        .spawn(move || server.serve())
    {
        Ok(handle) => handle,
        Err(err) => {
            app.queue.close();
            workers.join();
            return Err(err).context("failed to spawn listener thread");
        }
    };

    Ok(ProxyHandle {
        app,
        local_addr,
        shutdown,
        listener: Some(listener),
        workers: Some(workers),
    })
}

/// Serves until SIGINT or SIGTERM, then shuts down in order.
pub fn run(app: AppContext) -> Result<()> {
    let handle = spawn(app)?;
    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .context("failed to install termination signal handler")?;

    if rx.recv().is_ok() {
        info!("termination signal received; shutting down");
    }
    handle.shutdown();
    Ok(())
}
