use std::io::{BufRead, BufReader, Write};
use std::net::{Ipv4Addr, SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration as StdDuration;

use anyhow::Result;

/// Origin server that answers every request with the same response and counts requests.
pub struct TestUpstream {
    addr: SocketAddr,
    requests: Arc<AtomicUsize>,
    request_lines: Arc<parking_lot::Mutex<Vec<String>>>,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl TestUpstream {
    pub fn http_response(response: impl Into<Vec<u8>>) -> Result<Self> {
        Self::spawn(Arc::new(response.into()))
    }

    pub fn http_ok(body: &str) -> Result<Self> {
        let response = format!(
            "HTTP/1.0 200 OK\r\nContent-Length: {}\r\nContent-Type: text/plain\r\n\r\n{}",
            body.len(),
            body
        );
        Self::http_response(response.into_bytes())
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn request_count(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    pub fn request_lines(&self) -> Vec<String> {
        self.request_lines.lock().clone()
    }

    fn spawn(response: Arc<Vec<u8>>) -> Result<Self> {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0))?;
        let addr = listener.local_addr()?;
        let requests = Arc::new(AtomicUsize::new(0));
        let request_lines = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let stop = Arc::new(AtomicBool::new(false));

        let thread_requests = requests.clone();
        let thread_lines = request_lines.clone();
        let thread_stop = stop.clone();
        let handle = thread::spawn(move || {
            for stream in listener.incoming() {
                if thread_stop.load(Ordering::SeqCst) {
                    break;
                }
                let Ok(stream) = stream else { continue };
                let response = response.clone();
                let requests = thread_requests.clone();
                let lines = thread_lines.clone();
                thread::spawn(move || {
                    if let Ok(Some(line)) = read_request_head(&stream) {
                        requests.fetch_add(1, Ordering::SeqCst);
                        lines.lock().push(line);
                        let mut stream = stream;
                        let _ = stream.write_all(&response);
                    }
                });
            }
        });

        Ok(Self {
            addr,
            requests,
            request_lines,
            stop,
            handle: Some(handle),
        })
    }
}

impl Drop for TestUpstream {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        let _ = TcpStream::connect_timeout(&self.addr, StdDuration::from_secs(1));
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// Reads a request head and returns its first line without the line terminator.
fn read_request_head(stream: &TcpStream) -> Result<Option<String>> {
    stream.set_read_timeout(Some(StdDuration::from_secs(5)))?;
    let mut reader = BufReader::new(stream.try_clone()?);
    let mut first = None;
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line)? == 0 {
            return Ok(None);
        }
        if line == "\r\n" || line == "\n" {
            return Ok(first);
        }
        if first.is_none() {
            first = Some(line.trim_end().to_string());
        }
    }
}
