use std::io;
use std::sync::{Arc, OnceLock};

use parking_lot::{Mutex, MutexGuard};
use tracing_subscriber::EnvFilter;

/// Shared sink behind the process-wide subscriber installed by the first capture.
#[derive(Clone, Default)]
struct Sink(Arc<Mutex<Vec<u8>>>);

impl io::Write for Sink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

static SINK: OnceLock<Sink> = OnceLock::new();
static EXCLUSIVE: Mutex<()> = Mutex::new(());

/// Collects log lines emitted by any thread while it is alive.
///
/// Only one capture exists at a time; the first one fixes the filter for the whole binary.
pub struct LogCapture {
    sink: Sink,
    _exclusive: MutexGuard<'static, ()>,
}

impl LogCapture {
    pub fn new(filter: &str) -> Self {
        let exclusive = EXCLUSIVE.lock();
        let sink = SINK
            .get_or_init(|| {
                let sink = Sink::default();
                let writer = sink.clone();
                let _ = tracing_subscriber::fmt()
                    .with_env_filter(EnvFilter::new(filter))
                    .with_writer(move || writer.clone())
                    .with_ansi(false)
                    .with_target(false)
                    .compact()
                    .try_init();
                sink
            })
            .clone();
        sink.0.lock().clear();
        Self {
            sink,
            _exclusive: exclusive,
        }
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.sink.0.lock()).into_owned()
    }
}
