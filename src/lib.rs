pub mod cli;
pub mod logging;
pub mod metrics;
pub mod proxy;
pub mod settings;

use std::sync::Arc;

use anyhow::Result;

use crate::settings::Settings;

pub fn run(settings: Settings) -> Result<()> {
    let settings = Arc::new(settings);
    if let Some(addr) = settings.metrics_listen {
        // The metrics thread is detached; it lives as long as the process.
        metrics::spawn_server(addr)?;
    }
    let app = proxy::AppContext::new(settings)?;
    proxy::run(app)
}
