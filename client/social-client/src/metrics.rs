//! Prometheus export of the cache counters
//!
//! The client is short-lived, so counters are written once as a text file
//! for a node exporter textfile collector rather than served.

use anyhow::{Context, Result};
use prometheus::{Encoder, Registry, TextEncoder};
use std::path::Path;
use tracing::info;

use query_cache::CacheMetrics;

/// A registry holding the cache counters
pub fn cache_registry() -> Result<Registry> {
    let registry = Registry::new();
    CacheMetrics::register(&registry).context("Failed to register cache metrics")?;
    Ok(registry)
}

/// Render `registry` in the Prometheus text format
pub fn render(registry: &Registry) -> Result<String> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder
        .encode(&registry.gather(), &mut buffer)
        .context("Failed to encode metrics")?;
    String::from_utf8(buffer).context("Metrics output is not UTF-8")
}

/// Replace the file at `path` with the rendered metrics. The write goes
/// through a sibling temp file so collectors never read a partial file.
pub fn write_textfile(registry: &Registry, path: &Path) -> Result<()> {
    let rendered = render(registry)?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }

    let staging = path.with_extension("prom.tmp");
    std::fs::write(&staging, rendered)
        .with_context(|| format!("Failed to write {}", staging.display()))?;
    std::fs::rename(&staging, path)
        .with_context(|| format!("Failed to move metrics into {}", path.display()))?;

    info!(path = %path.display(), "Metrics written");
    Ok(())
}
