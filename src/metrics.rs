use std::net::SocketAddr;

use anyhow::Context;
use metrics::gauge;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::ingest::ensure_metrics_described;

pub struct Metrics {
    pub handle: PrometheusHandle,
}

impl Metrics {
    /// Install the Prometheus recorder without an HTTP listener. The caller
    /// renders the exposition text through `handle`.
    pub fn init() -> anyhow::Result<Self> {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .context("prometheus: install recorder")?;
        ensure_metrics_described();
        gauge!("ingest_index_entries").set(0.0);
        Ok(Self { handle })
    }

    /// Install the recorder and serve `/metrics` on `addr`. Must be called
    /// from inside a tokio runtime.
    pub fn serve(addr: SocketAddr) -> anyhow::Result<()> {
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .with_context(|| format!("prometheus: listen on {addr}"))?;
        ensure_metrics_described();
        tracing::info!(%addr, "metrics exporter listening");
        Ok(())
    }

    pub fn render(&self) -> String {
        self.handle.render()
    }
}
