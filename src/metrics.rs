// src/metrics.rs
use anyhow::{Context, Result};
use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;

/// One-time metric descriptions (so series show up on /metrics with help text).
pub fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("blueflag_polls_total", "Channel polls by outcome.");
        describe_counter!(
            "blueflag_candidates_total",
            "Scored candidates by decision (accept/reject/defer)."
        );
        describe_counter!(
            "blueflag_publish_attempts_total",
            "Calls made to the feed publisher, retries included."
        );
        describe_counter!("blueflag_published_total", "Posts confirmed by the feed.");
        describe_counter!(
            "blueflag_publish_dropped_total",
            "Items given up for this cycle, by reason."
        );
        describe_counter!("blueflag_cycles_total", "Scan cycles by outcome.");
        describe_counter!(
            "blueflag_feed_synced_total",
            "Dedup records seeded from posts already on the feed."
        );
        describe_gauge!(
            "blueflag_quota_remaining",
            "Units left in the current quota window."
        );
        describe_histogram!("blueflag_cycle_duration_ms", "Cycle wall time in milliseconds.");
        describe_gauge!("blueflag_last_cycle_ts", "Unix ts when the last cycle finished.");
    });
}

pub struct Metrics {
    pub handle: PrometheusHandle,
}

impl Metrics {
    /// Install the global Prometheus recorder. Call once per process.
    pub fn install() -> Result<Self> {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .context("installing prometheus recorder")?;
        ensure_metrics_described();
        Ok(Self { handle })
    }

    /// Recorder that is not installed globally; renders an empty exposition.
    pub fn detached() -> Self {
        let recorder = PrometheusBuilder::new().build_recorder();
        Self {
            handle: recorder.handle(),
        }
    }

    pub fn render(&self) -> String {
        self.handle.render()
    }
}
