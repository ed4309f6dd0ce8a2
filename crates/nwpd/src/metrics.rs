//! Prometheus metrics collection for nwpd
//!
//! # NIST 800-53 Rev 5 Control Mappings
//! - AU-6: Audit Record Review - Metrics available for analysis
//! - SI-4: System Monitoring - Protocol and liveness metrics

use crate::wire::PacketType;
use prometheus::{Counter, CounterVec, Gauge, Histogram, HistogramOpts, Opts, Registry};
use std::sync::Arc;

/// Metrics collector for nwpd
///
/// # NIST Controls
/// - SI-4: System Monitoring - Centralized metrics collection
#[derive(Clone)]
pub struct MetricsCollector {
    // Frame counters, labelled by packet type
    pub frames_received_total: CounterVec,
    pub frames_sent_total: CounterVec,
    pub frames_malformed_total: Counter,
    pub send_errors_total: Counter,

    // Liveness
    pub investigations_total: Counter,
    pub neighbors_added_total: Counter,
    pub neighbors_evicted_total: Counter,

    // Collaborators
    pub route_errors_total: Counter,
    pub route_latency_seconds: Histogram,

    // Gauges
    pub neighbors: Gauge,

    // Registry for export
    pub registry: Arc<Registry>,
}

impl MetricsCollector {
    /// Create a new metrics collector
    ///
    /// # NIST Controls
    /// - AU-12: Audit Record Generation - Initialize audit metrics
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let frames_received_total = CounterVec::new(
            Opts::new("nwpd_frames_received_total", "NWP frames received by packet type"),
            &["type"],
        )?;
        registry.register(Box::new(frames_received_total.clone()))?;

        let frames_sent_total = CounterVec::new(
            Opts::new("nwpd_frames_sent_total", "NWP frames sent by packet type"),
            &["type"],
        )?;
        registry.register(Box::new(frames_sent_total.clone()))?;

        let frames_malformed_total = Counter::with_opts(Opts::new(
            "nwpd_frames_malformed_total",
            "Frames discarded as malformed or rejected",
        ))?;
        registry.register(Box::new(frames_malformed_total.clone()))?;

        let send_errors_total = Counter::with_opts(Opts::new(
            "nwpd_send_errors_total",
            "Frames that failed to send",
        ))?;
        registry.register(Box::new(send_errors_total.clone()))?;

        let investigations_total = Counter::with_opts(Opts::new(
            "nwpd_investigations_total",
            "Ack timeouts escalated to investigative probes",
        ))?;
        registry.register(Box::new(investigations_total.clone()))?;

        let neighbors_added_total = Counter::with_opts(Opts::new(
            "nwpd_neighbors_added_total",
            "Neighbor entries created",
        ))?;
        registry.register(Box::new(neighbors_added_total.clone()))?;

        let neighbors_evicted_total = Counter::with_opts(Opts::new(
            "nwpd_neighbors_evicted_total",
            "Neighbors evicted after investigative timeout",
        ))?;
        registry.register(Box::new(neighbors_evicted_total.clone()))?;

        let route_errors_total = Counter::with_opts(Opts::new(
            "nwpd_route_errors_total",
            "Route table requests that failed",
        ))?;
        registry.register(Box::new(route_errors_total.clone()))?;

        let route_latency_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "nwpd_route_latency_seconds",
                "Route table request latency in seconds",
            )
            .buckets(vec![0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0]),
        )?;
        registry.register(Box::new(route_latency_seconds.clone()))?;

        let neighbors = Gauge::with_opts(Opts::new(
            "nwpd_neighbors",
            "Current number of neighbor entries",
        ))?;
        registry.register(Box::new(neighbors.clone()))?;

        Ok(Self {
            frames_received_total,
            frames_sent_total,
            frames_malformed_total,
            send_errors_total,
            investigations_total,
            neighbors_added_total,
            neighbors_evicted_total,
            route_errors_total,
            route_latency_seconds,
            neighbors,
            registry: Arc::new(registry),
        })
    }

    pub fn record_received(&self, packet_type: PacketType) {
        self.frames_received_total
            .with_label_values(&[packet_type.label()])
            .inc();
    }

    pub fn record_sent(&self, packet_type: PacketType) {
        self.frames_sent_total
            .with_label_values(&[packet_type.label()])
            .inc();
    }

    pub fn record_malformed(&self) {
        self.frames_malformed_total.inc();
    }

    pub fn record_send_error(&self) {
        self.send_errors_total.inc();
    }

    pub fn record_investigation(&self) {
        self.investigations_total.inc();
    }

    pub fn record_neighbor_added(&self) {
        self.neighbors_added_total.inc();
    }

    pub fn record_eviction(&self) {
        self.neighbors_evicted_total.inc();
    }

    pub fn record_route_error(&self) {
        self.route_errors_total.inc();
    }

    /// Record route request latency
    pub fn observe_route_latency(&self, duration_secs: f64) {
        self.route_latency_seconds.observe(duration_secs);
    }

    /// Update neighbor count
    pub fn set_neighbors(&self, count: usize) {
        self.neighbors.set(count as f64);
    }

    pub fn sent_count(&self, packet_type: PacketType) -> f64 {
        self.frames_sent_total
            .with_label_values(&[packet_type.label()])
            .get()
    }

    pub fn received_count(&self, packet_type: PacketType) -> f64 {
        self.frames_received_total
            .with_label_values(&[packet_type.label()])
            .get()
    }
}
