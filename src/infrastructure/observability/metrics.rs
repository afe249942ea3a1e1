//! Prometheus metrics for the engine, grounded in the teacher's
//! `infrastructure/observability/metrics.rs`: one `Registry`, a fixed set of
//! named gauges/counters/histograms registered once at construction, plain
//! setters called from the call sites that own the relevant state.

use prometheus::{
    core::{AtomicF64, GenericGauge, GenericGaugeVec},
    CounterVec, Gauge, GaugeVec, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder,
};
use std::sync::Arc;

#[derive(Clone)]
pub struct Metrics {
    registry: Arc<Registry>,
    /// Open positions right now, across all symbols.
    pub open_positions: GenericGauge<AtomicF64>,
    /// Margin committed across all RESERVED/OPEN positions in USD.
    pub margin_committed_usd: GenericGauge<AtomicF64>,
    /// Realized PnL booked so far today in USD.
    pub daily_pnl_usd: GenericGauge<AtomicF64>,
    /// Circuit breaker status (0=closed, 1=tripped).
    pub circuit_breaker_status: GenericGauge<AtomicF64>,
    /// Candidates emitted by the scanner, by scan cycle outcome.
    pub scan_candidates_total: CounterVec,
    /// Candidates skipped by the trading engine, by reason code.
    pub candidates_skipped_total: CounterVec,
    /// Positions closed, by exit reason code.
    pub positions_closed_total: CounterVec,
    /// Exchange request latency in seconds.
    pub exchange_latency_seconds: HistogramVec,
    /// Per-symbol position value in USD.
    pub position_value_usd: GenericGaugeVec<AtomicF64>,
}

impl Metrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let open_positions = Gauge::with_opts(Opts::new("engine_open_positions", "Open positions across all symbols"))?;
        registry.register(Box::new(open_positions.clone()))?;

        let margin_committed_usd = Gauge::with_opts(Opts::new(
            "engine_margin_committed_usd",
            "Margin committed across RESERVED/OPEN positions",
        ))?;
        registry.register(Box::new(margin_committed_usd.clone()))?;

        let daily_pnl_usd = Gauge::with_opts(Opts::new("engine_daily_pnl_usd", "Realized PnL booked today"))?;
        registry.register(Box::new(daily_pnl_usd.clone()))?;

        let circuit_breaker_status = Gauge::with_opts(Opts::new(
            "engine_circuit_breaker_status",
            "Circuit breaker status (0=closed, 1=tripped)",
        ))?;
        registry.register(Box::new(circuit_breaker_status.clone()))?;

        let scan_candidates_total = CounterVec::new(
            Opts::new("engine_scan_candidates_total", "Candidates emitted by the scanner"),
            &["direction"],
        )?;
        registry.register(Box::new(scan_candidates_total.clone()))?;

        let candidates_skipped_total = CounterVec::new(
            Opts::new("engine_candidates_skipped_total", "Candidates skipped by the trading engine"),
            &["reason"],
        )?;
        registry.register(Box::new(candidates_skipped_total.clone()))?;

        let positions_closed_total = CounterVec::new(
            Opts::new("engine_positions_closed_total", "Positions closed, by exit reason"),
            &["reason"],
        )?;
        registry.register(Box::new(positions_closed_total.clone()))?;

        let exchange_latency_seconds = HistogramVec::new(
            HistogramOpts::new("engine_exchange_latency_seconds", "Exchange request latency in seconds")
                .buckets(vec![0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]),
            &["operation"],
        )?;
        registry.register(Box::new(exchange_latency_seconds.clone()))?;

        let position_value_usd = GaugeVec::new(
            Opts::new("engine_position_value_usd", "Position value per symbol in USD"),
            &["symbol"],
        )?;
        registry.register(Box::new(position_value_usd.clone()))?;

        Ok(Self {
            registry: Arc::new(registry),
            open_positions,
            margin_committed_usd,
            daily_pnl_usd,
            circuit_breaker_status,
            scan_candidates_total,
            candidates_skipped_total,
            positions_closed_total,
            exchange_latency_seconds,
            position_value_usd,
        })
    }

    pub fn render(&self) -> String {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        encoder.encode_to_string(&metric_families).unwrap_or_default()
    }

    pub fn inc_skipped(&self, reason: &str) {
        self.candidates_skipped_total.with_label_values(&[reason]).inc();
    }

    pub fn inc_closed(&self, reason: &str) {
        self.positions_closed_total.with_label_values(&[reason]).inc();
    }

    pub fn set_position_value(&self, symbol: &str, value: f64) {
        self.position_value_usd.with_label_values(&[symbol]).set(value);
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new().expect("metrics registration is static and always valid")
    }
}
