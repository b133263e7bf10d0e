use commonware_runtime::Metrics as RuntimeMetrics;
use prometheus_client::metrics::counter::Counter;

/// Metrics for the [`Actor`](super::Actor)
#[derive(Default)]
pub struct Metrics {
    /// Number of messages to sign received from the module
    pub messages: Counter,
    /// Number of signed messages broadcast
    pub signed: Counter,
    /// Number of participation attempts skipped for lack of power
    pub no_power: Counter,
    /// Number of failed participation attempts
    pub failures: Counter,
    /// Number of miners signed by the catch-up broadcaster
    pub catch_ups: Counter,
}

impl Metrics {
    /// Create and return a new set of metrics, registered with the given context.
    pub fn init<E: RuntimeMetrics>(context: E) -> Self {
        let metrics = Metrics::default();
        context.register(
            "messages",
            "Number of messages to sign received from the module",
            metrics.messages.clone(),
        );
        context.register(
            "signed",
            "Number of signed messages broadcast",
            metrics.signed.clone(),
        );
        context.register(
            "no_power",
            "Number of participation attempts skipped for lack of power",
            metrics.no_power.clone(),
        );
        context.register(
            "failures",
            "Number of failed participation attempts",
            metrics.failures.clone(),
        );
        context.register(
            "catch_ups",
            "Number of miners signed by the catch-up broadcaster",
            metrics.catch_ups.clone(),
        );
        metrics
    }
}
