// Metrics sink
//
// Components receive an Arc<dyn MetricsSink> at construction. The binaries
// pass OtelMetrics; tests pass CountingMetrics and read the counts back.

use std::sync::atomic::{AtomicU64, Ordering};

use opentelemetry::metrics::{Counter as OtelCounter, Meter};
use opentelemetry::KeyValue;

/// Counters emitted by the calendar components
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Counter {
    EventsCreated,
    EventsUpdated,
    EventsDeleted,
    EventsPurged,
    NotificationsPublished,
    NotificationsPublishFailed,
    NotificationsMarkFailed,
    TasksDelivered,
    TasksFailed,
}

impl Counter {
    pub const ALL: [Counter; 9] = [
        Counter::EventsCreated,
        Counter::EventsUpdated,
        Counter::EventsDeleted,
        Counter::EventsPurged,
        Counter::NotificationsPublished,
        Counter::NotificationsPublishFailed,
        Counter::NotificationsMarkFailed,
        Counter::TasksDelivered,
        Counter::TasksFailed,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Counter::EventsCreated => "calendar.events.created",
            Counter::EventsUpdated => "calendar.events.updated",
            Counter::EventsDeleted => "calendar.events.deleted",
            Counter::EventsPurged => "calendar.events.purged",
            Counter::NotificationsPublished => "calendar.notifications.published",
            Counter::NotificationsPublishFailed => "calendar.notifications.publish_failed",
            Counter::NotificationsMarkFailed => "calendar.notifications.mark_failed",
            Counter::TasksDelivered => "calendar.sender.delivered",
            Counter::TasksFailed => "calendar.sender.failed",
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

/// Receives counter increments
pub trait MetricsSink: Send + Sync + 'static {
    fn increment(&self, counter: Counter, value: u64);

    fn incr(&self, counter: Counter) {
        self.increment(counter, 1);
    }
}

/// Discards everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn increment(&self, _counter: Counter, _value: u64) {}
}

/// Keeps running totals in memory
#[derive(Debug, Default)]
pub struct CountingMetrics {
    counts: [AtomicU64; Counter::ALL.len()],
}

impl CountingMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, counter: Counter) -> u64 {
        self.counts[counter.index()].load(Ordering::Relaxed)
    }
}

impl MetricsSink for CountingMetrics {
    fn increment(&self, counter: Counter, value: u64) {
        self.counts[counter.index()].fetch_add(value, Ordering::Relaxed);
    }
}

/// Forwards increments to OpenTelemetry counters created from `meter`
pub struct OtelMetrics {
    counters: Vec<OtelCounter<u64>>,
    attributes: Vec<KeyValue>,
}

impl OtelMetrics {
    pub fn new(meter: &Meter) -> Self {
        let counters = Counter::ALL
            .iter()
            .map(|c| meter.u64_counter(c.name()).build())
            .collect();
        Self {
            counters,
            attributes: Vec::new(),
        }
    }

    /// Use the global meter provider's "calendar" meter
    pub fn global() -> Self {
        Self::new(&opentelemetry::global::meter("calendar"))
    }

    /// Attach attributes (e.g. component name) to every data point
    pub fn with_attribute(mut self, key: &'static str, value: impl Into<String>) -> Self {
        self.attributes.push(KeyValue::new(key, value.into()));
        self
    }
}

impl MetricsSink for OtelMetrics {
    fn increment(&self, counter: Counter, value: u64) {
        self.counters[counter.index()].add(value, &self.attributes);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counting_metrics() {
        let metrics = CountingMetrics::new();
        metrics.incr(Counter::EventsCreated);
        metrics.incr(Counter::EventsCreated);
        metrics.increment(Counter::EventsPurged, 5);

        assert_eq!(metrics.get(Counter::EventsCreated), 2);
        assert_eq!(metrics.get(Counter::EventsPurged), 5);
        assert_eq!(metrics.get(Counter::TasksFailed), 0);
    }

    #[test]
    fn test_counter_indices_match_all() {
        for (i, c) in Counter::ALL.iter().enumerate() {
            assert_eq!(c.index(), i);
        }
    }

    #[test]
    fn test_otel_metrics_export_through_meter_provider() {
        use opentelemetry::metrics::MeterProvider as _;
        use opentelemetry_sdk::metrics::data::Sum;
        use opentelemetry_sdk::metrics::{InMemoryMetricExporter, SdkMeterProvider};

        let exporter = InMemoryMetricExporter::default();
        let provider = SdkMeterProvider::builder()
            .with_periodic_exporter(exporter.clone())
            .build();
        let metrics =
            OtelMetrics::new(&provider.meter("calendar")).with_attribute("service", "test");

        metrics.incr(Counter::TasksDelivered);
        metrics.increment(Counter::TasksDelivered, 2);
        metrics.incr(Counter::NotificationsPublished);
        provider.force_flush().unwrap();

        let exported = exporter.get_finished_metrics().unwrap();
        let total = |name: &str| -> u64 {
            exported
                .iter()
                .flat_map(|rm| rm.scope_metrics.iter())
                .flat_map(|sm| sm.metrics.iter())
                .filter(|m| m.name == name)
                .filter_map(|m| m.data.as_any().downcast_ref::<Sum<u64>>())
                .flat_map(|sum| sum.data_points.iter())
                .map(|dp| dp.value)
                .max()
                .unwrap_or(0)
        };
        assert_eq!(total(Counter::TasksDelivered.name()), 3);
        assert_eq!(total(Counter::NotificationsPublished.name()), 1);
        assert_eq!(total(Counter::TasksFailed.name()), 0);

        provider.shutdown().unwrap();
    }

    #[test]
    fn test_otel_metrics_without_provider_is_noop() {
        let metrics = OtelMetrics::global().with_attribute("component", "test");
        metrics.incr(Counter::TasksDelivered);
    }
}
