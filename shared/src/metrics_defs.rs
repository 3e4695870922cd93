//! Metric definitions shared by the gray release crates.
//!
//! Every metric a crate emits is declared once as a [`MetricDef`] and listed
//! in that crate's `ALL_METRICS`, so the binary can describe them all to the
//! installed recorder before any value is recorded.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricType {
    Counter,
    Gauge,
    Histogram,
}

#[derive(Debug, Clone, Copy)]
pub struct MetricDef {
    pub name: &'static str,
    pub metric_type: MetricType,
    pub description: &'static str,
}

impl MetricDef {
    /// Registers the description with the global recorder.
    pub fn describe(&self) {
        match self.metric_type {
            MetricType::Counter => metrics::describe_counter!(self.name, self.description),
            MetricType::Gauge => metrics::describe_gauge!(self.name, self.description),
            MetricType::Histogram => metrics::describe_histogram!(self.name, self.description),
        }
    }
}

pub fn describe_all(defs: &[MetricDef]) {
    for def in defs {
        def.describe();
    }
}

// The macros expand to `metrics::` paths, so callers depend on `metrics` too.

#[macro_export]
macro_rules! counter {
    ($def:expr) => {
        metrics::counter!($def.name)
    };
}

#[macro_export]
macro_rules! gauge {
    ($def:expr) => {
        metrics::gauge!($def.name)
    };
}

#[macro_export]
macro_rules! histogram {
    ($def:expr) => {
        metrics::histogram!($def.name)
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    const REQUESTS: MetricDef = MetricDef {
        name: "test.requests",
        metric_type: MetricType::Counter,
        description: "Requests seen by the test",
    };

    #[test]
    fn test_describe_without_recorder() {
        // Describing and recording are no-ops until a recorder is installed.
        describe_all(&[REQUESTS]);
        crate::counter!(REQUESTS).increment(1);
    }
}
