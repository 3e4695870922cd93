//! Metrics definitions for the gray release rule cache.

use shared::metrics_defs::{MetricDef, MetricType};

pub const SCAN_DURATION: MetricDef = MetricDef {
    name: "gray_rules.scan.duration",
    metric_type: MetricType::Histogram,
    description: "Time to complete a rule store scan pass in seconds",
};

pub const SCAN_ROWS: MetricDef = MetricDef {
    name: "gray_rules.scan.rows",
    metric_type: MetricType::Histogram,
    description: "Number of rule records read during a scan pass",
};

pub const SCAN_FAILURES: MetricDef = MetricDef {
    name: "gray_rules.scan.failures",
    metric_type: MetricType::Counter,
    description: "Number of scan passes aborted by a rule store error",
};

pub const REFRESH_COUNT: MetricDef = MetricDef {
    name: "gray_rules.refresh.count",
    metric_type: MetricType::Counter,
    description: "Number of per-key refreshes applied to the index",
};

pub const REFRESH_FAILURES: MetricDef = MetricDef {
    name: "gray_rules.refresh.failures",
    metric_type: MetricType::Counter,
    description: "Number of per-key refreshes that failed to read the rule store",
};

pub const NOTIFICATIONS_DROPPED: MetricDef = MetricDef {
    name: "gray_rules.notifications.dropped",
    metric_type: MetricType::Counter,
    description: "Number of release notifications with an undecodable payload",
};

pub const MALFORMED_RULES: MetricDef = MetricDef {
    name: "gray_rules.malformed_rules",
    metric_type: MetricType::Counter,
    description: "Number of rules skipped because their rule items could not be parsed",
};

pub const UNRELEASED_RULES: MetricDef = MetricDef {
    name: "gray_rules.unreleased_rules",
    metric_type: MetricType::Counter,
    description: "Number of rules skipped because their branch has no release",
};

pub const INDEXED_KEYS: MetricDef = MetricDef {
    name: "gray_rules.index.keys",
    metric_type: MetricType::Gauge,
    description: "Number of app/cluster/namespace scopes with active gray rules",
};

pub const ALL_METRICS: &[MetricDef] = &[
    SCAN_DURATION,
    SCAN_ROWS,
    SCAN_FAILURES,
    REFRESH_COUNT,
    REFRESH_FAILURES,
    NOTIFICATIONS_DROPPED,
    MALFORMED_RULES,
    UNRELEASED_RULES,
    INDEXED_KEYS,
];
