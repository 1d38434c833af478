//! # Metrics Collector
//!
//! Records connector-scoped samples into the metric store and mirrors them
//! into the process-wide `metrics` facade so an exporter can pick them up.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use crate::models::{ConnectorMetric, MetricKind};
use crate::repositories::{MetricStore, StoreError};

/// Sink for connector-scoped operational metrics.
#[derive(Clone)]
pub struct MetricsCollector {
    store: Arc<dyn MetricStore>,
}

impl MetricsCollector {
    pub fn new(store: Arc<dyn MetricStore>) -> Self {
        Self { store }
    }

    /// Record a monotonically increasing count.
    pub async fn record_counter(
        &self,
        connector_id: Uuid,
        name: &'static str,
        value: u64,
        dimensions: BTreeMap<String, String>,
    ) -> Result<(), StoreError> {
        let labels = facade_labels(connector_id, &dimensions);
        metrics::counter!(name, labels).increment(value);
        self.append(connector_id, name, MetricKind::Counter, value as f64, dimensions)
            .await
    }

    /// Record a point-in-time value.
    pub async fn record_gauge(
        &self,
        connector_id: Uuid,
        name: &'static str,
        value: f64,
        dimensions: BTreeMap<String, String>,
    ) -> Result<(), StoreError> {
        let labels = facade_labels(connector_id, &dimensions);
        metrics::gauge!(name, labels).set(value);
        self.append(connector_id, name, MetricKind::Gauge, value, dimensions)
            .await
    }

    /// Record an observation of a distribution, e.g. a duration.
    pub async fn record_histogram(
        &self,
        connector_id: Uuid,
        name: &'static str,
        value: f64,
        dimensions: BTreeMap<String, String>,
    ) -> Result<(), StoreError> {
        let labels = facade_labels(connector_id, &dimensions);
        metrics::histogram!(name, labels).record(value);
        self.append(connector_id, name, MetricKind::Histogram, value, dimensions)
            .await
    }

    async fn append(
        &self,
        connector_id: Uuid,
        name: &'static str,
        kind: MetricKind,
        value: f64,
        dimensions: BTreeMap<String, String>,
    ) -> Result<(), StoreError> {
        self.store
            .append(ConnectorMetric {
                id: Uuid::new_v4(),
                connector_id,
                name: name.to_string(),
                kind,
                value,
                unit: None,
                dimensions,
                tags: Vec::new(),
                recorded_at: Utc::now(),
                aggregation_interval_seconds: None,
            })
            .await?;
        Ok(())
    }
}

fn facade_labels(
    connector_id: Uuid,
    dimensions: &BTreeMap<String, String>,
) -> Vec<metrics::Label> {
    let mut labels = vec![metrics::Label::new("connector_id", connector_id.to_string())];
    labels.extend(
        dimensions
            .iter()
            .map(|(k, v)| metrics::Label::new(k.clone(), v.clone())),
    );
    labels
}
