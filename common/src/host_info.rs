//! Host info reported by storage nodes and distributors.
//!
//! Nodes periodically report a JSON document such as:
//!
//! ```json
//! {
//!   "cluster-state-version": 2,
//!   "metrics": { "values": [ { "name": "...", "values": { "last": 0 }, "dimensions": {} } ] },
//!   "distributor": { "storage-nodes": [ { "node-index": 0, "min-current-replication-factor": 2 } ] }
//! }
//! ```
//!
//! Fields not listed here are ignored.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::Result;

/// Metric counting buckets stored on a node, per bucket space.
pub const BUCKETS_METRIC_NAME: &str = "vds.datastored.bucket_space.buckets_total";

/// Dimensions selecting the default bucket space of [`BUCKETS_METRIC_NAME`].
pub const BUCKETS_METRIC_DIMENSIONS: &[(&str, &str)] = &[("bucketSpace", "default")];

/// Self-reported snapshot of a node.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HostInfo {
    #[serde(
        rename = "cluster-state-version",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    cluster_state_version: Option<u32>,
    #[serde(default)]
    metrics: Metrics,
    #[serde(default)]
    distributor: DistributorInfo,
}

impl HostInfo {
    /// Decode a host info document.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Encode as a host info document.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Cluster state version the node has applied, if it has reported one.
    pub fn cluster_state_version(&self) -> Option<u32> {
        self.cluster_state_version
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Distributor section; empty for storage nodes.
    pub fn distributor(&self) -> &DistributorInfo {
        &self.distributor
    }

    pub fn with_cluster_state_version(mut self, version: u32) -> Self {
        self.cluster_state_version = Some(version);
        self
    }

    pub fn with_metric(mut self, metric: Metric) -> Self {
        self.metrics.values.push(metric);
        self
    }

    pub fn with_storage_node(mut self, index: u16, min_current_replication_factor: Option<u32>) -> Self {
        self.distributor.storage_nodes.push(StorageNodeStats {
            index,
            min_current_replication_factor,
        });
        self
    }
}

/// Metric table of a host info document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    snapshot: Option<MetricsSnapshot>,
    #[serde(default)]
    values: Vec<Metric>,
}

impl Metrics {
    /// Find the value of the metric with exactly this name and dimension set.
    pub fn value_at(&self, name: &str, dimensions: &[(&str, &str)]) -> Option<&MetricValue> {
        self.values
            .iter()
            .find(|metric| metric.name == name && metric.has_dimensions(dimensions))
            .map(|metric| &metric.values)
    }

    pub fn values(&self) -> &[Metric] {
        &self.values
    }

    pub fn snapshot(&self) -> Option<&MetricsSnapshot> {
        self.snapshot.as_ref()
    }
}

/// Time window the metric values were sampled over, in epoch seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub from: i64,
    pub to: i64,
}

/// A named, dimensioned metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metric {
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default)]
    pub values: MetricValue,
    #[serde(default)]
    pub dimensions: BTreeMap<String, String>,
}

impl Metric {
    pub fn new(name: impl Into<String>, dimensions: &[(&str, &str)], last: Option<i64>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            values: MetricValue {
                last,
                ..MetricValue::default()
            },
            dimensions: dimensions
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    /// Bucket count for the default bucket space.
    pub fn default_space_buckets(last: Option<i64>) -> Self {
        Self::new(BUCKETS_METRIC_NAME, BUCKETS_METRIC_DIMENSIONS, last)
    }

    fn has_dimensions(&self, dimensions: &[(&str, &str)]) -> bool {
        self.dimensions.len() == dimensions.len()
            && dimensions
                .iter()
                .all(|(k, v)| self.dimensions.get(*k).map(String::as_str) == Some(*v))
    }
}

/// Aggregated samples of a metric.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricValue {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub average: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<u64>,
}

impl MetricValue {
    /// Most recent sample.
    pub fn last(&self) -> Option<i64> {
        self.last
    }
}

/// Distributor section of a host info document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DistributorInfo {
    #[serde(rename = "storage-nodes", default)]
    storage_nodes: Vec<StorageNodeStats>,
}

impl DistributorInfo {
    pub fn storage_nodes(&self) -> &[StorageNodeStats] {
        &self.storage_nodes
    }

    /// Observation for a given storage node, if the distributor mentions it.
    pub fn storage_node(&self, index: u16) -> Option<&StorageNodeStats> {
        self.storage_nodes.iter().find(|node| node.index == index)
    }
}

/// What a distributor observes about one storage node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageNodeStats {
    #[serde(rename = "node-index")]
    pub index: u16,
    /// Lowest replica count among the node's buckets. Absent when the
    /// distributor has too little data to tell.
    #[serde(
        rename = "min-current-replication-factor",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub min_current_replication_factor: Option<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    const STORAGE_HOST_INFO: &str = r#"{
        "metrics": {
            "snapshot": { "from": 1494940706, "to": 1494940766 },
            "values": [
                {
                    "name": "vds.datastored.alldisks.buckets",
                    "description": "buckets managed",
                    "values": { "average": 262144.0, "count": 1, "rate": 0.016666, "last": 262144 },
                    "dimensions": {}
                },
                {
                    "name": "vds.datastored.bucket_space.buckets_total",
                    "values": { "average": 0.0, "sum": 0.0, "count": 1, "last": 0 },
                    "dimensions": { "bucketSpace": "global" }
                },
                {
                    "name": "vds.datastored.bucket_space.buckets_total",
                    "values": { "average": 129.0, "sum": 129.0, "count": 1, "last": 129 },
                    "dimensions": { "bucketSpace": "default" }
                }
            ]
        },
        "cluster-state-version": 2
    }"#;

    const DISTRIBUTOR_HOST_INFO: &str = r#"{
        "cluster-state-version": 2,
        "distributor": {
            "storage-nodes": [
                { "node-index": 0, "min-current-replication-factor": 4 },
                { "node-index": 1, "min-current-replication-factor": 3 },
                { "node-index": 3 }
            ]
        }
    }"#;

    #[test]
    fn test_parse_storage_host_info() {
        let host_info = HostInfo::from_json(STORAGE_HOST_INFO).unwrap();
        assert_eq!(host_info.cluster_state_version(), Some(2));
        assert_eq!(host_info.metrics().values().len(), 3);
        assert_eq!(
            host_info.metrics().snapshot(),
            Some(&MetricsSnapshot { from: 1494940706, to: 1494940766 })
        );

        let buckets = host_info
            .metrics()
            .value_at(BUCKETS_METRIC_NAME, BUCKETS_METRIC_DIMENSIONS)
            .unwrap();
        assert_eq!(buckets.last(), Some(129));
    }

    #[test]
    fn test_value_at_requires_exact_dimensions() {
        let host_info = HostInfo::from_json(STORAGE_HOST_INFO).unwrap();
        assert!(host_info
            .metrics()
            .value_at(BUCKETS_METRIC_NAME, &[])
            .is_none());
        assert!(host_info
            .metrics()
            .value_at("vds.datastored.alldisks.buckets", &[])
            .is_some());
        assert!(host_info
            .metrics()
            .value_at(
                BUCKETS_METRIC_NAME,
                &[("bucketSpace", "default"), ("disk", "0")]
            )
            .is_none());
    }

    #[test]
    fn test_parse_distributor_host_info() {
        let host_info = HostInfo::from_json(DISTRIBUTOR_HOST_INFO).unwrap();
        let distributor = host_info.distributor();
        assert_eq!(distributor.storage_nodes().len(), 3);
        assert_eq!(
            distributor.storage_node(1).unwrap().min_current_replication_factor,
            Some(3)
        );
        assert_eq!(
            distributor.storage_node(3).unwrap().min_current_replication_factor,
            None
        );
        assert!(distributor.storage_node(2).is_none());
    }

    #[test]
    fn test_empty_document() {
        let host_info = HostInfo::from_json("{}").unwrap();
        assert_eq!(host_info, HostInfo::default());
        assert_eq!(host_info.cluster_state_version(), None);
    }

    #[test]
    fn test_malformed_document() {
        assert!(HostInfo::from_json("{ \"cluster-state-version\": \"two\" }").is_err());
        assert!(HostInfo::from_json("not json").is_err());
    }

    #[test]
    fn test_builder_survives_json() {
        let host_info = HostInfo::default()
            .with_cluster_state_version(5)
            .with_metric(Metric::default_space_buckets(Some(0)))
            .with_storage_node(2, Some(2));

        let decoded = HostInfo::from_json(&host_info.to_json().unwrap()).unwrap();
        assert_eq!(decoded, host_info);
    }
}
