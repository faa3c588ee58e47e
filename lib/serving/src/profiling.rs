// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Profiling data consumed from the placement side.
//!
//! Stage latencies and weight memory are measured offline on real hardware
//! and arrive here as static tables keyed by parallel configuration. The
//! simulator never generates these numbers, it only replays them.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Degrees of data, operator and pipeline parallelism of one replica.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct ParallelConfig {
    pub dp: usize,
    pub op: usize,
    pub pp: usize,
}

impl ParallelConfig {
    pub fn new(dp: usize, op: usize, pp: usize) -> Self {
        Self { dp, op, pp }
    }

    /// Total device streams one replica occupies.
    pub fn num_devices(&self) -> usize {
        self.dp * self.op * self.pp
    }

    /// Device streams held concurrently by a single pipeline stage.
    pub fn lanes_per_stage(&self) -> usize {
        self.dp * self.op
    }
}

impl std::fmt::Display for ParallelConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "dp{}-op{}-pp{}", self.dp, self.op, self.pp)
    }
}

/// Measurements for one parallel configuration of one model.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParallelProfile {
    /// Per-stage latency in seconds, keyed by batch size.
    pub latency: BTreeMap<usize, Vec<f64>>,
    /// Per-stage weight memory in bytes.
    pub weight_mem: Vec<u64>,
}

/// The full profiling table of one model.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProfilingResult {
    pub configs: BTreeMap<ParallelConfig, ParallelProfile>,
}

impl ProfilingResult {
    /// Table with a single parallel configuration.
    pub fn with_config(config: ParallelConfig, profile: ParallelProfile) -> Self {
        let mut configs = BTreeMap::new();
        configs.insert(config, profile);
        Self { configs }
    }

    pub fn insert(&mut self, config: ParallelConfig, profile: ParallelProfile) {
        self.configs.insert(config, profile);
    }

    pub fn get(&self, config: &ParallelConfig) -> Option<&ParallelProfile> {
        self.configs.get(config)
    }

    /// Load a table exported as JSON `[[config, profile], ...]` pairs.
    pub fn from_json_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let entries: Vec<(ParallelConfig, ParallelProfile)> = serde_json::from_str(&content)?;
        Ok(Self {
            configs: entries.into_iter().collect(),
        })
    }
}

/// Cluster-wide resources visible to the placement policy.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ClusterEnv {
    pub num_devices: usize,
    /// Per-device weight memory budget in bytes.
    pub mem_budget: u64,
}

/// Per-model demand handed to the placement policy.
#[derive(Debug, Clone)]
pub struct ModelData {
    pub name: String,
    /// Mean request arrival rate in requests per second.
    pub rate: f64,
    /// Latency objective the experiment driver judges this model's requests
    /// against; not consulted by the simulator itself.
    pub slo: Option<f64>,
    pub profile: Arc<ProfilingResult>,
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case::single_device(ParallelConfig::new(1, 1, 1), 1, 1)]
    #[case::square_mesh(ParallelConfig::new(2, 2, 4), 4, 16)]
    #[case::operator_heavy(ParallelConfig::new(1, 4, 2), 4, 8)]
    fn device_counts_follow_the_config(
        #[case] config: ParallelConfig,
        #[case] lanes: usize,
        #[case] total: usize,
    ) {
        assert_eq!(config.lanes_per_stage(), lanes);
        assert_eq!(config.num_devices(), total);
    }

    #[test]
    fn config_display_names_each_degree() {
        assert_eq!(ParallelConfig::new(2, 2, 4).to_string(), "dp2-op2-pp4");
    }

    #[test]
    fn tables_round_trip_through_json_pairs() {
        let config = ParallelConfig::new(1, 1, 2);
        let mut profile = ParallelProfile::default();
        profile.latency.insert(1, vec![0.1, 0.2]);
        profile.weight_mem = vec![1 << 30, 1 << 30];
        let table = ProfilingResult::with_config(config, profile);

        let entries: Vec<(ParallelConfig, ParallelProfile)> =
            table.configs.clone().into_iter().collect();
        let json = serde_json::to_string(&entries).unwrap();
        let parsed: Vec<(ParallelConfig, ParallelProfile)> = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].0, config);
        assert_eq!(parsed[0].1.latency[&1], vec![0.1, 0.2]);
    }
}
