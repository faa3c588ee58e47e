// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Pipeline executables.
//!
//! An executable is one replica of one model, bound to the device streams of
//! its group. Serving a request means walking the pipeline stages in order
//! and holding every lane of a stage for that stage's profiled latency; the
//! stage completes when its slowest lane drains, and the next stage starts
//! only then.

use crate::controller::CreateSpec;
use crate::error::ServingError;
use crate::group::DeviceTopology;
use crate::profiling::ParallelConfig;
use crate::remote::GroupId;

/// Requests are served one at a time in this simulator.
const BATCH_SIZE: usize = 1;

/// A replica instantiated on a device group.
#[derive(Debug)]
pub struct Executable {
    model: String,
    parallel_config: ParallelConfig,
    /// Latency of each pipeline stage, seconds.
    stage_latency: Vec<f64>,
    /// Device streams each stage holds, one lane list per stage.
    stage_streams: Vec<Vec<String>>,
}

impl Executable {
    /// Bind `spec` to the group's devices, validating that the profile and
    /// the topology actually fit the parallel configuration.
    pub fn new(
        model: &str,
        group: GroupId,
        spec: &CreateSpec,
        topology: &DeviceTopology,
    ) -> Result<Self, ServingError> {
        let config = spec.parallel_config;
        let missing = || ServingError::MissingProfile {
            model: model.to_string(),
            config,
            batch: BATCH_SIZE,
        };
        let profile = spec.profile.get(&config).ok_or_else(missing)?;
        let stage_latency = profile.latency.get(&BATCH_SIZE).ok_or_else(missing)?.clone();

        if stage_latency.len() != config.pp {
            return Err(ServingError::MalformedProfile {
                model: model.to_string(),
                config,
                stages: stage_latency.len(),
                expected: config.pp,
            });
        }
        let lanes = config.lanes_per_stage();
        if topology.stages.len() != config.pp
            || topology.stages.iter().any(|stage| stage.len() != lanes)
        {
            return Err(ServingError::TopologyMismatch {
                model: model.to_string(),
                group,
                config,
            });
        }

        Ok(Self {
            model: model.to_string(),
            parallel_config: config,
            stage_latency,
            stage_streams: topology.stages.clone(),
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn parallel_config(&self) -> ParallelConfig {
        self.parallel_config
    }

    /// Number of pipeline stages.
    pub fn stages(&self) -> usize {
        self.stage_latency.len()
    }

    /// The streams and durations stage `stage` occupies: every lane is held
    /// for the full stage latency.
    pub(crate) fn stage_hold(&self, stage: usize) -> (Vec<String>, Vec<f64>) {
        let streams = self.stage_streams[stage].clone();
        let durations = vec![self.stage_latency[stage]; streams.len()];
        (streams, durations)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::profiling::{ParallelProfile, ProfilingResult};

    fn spec(config: ParallelConfig, latency: Vec<f64>) -> CreateSpec {
        let mut profile = ParallelProfile::default();
        profile.latency.insert(1, latency);
        CreateSpec::new(
            Arc::new(ProfilingResult::with_config(config, profile)),
            config,
        )
    }

    #[test]
    fn binds_stages_to_topology_lanes() {
        let config = ParallelConfig::new(2, 1, 2);
        let topology = DeviceTopology::mesh(3, 2, 2);
        let exec = Executable::new("bert", 3, &spec(config, vec![0.1, 0.3]), &topology).unwrap();
        assert_eq!(exec.stages(), 2);
        let (streams, durations) = exec.stage_hold(1);
        assert_eq!(streams, vec!["g3.s1.d0", "g3.s1.d1"]);
        assert_eq!(durations, vec![0.3, 0.3]);
    }

    #[test]
    fn rejects_profile_without_the_config() {
        let registered = ParallelConfig::new(1, 1, 1);
        let requested = ParallelConfig::new(1, 1, 2);
        let mut spec = spec(registered, vec![0.1]);
        spec.parallel_config = requested;
        let err = Executable::new("bert", 0, &spec, &DeviceTopology::mesh(0, 2, 1)).unwrap_err();
        assert!(matches!(err, ServingError::MissingProfile { .. }));
    }

    #[test]
    fn rejects_wrong_stage_count_in_profile() {
        let config = ParallelConfig::new(1, 1, 2);
        let err = Executable::new(
            "bert",
            0,
            &spec(config, vec![0.1]),
            &DeviceTopology::mesh(0, 2, 1),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            ServingError::MalformedProfile {
                stages: 1,
                expected: 2,
                ..
            }
        ));
    }

    #[test]
    fn rejects_topology_with_wrong_shape() {
        let config = ParallelConfig::new(2, 1, 2);
        // One lane per stage, but the config wants two.
        let topology = DeviceTopology::mesh(0, 2, 1);
        let err = Executable::new("bert", 0, &spec(config, vec![0.1, 0.3]), &topology).unwrap_err();
        assert!(matches!(err, ServingError::TopologyMismatch { .. }));
    }
}
