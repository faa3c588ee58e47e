// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

use derive_builder::Builder;
use figment::{
    providers::{Env, Serialized},
    Figment,
};
use serde::{Deserialize, Serialize};
use validator::Validate;

/// Simulation configuration.
///
/// Overheads are in seconds of virtual time. The seed drives the dispatch
/// overhead draw and is the only source of randomness in a run: two runs
/// with the same seed and inputs produce identical timelines.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, Builder)]
#[builder(pattern = "owned", build_fn(public))]
pub struct SimConfig {
    /// Seed for the controller's dispatch-overhead draw.
    #[builder(default = "1")]
    pub seed: u64,

    /// Mean of the per-dispatch overhead distribution.
    #[validate(range(min = 0.0))]
    #[builder(default = "0.002")]
    pub dispatch_overhead_mean: f64,

    /// Standard deviation of the per-dispatch overhead distribution.
    #[validate(range(min = 0.0))]
    #[builder(default = "0.0015")]
    pub dispatch_overhead_std: f64,

    /// Fixed client-to-controller overhead per submission.
    #[validate(range(min = 0.0))]
    #[builder(default = "0.002")]
    pub http_overhead: f64,
}

impl Default for SimConfig {
    fn default() -> Self {
        SimConfigBuilder::default()
            .build()
            .expect("default SimConfig must build")
    }
}

impl SimConfig {
    pub fn builder() -> SimConfigBuilder {
        SimConfigBuilder::default()
    }

    /// Read configuration from the environment (`MIRAGE_`-prefixed variables
    /// layered over the defaults). Panics on invalid configuration.
    pub fn from_settings() -> Self {
        // Called on experiment startup, so panic is reasonable.
        let config: Self = Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Env::prefixed("MIRAGE_"))
            .extract()
            .unwrap();
        config.validate().unwrap();
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_serving_overheads() {
        let config = SimConfig::default();
        assert_eq!(config.seed, 1);
        assert_eq!(config.dispatch_overhead_mean, 0.002);
        assert_eq!(config.dispatch_overhead_std, 0.0015);
        assert_eq!(config.http_overhead, 0.002);
    }

    #[test]
    fn builder_overrides_and_validates() {
        let config = SimConfig::builder().seed(7).http_overhead(0.0).build().unwrap();
        assert_eq!(config.seed, 7);
        assert_eq!(config.http_overhead, 0.0);
        assert!(config.validate().is_ok());

        let negative = SimConfig::builder()
            .dispatch_overhead_std(-0.1)
            .build()
            .unwrap();
        assert!(negative.validate().is_err());
    }
}
