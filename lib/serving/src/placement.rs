// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Contract with external placement solvers.
//!
//! The simulator consumes a finished assignment; the ILP and greedy solvers
//! that produce one live outside this workspace and implement
//! [`PlacementPolicy`] against these types.

use serde::{Deserialize, Serialize};

use crate::profiling::{ClusterEnv, ModelData, ParallelConfig};

/// An assignment of models to device groups.
///
/// `group_models[g]` holds indices into the solver's `model_datas` input for
/// every model replicated on group `g`; `group_configs[g]` is the parallel
/// configuration every replica on that group runs with.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Placement {
    pub group_configs: Vec<ParallelConfig>,
    pub group_models: Vec<Vec<usize>>,
    /// The solver's objective value, for experiment bookkeeping.
    pub objective: f64,
}

#[derive(Debug, thiserror::Error)]
pub enum PlacementError {
    /// No assignment satisfies the per-device memory budget. Callers may
    /// retry with a larger budget; the solver never silently downgrades to a
    /// partial assignment.
    #[error("no feasible placement under the memory budget of {mem_budget} bytes")]
    Infeasible { mem_budget: u64 },
}

/// Implemented by external placement solvers.
pub trait PlacementPolicy {
    fn solve_placement(
        &self,
        model_datas: &[ModelData],
        cluster_env: &ClusterEnv,
    ) -> Result<Placement, PlacementError>;
}
