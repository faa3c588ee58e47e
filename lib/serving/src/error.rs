// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::profiling::ParallelConfig;
use crate::remote::GroupId;

/// Rejections of individual dispatch-layer calls.
///
/// Each of these fails the offending call only; the run keeps going. They
/// travel through task results as `anyhow::Error` and can be recovered with
/// `downcast_ref`.
#[derive(Debug, thiserror::Error)]
pub enum ServingError {
    #[error("model {0} is already registered")]
    ModelAlreadyRegistered(String),

    #[error("group {0} is already launched")]
    GroupAlreadyExists(GroupId),

    #[error("model {0} is not registered")]
    ModelNotFound(String),

    #[error("no replica of model {0} is created")]
    NoReplica(String),

    #[error("group {0} does not exist")]
    GroupNotFound(GroupId),

    #[error("model {model} already has a replica on group {group}")]
    ReplicaAlreadyExists { model: String, group: GroupId },

    #[error("model {model} has no replica on group {group}")]
    ReplicaNotFound { model: String, group: GroupId },

    #[error("profile of model {model} has no entry for {config} at batch size {batch}")]
    MissingProfile {
        model: String,
        config: ParallelConfig,
        batch: usize,
    },

    #[error("device topology of group {group} does not fit {config} for model {model}")]
    TopologyMismatch {
        model: String,
        group: GroupId,
        config: ParallelConfig,
    },

    #[error("profile of model {model} lists {stages} stage latencies for {config}, expected {expected}")]
    MalformedProfile {
        model: String,
        config: ParallelConfig,
        stages: usize,
        expected: usize,
    },

    #[error("{target} does not serve {call} calls")]
    UnsupportedCall {
        target: &'static str,
        call: &'static str,
    },
}
