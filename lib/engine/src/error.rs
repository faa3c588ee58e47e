// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

/// Rejections the engine hands back to an individual task.
///
/// These fail the offending call only; scheduler invariant violations (a
/// timestamp behind the clock, a result slot fulfilled twice, a section
/// released while not held) are bugs in the engine itself and panic instead.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("duration must be non-negative, got {duration}")]
    NegativeDuration { duration: f64 },

    #[error("stream hold arity mismatch: {names} names vs {durations} durations")]
    StreamArityMismatch { names: usize, durations: usize },
}
