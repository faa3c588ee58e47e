// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Mirage Serving
//!
//! The dispatch layer of the serving-cluster simulator: a [`Controller`]
//! routes requests across the replica groups of each registered model, each
//! group's [`GroupManager`] hosts the replicas placed on its devices, and an
//! [`Executable`] turns a replica's static stage-latency profile into holds
//! on the engine's device streams. A [`Client`] façade submits a timed
//! workload and collects start/finish timestamps once the event loop drains.
//!
//! Placement itself is external: solvers implement [`PlacementPolicy`] and
//! this crate consumes the resulting assignment through
//! `Controller::create_group` / `create_replica` calls. Everything runs on
//! the deterministic virtual clock of `mirage-engine`; no wall-clock time or
//! real parallelism is involved anywhere.

pub mod client;
pub mod config;
pub mod controller;
pub mod error;
pub mod executable;
pub mod group;
pub mod logging;
pub mod placement;
pub mod profiling;
pub mod remote;
pub mod workload;

pub use client::{Client, RequestTrace, TraceHandle};
pub use config::SimConfig;
pub use controller::{Controller, CreateSpec};
pub use error::ServingError;
pub use executable::Executable;
pub use group::{DeviceTopology, GroupManager};
pub use placement::{Placement, PlacementError, PlacementPolicy};
pub use profiling::{ClusterEnv, ModelData, ParallelConfig, ParallelProfile, ProfilingResult};
pub use remote::{Call, GroupId, Remote, Response, Value};
pub use workload::{Request, Workload};
