// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! The uniform remote-call convention between simulated components.
//!
//! Components do not call each other's methods directly: a caller asks the
//! target to build the timed task servicing a [`Call`] and awaits it through
//! the event loop, which is where dispatch delays and suspension happen. The
//! controller and every group manager implement the same single-signature
//! trait.

use mirage_engine::BoxTask;

use crate::controller::CreateSpec;
use crate::workload::Request;

/// Identifier of a device group.
pub type GroupId = u32;

/// Payloads exchanged between simulated components.
#[derive(Debug, Clone)]
pub enum Value {
    Unit,
    Response(Response),
}

/// Completion record of one served request.
#[derive(Debug, Clone)]
pub struct Response {
    pub model: String,
    /// Virtual time at which the last pipeline stage drained.
    pub finished_at: f64,
}

/// The operations a component can be asked to perform remotely.
#[derive(Debug, Clone)]
pub enum Call {
    HandleRequest { request: Request },
    CreateReplica { model: String, spec: CreateSpec },
    DeleteReplica { model: String },
}

impl Call {
    pub fn name(&self) -> &'static str {
        match self {
            Call::HandleRequest { .. } => "handle_request",
            Call::CreateReplica { .. } => "create_replica",
            Call::DeleteReplica { .. } => "delete_replica",
        }
    }
}

/// A component addressable through the single asynchronous call signature.
pub trait Remote {
    /// Build the timed task servicing `call`. The caller schedules it on the
    /// event loop (typically with a dispatch delay) and awaits its result.
    fn submit(&self, call: Call) -> BoxTask<Value>;
}
