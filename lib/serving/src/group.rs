// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Group managers.
//!
//! A group manager owns one device group: the stream names of its devices
//! and the replicas placed on them. It services the remote-call surface for
//! replica lifecycle and request execution; routing decisions stay with the
//! controller.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use mirage_engine::{BoxTask, SimTask, Step, TaskContext, Wake};
use serde::{Deserialize, Serialize};

use crate::controller::CreateSpec;
use crate::error::ServingError;
use crate::executable::Executable;
use crate::remote::{Call, GroupId, Remote, Response, Value};
use crate::workload::Request;

/// The device streams of one group, one lane list per pipeline stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceTopology {
    pub stages: Vec<Vec<String>>,
}

impl DeviceTopology {
    pub fn new(stages: Vec<Vec<String>>) -> Self {
        Self { stages }
    }

    /// Canonical mesh topology: `pp` stages of `lanes` device streams each,
    /// named `g{group}.s{stage}.d{lane}`.
    pub fn mesh(group_id: GroupId, pp: usize, lanes: usize) -> Self {
        let stages = (0..pp)
            .map(|s| (0..lanes).map(|d| format!("g{group_id}.s{s}.d{d}")).collect())
            .collect();
        Self { stages }
    }

    pub fn num_devices(&self) -> usize {
        self.stages.iter().map(Vec::len).sum()
    }
}

#[derive(Debug)]
struct GroupState {
    group_id: GroupId,
    topology: DeviceTopology,
    replicas: HashMap<String, Rc<Executable>>,
}

/// Manager of one device group. Cheap to clone; clones share the group.
#[derive(Clone, Debug)]
pub struct GroupManager {
    state: Rc<RefCell<GroupState>>,
}

impl GroupManager {
    pub fn new(group_id: GroupId, topology: DeviceTopology) -> Self {
        Self {
            state: Rc::new(RefCell::new(GroupState {
                group_id,
                topology,
                replicas: HashMap::new(),
            })),
        }
    }

    pub fn group_id(&self) -> GroupId {
        self.state.borrow().group_id
    }

    pub fn has_replica(&self, model: &str) -> bool {
        self.state.borrow().replicas.contains_key(model)
    }
}

impl Remote for GroupManager {
    fn submit(&self, call: Call) -> BoxTask<Value> {
        let state = self.state.clone();
        match call {
            Call::CreateReplica { model, spec } => Box::new(CreateReplica {
                state,
                model,
                spec: Some(spec),
            }),
            Call::DeleteReplica { model } => Box::new(DeleteReplica { state, model }),
            Call::HandleRequest { request } => Box::new(ServeRequest {
                state,
                request,
                executable: None,
                next_stage: 0,
            }),
        }
    }
}

/// Instantiates a replica on the group's devices.
struct CreateReplica {
    state: Rc<RefCell<GroupState>>,
    model: String,
    spec: Option<CreateSpec>,
}

impl SimTask<Value> for CreateReplica {
    fn resume(&mut self, _cx: &mut TaskContext<'_>, _wake: Wake<Value>) -> anyhow::Result<Step<Value>> {
        let spec = self.spec.take().expect("create_replica resumed twice");
        let mut state = self.state.borrow_mut();
        if state.replicas.contains_key(&self.model) {
            return Err(ServingError::ReplicaAlreadyExists {
                model: self.model.clone(),
                group: state.group_id,
            }
            .into());
        }
        let executable = Executable::new(&self.model, state.group_id, &spec, &state.topology)?;
        tracing::info!(
            model = %self.model,
            group = state.group_id,
            config = %spec.parallel_config,
            "replica created"
        );
        state.replicas.insert(self.model.clone(), Rc::new(executable));
        Ok(Step::Done(Value::Unit))
    }
}

/// Tears down a replica.
struct DeleteReplica {
    state: Rc<RefCell<GroupState>>,
    model: String,
}

impl SimTask<Value> for DeleteReplica {
    fn resume(&mut self, _cx: &mut TaskContext<'_>, _wake: Wake<Value>) -> anyhow::Result<Step<Value>> {
        let mut state = self.state.borrow_mut();
        if state.replicas.remove(&self.model).is_none() {
            return Err(ServingError::ReplicaNotFound {
                model: self.model.clone(),
                group: state.group_id,
            }
            .into());
        }
        tracing::debug!(model = %self.model, group = state.group_id, "replica deleted");
        Ok(Step::Done(Value::Unit))
    }
}

/// Walks a request through the replica's pipeline stages.
struct ServeRequest {
    state: Rc<RefCell<GroupState>>,
    request: Request,
    executable: Option<Rc<Executable>>,
    next_stage: usize,
}

impl SimTask<Value> for ServeRequest {
    fn resume(&mut self, cx: &mut TaskContext<'_>, _wake: Wake<Value>) -> anyhow::Result<Step<Value>> {
        if self.executable.is_none() {
            let state = self.state.borrow();
            let executable = state.replicas.get(&self.request.model).cloned().ok_or_else(|| {
                ServingError::ReplicaNotFound {
                    model: self.request.model.clone(),
                    group: state.group_id,
                }
            })?;
            tracing::trace!(request = %self.request.id, group = state.group_id, "serving request");
            self.executable = Some(executable);
        }
        let executable = self.executable.as_ref().expect("resolved above");

        // Stages run strictly in sequence; each one is gated by its slowest
        // lane via the multi-stream hold.
        if self.next_stage == executable.stages() {
            return Ok(Step::Done(Value::Response(Response {
                model: executable.model().to_string(),
                finished_at: cx.now(),
            })));
        }
        let (names, durations) = executable.stage_hold(self.next_stage);
        self.next_stage += 1;
        Ok(Step::HoldStreams { names, durations })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use mirage_engine::EventLoop;

    use super::*;
    use crate::profiling::{ParallelConfig, ParallelProfile, ProfilingResult};

    fn spec(config: ParallelConfig, latency: Vec<f64>) -> CreateSpec {
        let mut profile = ParallelProfile::default();
        profile.latency.insert(1, latency);
        CreateSpec::new(
            Arc::new(ProfilingResult::with_config(config, profile)),
            config,
        )
    }

    fn downcast(err: &anyhow::Error) -> &ServingError {
        err.downcast_ref::<ServingError>().expect("serving error")
    }

    #[test]
    fn duplicate_replica_is_rejected() {
        let mut lp = EventLoop::new();
        let manager = GroupManager::new(0, DeviceTopology::mesh(0, 1, 1));
        let config = ParallelConfig::new(1, 1, 1);
        let first = lp.schedule(
            0.0,
            manager.submit(Call::CreateReplica {
                model: "bert".into(),
                spec: spec(config, vec![0.5]),
            }),
        );
        let second = lp.schedule(
            0.0,
            manager.submit(Call::CreateReplica {
                model: "bert".into(),
                spec: spec(config, vec![0.5]),
            }),
        );
        lp.run();
        assert!(first.take().unwrap().is_ok());
        let err = second.take().unwrap().unwrap_err();
        assert!(matches!(
            downcast(&err),
            ServingError::ReplicaAlreadyExists { group: 0, .. }
        ));
        assert!(manager.has_replica("bert"));
    }

    #[test]
    fn delete_of_missing_replica_is_rejected() {
        let mut lp = EventLoop::new();
        let manager = GroupManager::new(2, DeviceTopology::mesh(2, 1, 1));
        let handle = lp.schedule(
            0.0,
            manager.submit(Call::DeleteReplica {
                model: "bert".into(),
            }),
        );
        lp.run();
        let err = handle.take().unwrap().unwrap_err();
        assert!(matches!(
            downcast(&err),
            ServingError::ReplicaNotFound { group: 2, .. }
        ));
    }

    #[test]
    fn request_walks_pipeline_stages_in_sequence() {
        let mut lp = EventLoop::new();
        let manager = GroupManager::new(1, DeviceTopology::mesh(1, 2, 2));
        let config = ParallelConfig::new(2, 1, 2);
        lp.schedule(
            0.0,
            manager.submit(Call::CreateReplica {
                model: "bert".into(),
                spec: spec(config, vec![0.25, 0.75]),
            }),
        );
        let handle = lp.schedule(
            1.0,
            manager.submit(Call::HandleRequest {
                request: Request::new("bert"),
            }),
        );
        lp.run();

        let Value::Response(response) = handle.take().unwrap().unwrap() else {
            panic!("expected a response");
        };
        assert_eq!(response.model, "bert");
        assert_eq!(response.finished_at, 2.0);
        // Stage 0 lanes drained at 1.25, stage 1 lanes at 1.25 + 0.75.
        assert_eq!(lp.stream_mark("g1.s0.d0"), 1.25);
        assert_eq!(lp.stream_mark("g1.s0.d1"), 1.25);
        assert_eq!(lp.stream_mark("g1.s1.d0"), 2.0);
        assert_eq!(lp.stream_mark("g1.s1.d1"), 2.0);
    }

    #[test]
    fn concurrent_requests_overlap_across_stages() {
        let mut lp = EventLoop::new();
        let manager = GroupManager::new(0, DeviceTopology::mesh(0, 2, 1));
        let config = ParallelConfig::new(1, 1, 2);
        lp.schedule(
            0.0,
            manager.submit(Call::CreateReplica {
                model: "bert".into(),
                spec: spec(config, vec![0.25, 0.75]),
            }),
        );
        let first = lp.schedule(
            0.0,
            manager.submit(Call::HandleRequest {
                request: Request::new("bert"),
            }),
        );
        let second = lp.schedule(
            0.0,
            manager.submit(Call::HandleRequest {
                request: Request::new("bert"),
            }),
        );
        lp.run();

        // The second request's stage 0 queues behind the first's (0.25 +
        // 0.25) and its stage 1 behind the first's (1.0 + 0.75): classic
        // pipeline overlap on serialized lanes.
        let Value::Response(first) = first.take().unwrap().unwrap() else {
            panic!("expected a response");
        };
        let Value::Response(second) = second.take().unwrap().unwrap() else {
            panic!("expected a response");
        };
        assert_eq!(first.finished_at, 1.0);
        assert_eq!(second.finished_at, 1.75);
    }

    #[test]
    fn request_for_absent_replica_fails() {
        let mut lp = EventLoop::new();
        let manager = GroupManager::new(0, DeviceTopology::mesh(0, 1, 1));
        let handle = lp.schedule(
            0.0,
            manager.submit(Call::HandleRequest {
                request: Request::new("bert"),
            }),
        );
        lp.run();
        let err = handle.take().unwrap().unwrap_err();
        assert!(matches!(downcast(&err), ServingError::ReplicaNotFound { .. }));
    }
}
