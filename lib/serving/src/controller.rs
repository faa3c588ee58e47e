// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! The serving controller.
//!
//! Top-level registry and router. Structural mutations (`register_model`,
//! `create_replica`) are serialized per model name through the engine's
//! keyed exclusive sections; `handle_request` takes no section — it only
//! reads the structurally stable group list and mutates an independent
//! in-flight counter, which is safe because the scheduler is single-threaded
//! and the list only changes under the section.
//!
//! Routing is least-loaded: the replica group with the smallest in-flight
//! count wins, first-encountered group on ties. Every dispatch pays a
//! per-call overhead drawn from |N(mean, std)| on a seeded generator, so a
//! run is a deterministic function of its inputs and seed.

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;
use std::sync::Arc;

use mirage_engine::{task_fn, BoxTask, SimTask, Step, TaskContext, Wake};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::SimConfig;
use crate::error::ServingError;
use crate::group::{DeviceTopology, GroupManager};
use crate::profiling::{ParallelConfig, ProfilingResult};
use crate::remote::{Call, GroupId, Remote, Value};
use crate::workload::Request;

/// Everything needed to instantiate replicas of a model.
#[derive(Debug, Clone)]
pub struct CreateSpec {
    pub profile: Arc<ProfilingResult>,
    pub parallel_config: ParallelConfig,
}

impl CreateSpec {
    pub fn new(profile: Arc<ProfilingResult>, parallel_config: ParallelConfig) -> Self {
        Self {
            profile,
            parallel_config,
        }
    }

    /// The spec actually used on one group, with an optional per-group
    /// parallel-config override applied.
    fn with_override(&self, config: Option<ParallelConfig>) -> Self {
        Self {
            profile: self.profile.clone(),
            parallel_config: config.unwrap_or(self.parallel_config),
        }
    }
}

struct ModelInfo {
    spec: CreateSpec,
    /// Groups holding a replica, in creation order. Mutated only under the
    /// model's exclusive section.
    group_ids: Vec<GroupId>,
}

struct GroupInfo {
    manager: GroupManager,
    /// Requests currently in flight on this group.
    queue_size: usize,
}

struct ControllerState {
    models: HashMap<String, ModelInfo>,
    groups: HashMap<GroupId, GroupInfo>,
    rng: StdRng,
    config: SimConfig,
}

impl ControllerState {
    fn dispatch_overhead(&mut self) -> f64 {
        let z = standard_normal(&mut self.rng);
        (self.config.dispatch_overhead_mean + self.config.dispatch_overhead_std * z).abs()
    }
}

/// Box-Muller transform over the seeded generator.
fn standard_normal(rng: &mut StdRng) -> f64 {
    let u1: f64 = rng.random();
    let u2: f64 = rng.random();
    let r = (-2.0 * u1.max(f64::MIN_POSITIVE).ln()).sqrt();
    let theta = 2.0 * std::f64::consts::PI * u2;
    r * theta.cos()
}

/// Top-level registry and request router. Cheap to clone; clones share the
/// registry.
#[derive(Clone)]
pub struct Controller {
    state: Rc<RefCell<ControllerState>>,
}

impl Controller {
    pub fn new(config: SimConfig) -> Self {
        let rng = StdRng::seed_from_u64(config.seed);
        Self {
            state: Rc::new(RefCell::new(ControllerState {
                models: HashMap::new(),
                groups: HashMap::new(),
                rng,
                config,
            })),
        }
    }

    /// Launch a device group. Synchronous: groups are created during
    /// experiment setup, before simulated traffic exists.
    pub fn create_group(
        &self,
        group_id: GroupId,
        topology: DeviceTopology,
    ) -> Result<GroupManager, ServingError> {
        let mut state = self.state.borrow_mut();
        if state.groups.contains_key(&group_id) {
            return Err(ServingError::GroupAlreadyExists(group_id));
        }
        tracing::info!(group = group_id, devices = topology.num_devices(), "create group manager");
        let manager = GroupManager::new(group_id, topology);
        state.groups.insert(
            group_id,
            GroupInfo {
                manager: manager.clone(),
                queue_size: 0,
            },
        );
        Ok(manager)
    }

    /// Task registering `name`. With `override_existing`, tears down every
    /// replica of the previous registration (one delete call per held group,
    /// in order) before overwriting it; without, a duplicate registration
    /// fails.
    pub fn register_model(
        &self,
        name: impl Into<String>,
        spec: CreateSpec,
        override_existing: bool,
    ) -> BoxTask<Value> {
        Box::new(RegisterModel {
            state: self.state.clone(),
            name: name.into(),
            spec: Some(spec),
            override_existing,
            phase: RegisterPhase::Init,
        })
    }

    /// Task placing a replica of `name` on `group_id`, with an optional
    /// per-group parallel-config override.
    pub fn create_replica(
        &self,
        name: impl Into<String>,
        group_id: GroupId,
        config_override: Option<ParallelConfig>,
    ) -> BoxTask<Value> {
        Box::new(CreateReplica {
            state: self.state.clone(),
            name: name.into(),
            group_id,
            config_override,
            phase: CreatePhase::Init,
        })
    }

    /// Task routing one request to the least-loaded replica group.
    pub fn handle_request(&self, request: Request) -> BoxTask<Value> {
        Box::new(HandleRequest {
            state: self.state.clone(),
            request: Some(request),
            dispatched: None,
        })
    }
}

impl Remote for Controller {
    fn submit(&self, call: Call) -> BoxTask<Value> {
        match call {
            Call::HandleRequest { request } => self.handle_request(request),
            other => failing(ServingError::UnsupportedCall {
                target: "controller",
                call: other.name(),
            }),
        }
    }
}

/// A task that fails on first resume. Used for calls a component does not
/// serve.
fn failing(err: ServingError) -> BoxTask<Value> {
    let mut err = Some(err);
    Box::new(task_fn(
        move |_cx: &mut TaskContext<'_>, _wake: Wake<Value>| -> anyhow::Result<Step<Value>> {
            Err(err.take().expect("failing task resumed twice").into())
        },
    ))
}

enum RegisterPhase {
    Init,
    Locked,
    Deleting { remaining: VecDeque<GroupId> },
}

struct RegisterModel {
    state: Rc<RefCell<ControllerState>>,
    name: String,
    spec: Option<CreateSpec>,
    override_existing: bool,
    phase: RegisterPhase,
}

impl RegisterModel {
    /// Overwrite the registration (with an empty group list) and leave the
    /// model's exclusive section.
    fn commit(&mut self, cx: &mut TaskContext<'_>) -> Step<Value> {
        let spec = self.spec.take().expect("registration committed twice");
        tracing::info!(model = %self.name, config = %spec.parallel_config, "register model");
        self.state.borrow_mut().models.insert(
            self.name.clone(),
            ModelInfo {
                spec,
                group_ids: Vec::new(),
            },
        );
        cx.release(self.name.clone());
        Step::Done(Value::Unit)
    }

    /// Issue the next teardown call, or commit once every held group has
    /// dropped its replica.
    fn next_delete(
        &mut self,
        cx: &mut TaskContext<'_>,
        mut remaining: VecDeque<GroupId>,
    ) -> anyhow::Result<Step<Value>> {
        match remaining.pop_front() {
            Some(group_id) => {
                let manager = self
                    .state
                    .borrow()
                    .groups
                    .get(&group_id)
                    .expect("registered model held a vanished group")
                    .manager
                    .clone();
                self.phase = RegisterPhase::Deleting { remaining };
                Ok(Step::Call {
                    at: cx.now(),
                    child: manager.submit(Call::DeleteReplica {
                        model: self.name.clone(),
                    }),
                })
            }
            None => Ok(self.commit(cx)),
        }
    }
}

impl SimTask<Value> for RegisterModel {
    fn resume(&mut self, cx: &mut TaskContext<'_>, wake: Wake<Value>) -> anyhow::Result<Step<Value>> {
        let phase = std::mem::replace(&mut self.phase, RegisterPhase::Init);
        match (phase, wake) {
            (RegisterPhase::Init, Wake::Start) => {
                self.phase = RegisterPhase::Locked;
                Ok(Step::Acquire(self.name.clone()))
            }
            (RegisterPhase::Locked, Wake::Resumed) => {
                let held: Option<Vec<GroupId>> = self
                    .state
                    .borrow()
                    .models
                    .get(&self.name)
                    .map(|model| model.group_ids.clone());
                match held {
                    Some(_) if !self.override_existing => {
                        cx.release(self.name.clone());
                        Err(ServingError::ModelAlreadyRegistered(self.name.clone()).into())
                    }
                    Some(group_ids) => {
                        tracing::info!(
                            model = %self.name,
                            replicas = group_ids.len(),
                            "override registration, tearing down replicas"
                        );
                        self.next_delete(cx, group_ids.into())
                    }
                    None => Ok(self.commit(cx)),
                }
            }
            (RegisterPhase::Deleting { remaining }, Wake::Call(result)) => {
                if let Err(err) = result {
                    cx.release(self.name.clone());
                    return Err(err);
                }
                self.next_delete(cx, remaining)
            }
            _ => panic!("register_model resumed out of order"),
        }
    }
}

#[derive(Clone, Copy)]
enum CreatePhase {
    Init,
    Locked,
    Creating,
}

struct CreateReplica {
    state: Rc<RefCell<ControllerState>>,
    name: String,
    group_id: GroupId,
    config_override: Option<ParallelConfig>,
    phase: CreatePhase,
}

impl SimTask<Value> for CreateReplica {
    fn resume(&mut self, cx: &mut TaskContext<'_>, wake: Wake<Value>) -> anyhow::Result<Step<Value>> {
        match (self.phase, wake) {
            (CreatePhase::Init, Wake::Start) => {
                self.phase = CreatePhase::Locked;
                Ok(Step::Acquire(self.name.clone()))
            }
            (CreatePhase::Locked, Wake::Resumed) => {
                let (manager, spec) = {
                    let mut state = self.state.borrow_mut();
                    if !state.models.contains_key(&self.name) {
                        drop(state);
                        cx.release(self.name.clone());
                        return Err(ServingError::ModelNotFound(self.name.clone()).into());
                    }
                    let Some(group) = state.groups.get(&self.group_id) else {
                        drop(state);
                        cx.release(self.name.clone());
                        return Err(ServingError::GroupNotFound(self.group_id).into());
                    };
                    let manager = group.manager.clone();
                    let model = state.models.get_mut(&self.name).expect("checked above");
                    if model.group_ids.contains(&self.group_id) {
                        drop(state);
                        cx.release(self.name.clone());
                        return Err(ServingError::ReplicaAlreadyExists {
                            model: self.name.clone(),
                            group: self.group_id,
                        }
                        .into());
                    }
                    let spec = model.spec.with_override(self.config_override);
                    model.group_ids.push(self.group_id);
                    (manager, spec)
                };
                tracing::info!(model = %self.name, group = self.group_id, "create replica");
                // The registry mutation is done; the instantiation call runs
                // outside the section.
                cx.release(self.name.clone());
                self.phase = CreatePhase::Creating;
                Ok(Step::Call {
                    at: cx.now(),
                    child: manager.submit(Call::CreateReplica {
                        model: self.name.clone(),
                        spec,
                    }),
                })
            }
            (CreatePhase::Creating, Wake::Call(result)) => {
                result?;
                Ok(Step::Done(Value::Unit))
            }
            _ => panic!("create_replica resumed out of order"),
        }
    }
}

struct HandleRequest {
    state: Rc<RefCell<ControllerState>>,
    /// Present until the request is forwarded to a group.
    request: Option<Request>,
    /// Group charged for the in-flight request, until the call completes.
    dispatched: Option<GroupId>,
}

impl SimTask<Value> for HandleRequest {
    fn resume(&mut self, cx: &mut TaskContext<'_>, wake: Wake<Value>) -> anyhow::Result<Step<Value>> {
        match wake {
            Wake::Start => {
                let request = self.request.take().expect("request dispatched twice");
                let mut state = self.state.borrow_mut();
                let Some(model) = state.models.get(&request.model) else {
                    return Err(ServingError::ModelNotFound(request.model).into());
                };
                if model.group_ids.is_empty() {
                    return Err(ServingError::NoReplica(request.model).into());
                }

                // Least-loaded selection; first-encountered group wins ties.
                let group_ids = model.group_ids.clone();
                let mut selected = group_ids[0];
                let mut min_size = usize::MAX;
                for group_id in group_ids {
                    let size = state
                        .groups
                        .get(&group_id)
                        .expect("registered model held a vanished group")
                        .queue_size;
                    if size < min_size {
                        min_size = size;
                        selected = group_id;
                    }
                }

                let delay = state.dispatch_overhead();
                let group = state.groups.get_mut(&selected).expect("selected above");
                group.queue_size += 1;
                let manager = group.manager.clone();
                tracing::debug!(
                    model = %request.model,
                    group = selected,
                    queue = group.queue_size,
                    delay,
                    "dispatch request"
                );
                drop(state);

                self.dispatched = Some(selected);
                Ok(Step::Call {
                    at: cx.now() + delay,
                    child: manager.submit(Call::HandleRequest { request }),
                })
            }
            Wake::Call(result) => {
                let group_id = self.dispatched.take().expect("no dispatch in flight");
                let mut state = self.state.borrow_mut();
                let group = state
                    .groups
                    .get_mut(&group_id)
                    .expect("dispatched group vanished");
                debug_assert!(group.queue_size > 0, "in-flight counter underflow");
                // Restored whether or not the downstream call succeeded, so
                // the in-flight count never leaks.
                group.queue_size -= 1;
                drop(state);
                Ok(Step::Done(result?))
            }
            Wake::Resumed => panic!("handle_request resumed out of order"),
        }
    }
}
