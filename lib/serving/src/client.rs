// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Experiment client.
//!
//! The client turns a workload into timed submissions and collects per-
//! request start/finish timestamps once the event loop drains. Statistics,
//! SLO attainment and CSV output are computed by the experiment driver from
//! the returned trace; this façade only measures.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use mirage_engine::{EventLoop, SimTask, Step, TaskContext, Wake};

use crate::config::SimConfig;
use crate::controller::Controller;
use crate::remote::{Call, Remote, Value};
use crate::workload::{Request, Workload};

/// Submits workloads against one controller.
pub struct Client {
    controller: Controller,
    http_overhead: f64,
}

/// Live measurement buffers of one submitted workload.
pub struct TraceHandle {
    start: Rc<RefCell<Vec<f64>>>,
    finish: Rc<RefCell<Vec<f64>>>,
    failures: Rc<Cell<usize>>,
}

impl TraceHandle {
    /// Snapshot the measurements. Requests that failed (or have not finished
    /// yet) read as `NaN` in `finish`.
    pub fn into_trace(self) -> RequestTrace {
        RequestTrace {
            start: self.start.borrow().clone(),
            finish: self.finish.borrow().clone(),
            failures: self.failures.get(),
        }
    }
}

/// Start/finish timestamps of a completed workload, index-aligned with the
/// workload's requests.
#[derive(Debug, Clone)]
pub struct RequestTrace {
    pub start: Vec<f64>,
    pub finish: Vec<f64>,
    pub failures: usize,
}

impl RequestTrace {
    /// End-to-end latencies of the successful requests, in workload order.
    pub fn latencies(&self) -> Vec<f64> {
        self.start
            .iter()
            .zip(&self.finish)
            .filter(|(s, f)| s.is_finite() && f.is_finite())
            .map(|(s, f)| f - s)
            .collect()
    }
}

impl Client {
    pub fn new(controller: Controller, config: &SimConfig) -> Self {
        Self {
            controller,
            http_overhead: config.http_overhead,
        }
    }

    /// Schedule one timed submission per arrival. The loop still has to be
    /// driven ([`Client::wait_all`]) before the trace is complete.
    pub fn submit_workload(&self, lp: &mut EventLoop<Value>, workload: &Workload) -> TraceHandle {
        let n = workload.len();
        let handle = TraceHandle {
            start: Rc::new(RefCell::new(vec![f64::NAN; n])),
            finish: Rc::new(RefCell::new(vec![f64::NAN; n])),
            failures: Rc::new(Cell::new(0)),
        };
        for (idx, (arrival, request)) in workload.iter().enumerate() {
            lp.schedule(
                arrival,
                SubmitOne {
                    controller: self.controller.clone(),
                    request: request.clone(),
                    idx,
                    http_overhead: self.http_overhead,
                    start: handle.start.clone(),
                    finish: handle.finish.clone(),
                    failures: handle.failures.clone(),
                },
            );
        }
        tracing::info!(requests = n, "workload submitted");
        handle
    }

    /// Run the event loop to completion.
    pub fn wait_all(&self, lp: &mut EventLoop<Value>) {
        lp.run();
    }
}

/// One submission: stamp the start, call the controller with the HTTP
/// overhead, stamp the finish.
struct SubmitOne {
    controller: Controller,
    request: Request,
    idx: usize,
    http_overhead: f64,
    start: Rc<RefCell<Vec<f64>>>,
    finish: Rc<RefCell<Vec<f64>>>,
    failures: Rc<Cell<usize>>,
}

impl SimTask<Value> for SubmitOne {
    fn resume(&mut self, cx: &mut TaskContext<'_>, wake: Wake<Value>) -> anyhow::Result<Step<Value>> {
        match wake {
            Wake::Start => {
                self.start.borrow_mut()[self.idx] = cx.now();
                Ok(Step::Call {
                    at: cx.now() + self.http_overhead,
                    child: self.controller.submit(Call::HandleRequest {
                        request: self.request.clone(),
                    }),
                })
            }
            Wake::Call(result) => {
                match result {
                    Ok(_) => self.finish.borrow_mut()[self.idx] = cx.now(),
                    Err(err) => {
                        self.failures.set(self.failures.get() + 1);
                        tracing::warn!(request = %self.request.id, error = %err, "request failed");
                    }
                }
                Ok(Step::Done(Value::Unit))
            }
            Wake::Resumed => panic!("submission resumed out of order"),
        }
    }
}
