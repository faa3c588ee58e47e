// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! End-to-end exercises of the virtual-time scheduler.

use std::cell::RefCell;
use std::rc::Rc;

use mirage_engine::{task_fn, EventLoop, SimTask, Step, TaskContext, Wake};

/// One simulated pipeline worker: repeatedly holds its stream for a fixed
/// service time, `count` times.
fn worker(stream: &'static str, service: f64, count: u32) -> impl SimTask<u32> {
    let mut done = 0;
    task_fn(move |_cx: &mut TaskContext<'_>, _wake: Wake<u32>| {
        if done == count {
            return Ok(Step::Done(done));
        }
        done += 1;
        Ok(Step::hold_stream(stream, service))
    })
}

#[test]
fn independent_loops_do_not_share_state() {
    let mut a = EventLoop::<u32>::new();
    let mut b = EventLoop::<u32>::new();
    a.schedule(0.0, worker("gpu0", 2.0, 3));
    b.schedule(0.0, worker("gpu0", 5.0, 1));
    a.run();
    b.run();
    assert_eq!(a.stream_mark("gpu0"), 6.0);
    assert_eq!(b.stream_mark("gpu0"), 5.0);
    assert_eq!(a.now(), 6.0);
    assert_eq!(b.now(), 5.0);
}

#[test]
fn loop_can_be_topped_up_and_rerun() {
    let mut lp = EventLoop::<u32>::new();
    lp.schedule(1.0, worker("gpu0", 1.0, 1));
    lp.run();
    assert_eq!(lp.now(), 2.0);

    // More work issued after the first drain continues on the same timeline.
    lp.schedule(10.0, worker("gpu0", 4.0, 1));
    lp.run();
    assert_eq!(lp.now(), 14.0);
    assert_eq!(lp.stream_mark("gpu0"), 14.0);
}

#[test]
fn identical_runs_produce_identical_timelines() {
    let trace = |n: u32| {
        let mut lp = EventLoop::<u32>::new();
        let log = Rc::new(RefCell::new(Vec::new()));
        for tag in 0..n {
            let log = log.clone();
            let mut held = false;
            lp.schedule(
                0.1 * f64::from(tag % 3),
                task_fn(move |cx: &mut TaskContext<'_>, _wake: Wake<u32>| {
                    if held {
                        log.borrow_mut().push((tag, cx.now()));
                        return Ok(Step::Done(tag));
                    }
                    held = true;
                    Ok(Step::hold_stream(
                        if tag % 2 == 0 { "even" } else { "odd" },
                        0.05,
                    ))
                }),
            );
        }
        lp.run();
        Rc::try_unwrap(log).unwrap().into_inner()
    };
    assert_eq!(trace(16), trace(16));
}
