// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Request and workload inputs.
//!
//! Trace generation (gamma processes, replayed production traces, ...) is
//! external; by the time a workload reaches the simulator it is a flat list
//! of arrival timestamps with one request each.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One inference request. Carries no mutable scheduling state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub model: String,
    pub id: Uuid,
    /// Opaque payload forwarded to the replica; the simulator never reads it.
    pub data: Option<serde_json::Value>,
}

impl Request {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            id: Uuid::new_v4(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }
}

/// A timed request trace, sorted by arrival.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Workload {
    arrivals: Vec<f64>,
    requests: Vec<Request>,
}

impl Workload {
    pub fn new(arrivals: Vec<f64>, requests: Vec<Request>) -> anyhow::Result<Self> {
        anyhow::ensure!(
            arrivals.len() == requests.len(),
            "workload has {} arrivals for {} requests",
            arrivals.len(),
            requests.len()
        );
        anyhow::ensure!(
            arrivals.windows(2).all(|w| w[0] <= w[1]),
            "workload arrivals must be sorted"
        );
        anyhow::ensure!(
            arrivals.iter().all(|t| t.is_finite() && *t >= 0.0),
            "workload arrivals must be finite and non-negative"
        );
        Ok(Self { arrivals, requests })
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (f64, &Request)> {
        self.arrivals.iter().copied().zip(self.requests.iter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_mismatched_lengths() {
        let err = Workload::new(vec![0.0, 1.0], vec![Request::new("m")]).unwrap_err();
        assert!(err.to_string().contains("2 arrivals for 1 requests"));
    }

    #[test]
    fn rejects_unsorted_arrivals() {
        let requests = vec![Request::new("m"), Request::new("m")];
        assert!(Workload::new(vec![2.0, 1.0], requests).is_err());
    }

    #[test]
    fn iterates_in_arrival_order() {
        let requests = vec![Request::new("a"), Request::new("b")];
        let workload = Workload::new(vec![0.5, 1.5], requests).unwrap();
        let models: Vec<_> = workload.iter().map(|(t, r)| (t, r.model.clone())).collect();
        assert_eq!(models, vec![(0.5, "a".to_string()), (1.5, "b".to_string())]);
    }
}
