// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Logging setup for experiment drivers and tests.
//!
//! Filters are read from the `MIRAGE_LOG` environment variable using the
//! usual `tracing` directive syntax (`info`, `mirage_serving=debug`, ...);
//! the default level is `info`.

use std::sync::Once;

use tracing_subscriber::EnvFilter;

static INIT: Once = Once::new();

/// Initialize the global tracing subscriber. Safe to call repeatedly; only
/// the first call takes effect.
pub fn init() {
    INIT.call_once(|| {
        let filter =
            EnvFilter::try_from_env("MIRAGE_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    });
}
