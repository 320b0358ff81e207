// SPDX-FileCopyrightText: 2026 Bruno Meilick
// SPDX-License-Identifier: LicenseRef-Proteus-FreeUse-NoCopy-NoDerivatives
//
// All rights reserved.
//
// This file is part of Proteus and is proprietary software.
// Unauthorized copying, modification, or distribution is prohibited.

use std::time::Duration;

use criterion::Criterion;
use pprof::criterion::{Output, PProfProfiler};

const ENV_PREFIX: &str = "PROTEUS_BENCH_";

fn var<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(format!("{ENV_PREFIX}{key}"))
        .ok()
        .and_then(|raw| raw.trim().parse::<T>().ok())
}

/// Run tuning read from `PROTEUS_BENCH_*`.
///
/// `PROFILE_HZ=0` turns the flamegraph profiler off; disk saves get `IO_FACTOR` times the
/// measurement window since rename and fsync latency is noisy.
#[derive(Debug, Clone, Copy)]
pub struct BenchEnv {
    sample_size: usize,
    warm_up: Duration,
    measurement: Duration,
    io_factor: u32,
    profile_hz: Option<i32>,
}

impl BenchEnv {
    pub fn from_env() -> Self {
        let profile_hz = var::<i32>("PROFILE_HZ").unwrap_or(100);
        Self {
            sample_size: var("SAMPLE_SIZE").unwrap_or(50).clamp(10, 200),
            warm_up: Duration::from_secs(var("WARMUP_SECS").unwrap_or(2).clamp(1, 60)),
            measurement: Duration::from_secs(var("MEASUREMENT_SECS").unwrap_or(4).clamp(1, 120)),
            io_factor: var("IO_FACTOR").unwrap_or(2).clamp(1, 10),
            profile_hz: (profile_hz > 0).then(|| profile_hz.min(1000)),
        }
    }

    pub fn io_measurement(&self) -> Duration {
        self.measurement * self.io_factor
    }

    pub fn criterion(&self) -> Criterion {
        let criterion = Criterion::default()
            .sample_size(self.sample_size)
            .warm_up_time(self.warm_up)
            .measurement_time(self.measurement);
        match self.profile_hz {
            Some(hz) => criterion.with_profiler(PProfProfiler::new(hz, Output::Flamegraph(None))),
            None => criterion,
        }
    }
}

pub fn criterion() -> Criterion {
    BenchEnv::from_env().criterion()
}
