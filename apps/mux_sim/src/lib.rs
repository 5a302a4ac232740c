// Copyright 2023 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Drives a bundle multiplexer with ADAT-like bundle sources.
//!
//! Every bundle source sends `rounds` bundle frames, one sample per tick (or
//! one every `pacing` ticks). The consumer follows the selected ready pattern.
//! The run stops once every frame has been delivered, or after `max_cycles`.
use anyhow::Context;
use bundle_mux::{
    Cycle, MuxConfiguration, MuxSimulation, Pacing, ReadyPattern, VcdWriter, Violation,
};
use std::path::PathBuf;

mod modes;

pub use modes::ConsumerMode;

#[derive(Clone, Debug)]
pub struct RunOptions {
    pub config: MuxConfiguration,
    pub rounds: u32,
    pub max_cycles: usize,
    pub consumer: ConsumerMode,
    pub seed: u64,
    pub pacing: usize,
    pub vcd: Option<PathBuf>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            config: MuxConfiguration::default(),
            rounds: 4,
            max_cycles: 10_000,
            consumer: ConsumerMode::Always,
            seed: 0,
            pacing: 1,
            vcd: None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Summary {
    pub cycles: Cycle,
    pub events: usize,
    pub rounds: usize,
    /// Tick at which the last channel of each round was delivered.
    pub round_ends: Vec<Cycle>,
    pub violations: Vec<Violation>,
    pub drained: bool,
}

impl Summary {
    pub fn is_ok(&self) -> bool {
        self.drained && self.violations.is_empty()
    }
}

pub fn ready_pattern(mode: ConsumerMode, seed: u64) -> ReadyPattern {
    match mode {
        ConsumerMode::Always => ReadyPattern::Always,
        ConsumerMode::Periodic => ReadyPattern::Periodic { on: 3, off: 1 },
        ConsumerMode::Random => ReadyPattern::Random {
            probability: 0.5,
            seed,
        },
    }
}

pub fn simulate_app(options: &RunOptions) -> anyhow::Result<Summary> {
    let mut sim = MuxSimulation::new(options.config, ready_pattern(options.consumer, options.seed))?;
    if let Some(path) = &options.vcd {
        let writer = VcdWriter::new(path.clone())
            .with_context(|| format!("Failed to create VCD file {}", path.display()))?;
        sim.enable_vcd(writer);
    }
    for bundle in 0..options.config.bundle_count {
        sim.source_mut(bundle)?
            .set_pacing(Pacing::Every(options.pacing.max(1)));
    }
    for round in 0..options.rounds {
        sim.push_round(round * options.config.bundle_count as u32);
    }
    let drained = sim.run_until_idle(options.max_cycles)?;
    sim.finish();
    if !drained {
        log::warn!(
            "simulation did not drain within {} cycles",
            options.max_cycles
        );
    }

    let round_ends: Vec<Cycle> = sim
        .sink()
        .received()
        .iter()
        .filter(|(_, event)| event.last)
        .map(|(cycle, _)| *cycle)
        .collect();
    for (round, end) in round_ends.iter().enumerate() {
        log::info!("round {} complete at cycle {}", round, end);
    }
    let monitor = sim.sink().monitor();
    Ok(Summary {
        cycles: sim.cycle(),
        events: sim.sink().received().len(),
        rounds: monitor.rounds(),
        round_ends,
        violations: monitor.violations().to_vec(),
        drained,
    })
}
