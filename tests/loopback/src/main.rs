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

//! Bundle streams multiplexed onto one channel stream and split back again.
use bundle_mux::{
    BundleDemultiplexer, BundleMultiplexer, BundleSource, Cycle, MuxConfiguration, Pacing,
    SampleEvent, SimulationCallbacks,
};
use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256StarStar;

/// Chance that a bundle consumer behind the demultiplexer is ready.
const CONSUMER_READY: f64 = 0.7;

struct Loopback {
    mux: BundleMultiplexer,
    demux: BundleDemultiplexer,
    sources: Vec<BundleSource>,
    received: Vec<Vec<SampleEvent>>,
    rng: Xoshiro256StarStar,
    cycle: Cycle,
}

impl Loopback {
    fn new(config: MuxConfiguration, seed: u64) -> anyhow::Result<Self> {
        let mux = BundleMultiplexer::new(config)?;
        let demux = BundleDemultiplexer::new(config)?;
        let sources = (0..config.bundle_count)
            .map(|bundle| BundleSource::new(bundle, &config))
            .collect();
        Ok(Self {
            mux,
            demux,
            sources,
            received: vec![Vec::new(); config.bundle_count],
            rng: Xoshiro256StarStar::seed_from_u64(seed),
            cycle: 0,
        })
    }

    fn is_idle(&self) -> bool {
        self.mux.is_idle() && self.sources.iter().all(|s| s.pending() == 0)
    }

    fn simulate_one_cycle(&mut self, callbacks: &mut SimulationCallbacks) -> anyhow::Result<()> {
        let cycle = self.cycle;
        let inputs: Vec<Option<SampleEvent>> =
            self.sources.iter_mut().map(|s| s.offer(cycle)).collect();
        let rng = &mut self.rng;
        let sink_ready: Vec<bool> = (0..self.sources.len())
            .map(|_| rng.gen_bool(CONSUMER_READY))
            .collect();

        // The demultiplexer's ready depends on the channel it is offered.
        let offered = self.mux.peek();
        let ready = self.demux.step(offered.as_ref(), &sink_ready)?.ready;
        let step = self.mux.step(&inputs, ready, callbacks)?;

        for (source, input) in self.sources.iter_mut().zip(inputs.iter()) {
            source.complete(input.is_some() && step.bundle_ready[source.bundle()]);
        }
        if let Some(event) = step.output {
            match self.demux.step(Some(&event), &sink_ready)?.output {
                Some((bundle, sample)) => self.received[bundle].push(sample),
                None => anyhow::bail!("cycle {}: {} was not routed", cycle, event),
            }
        }
        self.cycle += 1;
        Ok(())
    }
}

/// Sends `rounds` frames through every bundle and returns, per bundle, the
/// events that came out of the demultiplexer together with the cycle count.
fn run_loopback(
    config: MuxConfiguration,
    rounds: u32,
    pacing: usize,
    seed: u64,
) -> anyhow::Result<(Vec<Vec<SampleEvent>>, Cycle)> {
    let mut loopback = Loopback::new(config, seed)?;
    for source in loopback.sources.iter_mut() {
        source.set_pacing(Pacing::Every(pacing));
        for round in 0..rounds {
            source.push_frame(round * config.bundle_count as u32 + source.bundle() as u32);
        }
    }
    let max_cycles = 16 * (rounds as usize + 1) * config.channel_count() * pacing.max(1);
    let mut callbacks = SimulationCallbacks::default();
    while !loopback.is_idle() {
        if loopback.cycle >= max_cycles {
            anyhow::bail!("loopback did not drain within {} cycles", max_cycles);
        }
        loopback.simulate_one_cycle(&mut callbacks)?;
    }
    log::info!(
        "{} rounds looped back in {} cycles",
        rounds,
        loopback.cycle
    );
    Ok((loopback.received, loopback.cycle))
}

/// The frames `run_loopback` feeds into `bundle`.
fn expected_frames(config: &MuxConfiguration, bundle: usize, rounds: u32) -> Vec<SampleEvent> {
    let mut source = BundleSource::new(bundle, config);
    for round in 0..rounds {
        source.push_frame(round * config.bundle_count as u32 + bundle as u32);
    }
    let mut events = Vec::new();
    while let Some(event) = source.offer(0) {
        events.push(event);
        source.complete(true);
    }
    events
}

fn main() {
    env_logger::init();
    let config = MuxConfiguration::default();
    let (received, _) = run_loopback(config, 8, 1, 0x1234).expect("Loopback simulation failed.");
    for (bundle, events) in received.iter().enumerate() {
        assert_eq!(*events, expected_frames(&config, bundle, 8));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check(config: MuxConfiguration, rounds: u32, pacing: usize, seed: u64) {
        let (received, _) = run_loopback(config, rounds, pacing, seed).unwrap();
        assert_eq!(received.len(), config.bundle_count);
        for (bundle, events) in received.iter().enumerate() {
            assert_eq!(*events, expected_frames(&config, bundle, rounds), "bundle {}", bundle);
        }
    }

    #[test]
    fn default_configuration() {
        check(MuxConfiguration::default(), 4, 1, 1);
    }

    #[test]
    fn many_seeds() {
        for seed in 0..16 {
            check(MuxConfiguration::default(), 3, 1, seed);
        }
    }

    #[test]
    fn paced_sources() {
        check(MuxConfiguration::default(), 3, 3, 42);
    }

    #[test]
    fn other_bundle_counts() {
        for bundles in [1, 2, 3, 8] {
            check(MuxConfiguration::with_bundles(bundles), 2, 1, bundles as u64);
        }
    }

    #[test]
    fn narrow_bundles() {
        let config = MuxConfiguration {
            bundle_count: 3,
            channels_per_bundle: 2,
            sample_width: 16,
        };
        check(config, 5, 2, 7);
    }

    #[test]
    fn payloads_survive_intact() {
        let config = MuxConfiguration::default();
        let (received, _) = run_loopback(config, 2, 1, 9).unwrap();
        let payloads: Vec<u32> = received[2].iter().map(|e| e.payload).collect();
        let expected: Vec<u32> = [2u32, 6]
            .iter()
            .flat_map(|sample| (0..8).map(move |ch| (sample << 8) + ch))
            .collect();
        assert_eq!(payloads, expected);
    }
}
