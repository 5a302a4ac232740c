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

//! Simulation of a multiplexer between bundle producers and a consumer.
//!
//! The simulation owns the multiplexer, one `BundleSource` per bundle and a
//! `ConsumerSink`, and steps all of them once per tick. Sources and sink
//! follow the ready/valid handshake: a transfer happens on a tick where both
//! sides agree, and an offered event is held until it is transferred.

use crate::vcd::{VcdWriter, DEFAULT_TOP_MODULE};
use crate::{BundleMultiplexer, Cycle, Error, MuxConfiguration, OutputEvent, SampleEvent};
use log::trace;
use rand::Rng;
use rand_core::SeedableRng;
use rand_xoshiro::Xoshiro256StarStar;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::rc::Rc;

#[derive(Default)]
pub struct SimulationCallbacks {
    vcd_writer: Option<Rc<RefCell<VcdWriter>>>,
}

impl SimulationCallbacks {
    pub fn get_vcd_writer(&mut self) -> Option<Rc<RefCell<VcdWriter>>> {
        self.vcd_writer.as_ref().map(Rc::clone)
    }

    pub fn with_vcd_writer(writer: VcdWriter) -> Self {
        Self {
            vcd_writer: Some(Rc::new(RefCell::new(writer))),
        }
    }

    pub fn vcd<F>(&mut self, f: F)
    where
        F: FnOnce(Rc<RefCell<VcdWriter>>),
    {
        if let Some(writer) = self.get_vcd_writer() {
            f(writer);
        }
    }
}

/// Called after every tick with the tick number and the multiplexer state.
pub type Inspect = Box<dyn FnMut(Cycle, &BundleMultiplexer)>;

/// When a source offers a new event.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Pacing {
    /// On every tick.
    Continuous,
    /// On ticks that are a multiple of the given period, like a receiver
    /// delivering samples at a lower rate than the system clock.
    Every(usize),
}

/// Producer of one bundle stream.
///
/// Once an event has been offered (`valid`), it is offered again on every
/// tick until the multiplexer takes it, regardless of pacing.
#[derive(Clone, Debug)]
pub struct BundleSource {
    bundle: usize,
    channels_per_bundle: usize,
    pending: VecDeque<SampleEvent>,
    pacing: Pacing,
    holding: bool,
    sent: usize,
}

impl BundleSource {
    pub fn new(bundle: usize, config: &MuxConfiguration) -> Self {
        Self {
            bundle,
            channels_per_bundle: config.channels_per_bundle,
            pending: VecDeque::new(),
            pacing: Pacing::Continuous,
            holding: false,
            sent: 0,
        }
    }

    pub fn bundle(&self) -> usize {
        self.bundle
    }

    pub fn set_pacing(&mut self, pacing: Pacing) {
        self.pacing = pacing;
    }

    pub fn push_event(&mut self, event: SampleEvent) {
        self.pending.push_back(event);
    }

    /// Queues one bundle frame; sub-channel `i` carries `(sample << 8) + i`.
    pub fn push_frame(&mut self, sample: u32) {
        for channel in 0..self.channels_per_bundle {
            self.push_event(SampleEvent::framed(
                (sample << 8) + channel as u32,
                channel,
                self.channels_per_bundle,
            ));
        }
    }

    /// Events not transferred yet.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Events transferred so far.
    pub fn sent(&self) -> usize {
        self.sent
    }

    /// The event driven this tick, `None` when `valid` is low.
    pub fn offer(&mut self, cycle: Cycle) -> Option<SampleEvent> {
        let paced = match self.pacing {
            Pacing::Continuous => true,
            Pacing::Every(period) => period <= 1 || cycle % period == 0,
        };
        if !(self.holding || paced) {
            return None;
        }
        let event = self.pending.front().copied();
        self.holding = event.is_some();
        event
    }

    /// Ends the tick; `transferred` is `valid & ready` for this source.
    pub fn complete(&mut self, transferred: bool) {
        if transferred {
            self.pending.pop_front();
            self.holding = false;
            self.sent += 1;
        }
    }
}

/// When the consumer asserts `ready`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ReadyPattern {
    Always,
    /// `on` ready ticks followed by `off` stalled ticks, repeating.
    Periodic { on: usize, off: usize },
    /// Ready with the given probability on each tick; reproducible for a seed.
    Random { probability: f64, seed: u64 },
}

impl Default for ReadyPattern {
    fn default() -> Self {
        Self::Always
    }
}

/// Consumer of the multiplexed stream. Records every transfer and checks
/// the stream framing as it goes.
pub struct ConsumerSink {
    pattern: ReadyPattern,
    rng: Xoshiro256StarStar,
    received: Vec<(Cycle, OutputEvent)>,
    monitor: FrameMonitor,
}

impl ConsumerSink {
    pub fn new(pattern: ReadyPattern, config: &MuxConfiguration) -> Self {
        let seed = match pattern {
            ReadyPattern::Random { seed, .. } => seed,
            _ => 0,
        };
        Self {
            pattern,
            rng: Xoshiro256StarStar::seed_from_u64(seed),
            received: Vec::new(),
            monitor: FrameMonitor::new(config),
        }
    }

    pub fn ready(&mut self, cycle: Cycle) -> bool {
        match self.pattern {
            ReadyPattern::Always => true,
            ReadyPattern::Periodic { on, off } => on + off == 0 || cycle % (on + off) < on,
            ReadyPattern::Random { probability, .. } => {
                self.rng.gen_bool(probability.clamp(0.0, 1.0))
            }
        }
    }

    pub fn accept(&mut self, cycle: Cycle, event: OutputEvent) {
        trace!("sink: cycle {} received {}", cycle, event);
        self.monitor.observe(cycle, &event);
        self.received.push((cycle, event));
    }

    pub fn received(&self) -> &[(Cycle, OutputEvent)] {
        &self.received
    }

    pub fn events(&self) -> impl Iterator<Item = &OutputEvent> + '_ {
        self.received.iter().map(|(_, event)| event)
    }

    pub fn monitor(&self) -> &FrameMonitor {
        &self.monitor
    }
}

/// A framing error seen on the output stream.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Violation {
    ChannelOutOfOrder {
        cycle: Cycle,
        expected: usize,
        actual: usize,
    },
    MisplacedFirst {
        cycle: Cycle,
        channel_nr: usize,
        first: bool,
    },
    MisplacedLast {
        cycle: Cycle,
        channel_nr: usize,
        last: bool,
    },
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::ChannelOutOfOrder {
                cycle,
                expected,
                actual,
            } => write!(
                f,
                "cycle {}: expected channel {}, got channel {}",
                cycle, expected, actual
            ),
            Self::MisplacedFirst {
                cycle,
                channel_nr,
                first,
            } => write!(
                f,
                "cycle {}: first = {} on channel {}",
                cycle, first, channel_nr
            ),
            Self::MisplacedLast {
                cycle,
                channel_nr,
                last,
            } => write!(
                f,
                "cycle {}: last = {} on channel {}",
                cycle, last, channel_nr
            ),
        }
    }
}

/// Checks the framing of a channel stream: channel numbers count up from 0
/// within a round, `first` is set exactly on channel 0 and `last` exactly on
/// the final channel.
#[derive(Clone, Debug)]
pub struct FrameMonitor {
    channel_count: usize,
    expected_channel: usize,
    rounds: usize,
    violations: Vec<Violation>,
}

impl FrameMonitor {
    pub fn new(config: &MuxConfiguration) -> Self {
        Self {
            channel_count: config.channel_count(),
            expected_channel: 0,
            rounds: 0,
            violations: Vec::new(),
        }
    }

    fn report(&mut self, violation: Violation) {
        log::warn!("frame monitor: {}", violation);
        self.violations.push(violation);
    }

    pub fn observe(&mut self, cycle: Cycle, event: &OutputEvent) {
        if event.channel_nr != self.expected_channel {
            self.report(Violation::ChannelOutOfOrder {
                cycle,
                expected: self.expected_channel,
                actual: event.channel_nr,
            });
        }
        if event.first != (event.channel_nr == 0) {
            self.report(Violation::MisplacedFirst {
                cycle,
                channel_nr: event.channel_nr,
                first: event.first,
            });
        }
        let final_channel = event.channel_nr + 1 == self.channel_count;
        if event.last != final_channel {
            self.report(Violation::MisplacedLast {
                cycle,
                channel_nr: event.channel_nr,
                last: event.last,
            });
        }
        // resynchronize on what was actually received
        if event.last || final_channel {
            self.rounds += 1;
            self.expected_channel = 0;
        } else {
            self.expected_channel = event.channel_nr + 1;
        }
    }

    /// Completed rounds.
    pub fn rounds(&self) -> usize {
        self.rounds
    }

    pub fn violations(&self) -> &[Violation] {
        &self.violations
    }

    pub fn is_clean(&self) -> bool {
        self.violations.is_empty()
    }
}

/// A multiplexer wired to its producers and consumer.
pub struct MuxSimulation {
    mux: BundleMultiplexer,
    sources: Vec<BundleSource>,
    sink: ConsumerSink,
    cycle: Cycle,
    inspect: Option<Inspect>,
    callbacks: SimulationCallbacks,
}

impl MuxSimulation {
    pub fn new(config: MuxConfiguration, pattern: ReadyPattern) -> Result<Self, Error> {
        let mux = BundleMultiplexer::new(config)?;
        let sources = (0..config.bundle_count)
            .map(|bundle| BundleSource::new(bundle, &config))
            .collect();
        Ok(Self {
            mux,
            sources,
            sink: ConsumerSink::new(pattern, &config),
            cycle: 0,
            inspect: None,
            callbacks: SimulationCallbacks::default(),
        })
    }

    /// Dumps every following tick into `writer`.
    pub fn enable_vcd(&mut self, writer: VcdWriter) {
        self.callbacks = SimulationCallbacks::with_vcd_writer(writer);
        if let Some(writer) = self.callbacks.get_vcd_writer() {
            VcdWriter::write_header(writer, &self.mux);
        }
    }

    pub fn set_inspect(&mut self, inspect: Inspect) {
        self.inspect = Some(inspect);
    }

    pub fn mux(&self) -> &BundleMultiplexer {
        &self.mux
    }

    pub fn sink(&self) -> &ConsumerSink {
        &self.sink
    }

    pub fn source(&self, bundle: usize) -> Result<&BundleSource, Error> {
        self.sources.get(bundle).ok_or(Error::InvalidBundle(bundle))
    }

    pub fn source_mut(&mut self, bundle: usize) -> Result<&mut BundleSource, Error> {
        self.sources.get_mut(bundle).ok_or(Error::InvalidBundle(bundle))
    }

    /// Queues one frame with the given sample on every bundle, in bundle order.
    pub fn push_round(&mut self, sample: u32) {
        for source in self.sources.iter_mut() {
            source.push_frame(sample + source.bundle() as u32);
        }
    }

    pub fn cycle(&self) -> Cycle {
        self.cycle
    }

    /// All queued events have been delivered to the consumer.
    pub fn is_idle(&self) -> bool {
        self.mux.is_idle() && self.sources.iter().all(|source| source.pending() == 0)
    }

    pub fn simulate_one_cycle(&mut self) -> Result<(), Error> {
        let cycle = self.cycle;
        let _vcd_trace_scope = self
            .callbacks
            .get_vcd_writer()
            .map(|writer| VcdWriter::managed_trace_scope(writer, DEFAULT_TOP_MODULE));
        self.callbacks.vcd(|writer| {
            let mut writer = writer.borrow_mut();
            writer.enter_cycle();
            writer.change_vector_immediately("sim_cycles", cycle as u64, 64);
        });

        let consumer_ready = self.sink.ready(cycle);
        let inputs: Vec<Option<SampleEvent>> = self
            .sources
            .iter_mut()
            .map(|source| source.offer(cycle))
            .collect();
        let step = self.mux.step(&inputs, consumer_ready, &mut self.callbacks)?;
        for ((source, input), ready) in self
            .sources
            .iter_mut()
            .zip(inputs.iter())
            .zip(step.bundle_ready.iter())
        {
            source.complete(input.is_some() && *ready);
        }
        if let Some(event) = step.output {
            self.sink.accept(cycle, event);
        }

        self.callbacks.vcd(|writer| writer.borrow_mut().end_cycle());
        self.cycle += 1;
        if let Some(inspect) = self.inspect.as_mut() {
            inspect(cycle, &self.mux);
        }
        Ok(())
    }

    pub fn run(&mut self, cycles: usize) -> Result<(), Error> {
        for _ in 0..cycles {
            self.simulate_one_cycle()?;
        }
        Ok(())
    }

    /// Steps until every queued event has been delivered, for at most
    /// `max_cycles` ticks. Returns whether the simulation drained.
    pub fn run_until_idle(&mut self, max_cycles: usize) -> Result<bool, Error> {
        for _ in 0..max_cycles {
            if self.is_idle() {
                return Ok(true);
            }
            self.simulate_one_cycle()?;
        }
        Ok(self.is_idle())
    }

    /// Writes the final timestamp of the VCD dump, if any.
    pub fn finish(&mut self) {
        self.callbacks
            .vcd(|writer| writer.borrow_mut().flush_after_simulation());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SelectorState;

    fn init_logger() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    #[test]
    fn source_holds_offer_until_transferred() {
        let config = MuxConfiguration::default();
        let mut source = BundleSource::new(1, &config);
        source.set_pacing(Pacing::Every(4));
        source.push_frame(1);
        assert_eq!(source.pending(), 8);
        assert_eq!(source.offer(1), None);
        let head = source.offer(4).unwrap();
        assert_eq!(head, SampleEvent::framed(0x100, 0, 8));
        source.complete(false);
        // held on an unpaced tick
        assert_eq!(source.offer(5), Some(head));
        source.complete(true);
        assert_eq!(source.offer(6), None);
        assert_eq!(source.offer(8).map(|e| e.sub_channel), Some(1));
        assert_eq!(source.sent(), 1);
        assert_eq!(source.pending(), 7);
    }

    #[test]
    fn periodic_ready_pattern() {
        let config = MuxConfiguration::default();
        let mut sink = ConsumerSink::new(ReadyPattern::Periodic { on: 2, off: 1 }, &config);
        let pattern: Vec<bool> = (0..6).map(|cycle| sink.ready(cycle)).collect();
        assert_eq!(pattern, vec![true, true, false, true, true, false]);
    }

    #[test]
    fn random_ready_pattern_is_reproducible() {
        let config = MuxConfiguration::default();
        let pattern = ReadyPattern::Random {
            probability: 0.5,
            seed: 7,
        };
        let mut a = ConsumerSink::new(pattern, &config);
        let mut b = ConsumerSink::new(pattern, &config);
        let a: Vec<bool> = (0..64).map(|cycle| a.ready(cycle)).collect();
        let b: Vec<bool> = (0..64).map(|cycle| b.ready(cycle)).collect();
        assert_eq!(a, b);
        assert!(a.iter().any(|r| *r));
        assert!(a.iter().any(|r| !*r));
    }

    #[test]
    fn monitor_accepts_well_formed_rounds() {
        let config = MuxConfiguration::with_bundles(2);
        let mut monitor = FrameMonitor::new(&config);
        for round in 0..3 {
            for channel_nr in 0..16 {
                monitor.observe(
                    round * 16 + channel_nr,
                    &OutputEvent {
                        payload: 0,
                        channel_nr,
                        first: channel_nr == 0,
                        last: channel_nr == 15,
                    },
                );
            }
        }
        assert!(monitor.is_clean());
        assert_eq!(monitor.rounds(), 3);
    }

    #[test]
    fn monitor_reports_violations() {
        let config = MuxConfiguration::with_bundles(2);
        let mut monitor = FrameMonitor::new(&config);
        let event = |channel_nr, first, last| OutputEvent {
            payload: 0,
            channel_nr,
            first,
            last,
        };
        monitor.observe(0, &event(0, true, false));
        monitor.observe(1, &event(2, false, false));
        monitor.observe(2, &event(3, true, false));
        monitor.observe(3, &event(4, false, true));
        assert_eq!(
            monitor.violations(),
            &[
                Violation::ChannelOutOfOrder {
                    cycle: 1,
                    expected: 1,
                    actual: 2
                },
                Violation::MisplacedFirst {
                    cycle: 2,
                    channel_nr: 3,
                    first: true
                },
                Violation::MisplacedLast {
                    cycle: 3,
                    channel_nr: 4,
                    last: true
                },
            ]
        );
        assert_eq!(monitor.rounds(), 1);
        assert_eq!(
            monitor.violations()[0].to_string(),
            "cycle 1: expected channel 1, got channel 2"
        );
    }

    #[test]
    fn example_round() {
        init_logger();
        let mut sim = MuxSimulation::new(MuxConfiguration::default(), ReadyPattern::Always).unwrap();
        sim.push_round(0);
        assert!(sim.run_until_idle(200).unwrap());
        let events: Vec<&OutputEvent> = sim.sink().events().collect();
        assert_eq!(events.len(), 32);
        for (i, event) in events.iter().enumerate() {
            let bundle = (i / 8) as u32;
            let channel = (i % 8) as u32;
            assert_eq!(event.payload, (bundle << 8) + channel);
            assert_eq!(event.channel_nr, i);
            assert_eq!(event.first, i == 0);
            assert_eq!(event.last, i == 31);
        }
        assert!(sim.sink().monitor().is_clean());
        assert_eq!(sim.sink().monitor().rounds(), 1);
        assert_eq!(sim.mux().selector(), SelectorState::new());
    }

    #[test]
    fn continuous_sources_stream_at_full_rate() {
        let mut sim = MuxSimulation::new(MuxConfiguration::default(), ReadyPattern::Always).unwrap();
        for sample in 0..4 {
            sim.push_round(sample * 4);
        }
        assert!(sim.run_until_idle(1000).unwrap());
        let received = sim.sink().received();
        assert_eq!(received.len(), 128);
        // one tick to fill bundle 0, then one event per tick
        assert_eq!(received[0].0, 1);
        assert_eq!(received[127].0, 128);
        assert_eq!(sim.sink().monitor().rounds(), 4);
        assert!(sim.sink().monitor().is_clean());
    }

    #[test]
    fn inspect_sees_every_tick() {
        let mut sim = MuxSimulation::new(MuxConfiguration::default(), ReadyPattern::Always).unwrap();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let ticks = Rc::clone(&seen);
        sim.set_inspect(Box::new(move |cycle, mux| {
            assert_eq!(
                mux.selector().channel_base,
                mux.selector().current_bundle * mux.config().channels_per_bundle
            );
            ticks.borrow_mut().push(cycle);
        }));
        sim.push_round(0);
        sim.run(50).unwrap();
        assert_eq!(*seen.borrow(), (0..50).collect::<Vec<_>>());
        assert_eq!(sim.cycle(), 50);
    }

    #[test]
    fn vcd_dump_of_a_round() {
        let mut path = std::env::temp_dir();
        path.push(format!("bundle_mux_sim_{}.vcd", std::process::id()));
        let mut sim = MuxSimulation::new(MuxConfiguration::with_bundles(2), ReadyPattern::Always)
            .unwrap();
        sim.enable_vcd(VcdWriter::new(path.clone()).unwrap());
        sim.push_round(0);
        assert!(sim.run_until_idle(100).unwrap());
        sim.finish();
        drop(sim);
        let dump = std::fs::read_to_string(&path).unwrap();
        assert!(dump.contains("$scope module fifo1 $end"));
        assert!(dump.contains("$scope module selector $end"));
        assert!(dump.contains("channel_nr"));
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn unknown_source() {
        let mut sim = MuxSimulation::new(MuxConfiguration::default(), ReadyPattern::Always).unwrap();
        assert!(sim.source_mut(3).is_ok());
        assert_eq!(sim.source(4).err(), Some(Error::InvalidBundle(4)));
    }
}
