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

//! Cycle-level model of a bundle-to-channel stream multiplexer.
//!
//! Several input bundles, each carrying a fixed number of sub-channels per
//! frame, are buffered independently and drained in strict round-robin bundle
//! order into a single stream of channel samples tagged with a global channel
//! number. Every component is stepped once per clock tick; all handshakes are
//! ready/valid.

mod config;
mod demux;
mod error;
mod fifo;
mod mux;
mod selector;
mod sim;
mod stream;
mod vcd;

// type to use for cycles
pub type Cycle = usize;

pub use crate::config::{bit_size, range_bits, MuxConfiguration};
pub use crate::demux::{BundleDemultiplexer, DemuxOutput};
pub use crate::error::Error;
pub use crate::fifo::ElasticBuffer;
pub use crate::mux::{BundleMultiplexer, StepOutput};
pub use crate::selector::SelectorState;
pub use crate::sim::{
    BundleSource, ConsumerSink, FrameMonitor, Inspect, MuxSimulation, Pacing, ReadyPattern,
    SimulationCallbacks, Violation,
};
pub use crate::stream::{OutputEvent, SampleEvent};
pub use crate::vcd::{ChangeValue, VcdComponent, VcdWriter};
