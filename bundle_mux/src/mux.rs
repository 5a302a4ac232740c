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

use crate::sim::SimulationCallbacks;
use crate::vcd::{VcdComponent, VcdWriter};
use crate::{ElasticBuffer, Error, MuxConfiguration, OutputEvent, SampleEvent, SelectorState};
use ::vcd as vcd_ext;
use std::cell::RefCell;
use std::rc::Rc;

/// What the multiplexer drives during one tick.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct StepOutput {
    /// `ready` towards each bundle producer. An offered event was transferred
    /// iff its bundle's flag is set.
    pub bundle_ready: Vec<bool>,
    /// The event transferred to the consumer, if any (`valid & ready`).
    pub output: Option<OutputEvent>,
}

/// Multiplexes `N` bundle streams into one channel stream.
///
/// It consists of:
///   - one elastic buffer per bundle, one bundle frame deep
///   - the round-robin selector picking the bundle being drained
///   - the output stage, gating the selected buffer's front with the
///     consumer's `ready`
///
/// Bundles are drained strictly in index order, one whole bundle frame at a
/// time. A bundle without data stalls the output even if later bundles have
/// frames queued.
#[derive(Clone, Debug)]
pub struct BundleMultiplexer {
    config: MuxConfiguration,
    buffers: Box<[ElasticBuffer]>,
    selector: SelectorState,
}

impl BundleMultiplexer {
    pub fn new(config: MuxConfiguration) -> Result<Self, Error> {
        config.validate()?;
        let buffers = (0..config.bundle_count)
            .map(|bundle| ElasticBuffer::new(&format!("fifo{}", bundle), &config))
            .collect::<Result<Box<[_]>, Error>>()?;
        log::debug!(
            "bundle multiplexer: {} bundles x {} channels, {} bit samples",
            config.bundle_count,
            config.channels_per_bundle,
            config.sample_width
        );
        Ok(Self {
            config,
            buffers,
            selector: SelectorState::new(),
        })
    }

    pub fn config(&self) -> &MuxConfiguration {
        &self.config
    }

    pub fn selector(&self) -> SelectorState {
        self.selector
    }

    pub fn bundle_count(&self) -> usize {
        self.buffers.len()
    }

    pub fn buffer(&self, bundle: usize) -> Result<&ElasticBuffer, Error> {
        self.buffers.get(bundle).ok_or(Error::InvalidBundle(bundle))
    }

    /// Head of a bundle's buffer, as the output stage sees it this tick.
    pub fn front(&self, bundle: usize) -> Result<Option<SampleEvent>, Error> {
        Ok(self.buffer(bundle)?.front())
    }

    /// `ready` towards a bundle producer for the current tick.
    pub fn input_ready(&self, bundle: usize) -> Result<bool, Error> {
        Ok(self.buffer(bundle)?.ready())
    }

    /// The event this tick would deliver to a ready consumer.
    ///
    /// Lets a consumer whose `ready` depends on the channel number (such as a
    /// demultiplexer) compute its `ready` before the tick is stepped.
    pub fn peek(&self) -> Option<OutputEvent> {
        let front = self.buffers[self.selector.current_bundle].front();
        self.selector.next(front.as_ref(), true, &self.config).1
    }

    /// No buffered events left in any bundle.
    pub fn is_idle(&self) -> bool {
        self.buffers.iter().all(|buffer| buffer.is_empty())
    }

    /// Runs the multiplexer for one tick.
    ///
    /// `inputs[b]` is what bundle `b`'s producer offers this tick (`Some` means
    /// `valid`); `consumer_ready` is the consumer's `ready`.
    ///
    /// All outputs and the next state are computed from the state at the start
    /// of the tick; the state is then committed at once. An event written this
    /// tick therefore becomes visible at its buffer's front on the next tick
    /// at the earliest, and a buffer that was full at the start of the tick
    /// does not accept a write even if its front is consumed.
    pub fn step(
        &mut self,
        inputs: &[Option<SampleEvent>],
        consumer_ready: bool,
        callbacks: &mut SimulationCallbacks,
    ) -> Result<StepOutput, Error> {
        if inputs.len() != self.buffers.len() {
            return Err(Error::InputCountMismatch {
                expected: self.buffers.len(),
                actual: inputs.len(),
            });
        }

        // Phase 1: combinational evaluation against the current state.
        let bundle_ready: Vec<bool> = self.buffers.iter().map(|b| b.ready()).collect();
        let current_bundle = self.selector.current_bundle;
        let front = self.buffers[current_bundle].front();
        let (next_selector, output) =
            self.selector
                .next(front.as_ref(), consumer_ready, &self.config);
        log::trace!(
            "mux: selector {:?}, front {:?}, consumer ready {}, output {:?}",
            self.selector,
            front,
            consumer_ready,
            output
        );

        callbacks.vcd(|writer| {
            self.vcd_trace_combinational(
                Rc::clone(&writer),
                inputs,
                &bundle_ready,
                consumer_ready,
                output.as_ref(),
            )
        });

        // Phase 2: commit.
        if output.is_some() {
            self.buffers[current_bundle].pop();
        }
        for (bundle, input) in inputs.iter().enumerate() {
            if let Some(event) = input {
                if bundle_ready[bundle] {
                    self.buffers[bundle].push(event);
                }
            }
        }
        if next_selector != self.selector {
            if next_selector.current_bundle == 0 {
                log::debug!("mux: round complete");
            } else {
                log::debug!(
                    "mux: bundle {} done, next bundle {}",
                    current_bundle,
                    next_selector.current_bundle
                );
            }
        }
        self.selector = next_selector;

        callbacks.vcd(|writer| self.vcd_trace_registers(writer));

        Ok(StepOutput {
            bundle_ready,
            output,
        })
    }

    fn vcd_trace_combinational(
        &self,
        writer: Rc<RefCell<VcdWriter>>,
        inputs: &[Option<SampleEvent>],
        bundle_ready: &[bool],
        consumer_ready: bool,
        output: Option<&OutputEvent>,
    ) {
        {
            let _vcd_inputs_scope = VcdWriter::managed_trace_scope(Rc::clone(&writer), "inputs");
            let mut writer = writer.borrow_mut();
            for (bundle, (input, ready)) in inputs.iter().zip(bundle_ready).enumerate() {
                writer.change_vector_immediately(
                    format!("\\valid[{}]", bundle).as_str(),
                    u64::from(input.is_some()),
                    1,
                );
                writer.change_vector_immediately(
                    format!("\\ready[{}]", bundle).as_str(),
                    u64::from(*ready),
                    1,
                );
            }
        }
        let _vcd_out_scope = VcdWriter::managed_trace_scope(Rc::clone(&writer), "out");
        let mut writer = writer.borrow_mut();
        let channel_bits = self.config.channel_bits().max(1);
        writer.change_vector_immediately("ready", u64::from(consumer_ready), 1);
        writer.change_vector_immediately("valid", u64::from(output.is_some()), 1);
        // payload and channel number keep their last value while not valid
        if let Some(output) = output {
            writer.change_vector_immediately(
                "payload",
                output.payload as u64,
                self.config.sample_width,
            );
            writer.change_vector_immediately(
                "channel_nr",
                output.channel_nr as u64,
                channel_bits,
            );
        }
        writer.change_vector_immediately("first", u64::from(output.map_or(false, |o| o.first)), 1);
        writer.change_vector_immediately("last", u64::from(output.map_or(false, |o| o.last)), 1);
    }

    fn vcd_trace_registers(&self, writer: Rc<RefCell<VcdWriter>>) {
        {
            let _vcd_selector_scope =
                VcdWriter::managed_trace_scope(Rc::clone(&writer), "selector");
            let mut writer = writer.borrow_mut();
            writer.change_vector("current_bundle", self.selector.current_bundle as u64, 32);
            writer.change_vector("channel_base", self.selector.channel_base as u64, 32);
        }
        for buffer in self.buffers.iter() {
            buffer.vcd_trace(Rc::clone(&writer));
        }
    }
}

impl VcdComponent for BundleMultiplexer {
    fn vcd_write_scope(&self, writer: Rc<RefCell<VcdWriter>>) {
        {
            let _vcd_selector_scope =
                VcdWriter::managed_decl_scope(Rc::clone(&writer), "selector");
            writer.borrow_mut().add_integer_var::<u32>("current_bundle");
            writer.borrow_mut().add_integer_var::<u32>("channel_base");
        }
        {
            let _vcd_inputs_scope = VcdWriter::managed_decl_scope(Rc::clone(&writer), "inputs");
            for bundle in 0..self.bundle_count() {
                writer.borrow_mut().add_var(
                    vcd_ext::VarType::Wire,
                    1,
                    format!("\\valid[{}]", bundle).as_str(),
                    None,
                );
                writer.borrow_mut().add_var(
                    vcd_ext::VarType::Wire,
                    1,
                    format!("\\ready[{}]", bundle).as_str(),
                    None,
                );
            }
        }
        for buffer in self.buffers.iter() {
            buffer.vcd_write_scope(Rc::clone(&writer));
        }
        let _vcd_out_scope = VcdWriter::managed_decl_scope(Rc::clone(&writer), "out");
        let mut writer = writer.borrow_mut();
        writer.add_var(vcd_ext::VarType::Wire, 1, "ready", None);
        writer.add_var(vcd_ext::VarType::Wire, 1, "valid", None);
        writer.add_var(
            vcd_ext::VarType::Wire,
            self.config.sample_width,
            "payload",
            None,
        );
        writer.add_var(
            vcd_ext::VarType::Wire,
            self.config.channel_bits().max(1),
            "channel_nr",
            None,
        );
        writer.add_var(vcd_ext::VarType::Wire, 1, "first", None);
        writer.add_var(vcd_ext::VarType::Wire, 1, "last", None);
    }

    fn vcd_init(&self, writer: Rc<RefCell<VcdWriter>>) {
        {
            let _vcd_selector_scope =
                VcdWriter::managed_trace_scope(Rc::clone(&writer), "selector");
            let mut writer = writer.borrow_mut();
            writer.change_vector_immediately(
                "current_bundle",
                self.selector.current_bundle as u64,
                32,
            );
            writer.change_vector_immediately("channel_base", self.selector.channel_base as u64, 32);
        }
        for buffer in self.buffers.iter() {
            buffer.vcd_init(Rc::clone(&writer));
        }
        let _vcd_out_scope = VcdWriter::managed_trace_scope(Rc::clone(&writer), "out");
        let mut writer = writer.borrow_mut();
        for signal in ["ready", "valid", "first", "last"] {
            writer.change_vector_immediately(signal, 0, 1);
        }
        writer.change_vector_immediately("payload", 0, self.config.sample_width);
        writer.change_vector_immediately("channel_nr", 0, self.config.channel_bits().max(1));
    }
}
