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

use crate::{Error, MuxConfiguration, OutputEvent, SampleEvent};

/// What the demultiplexer drives during one tick.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct DemuxOutput {
    /// `ready` towards the channel stream producer.
    pub ready: bool,
    /// The bundle addressed and the event transferred to it, if any.
    pub output: Option<(usize, SampleEvent)>,
}

/// Splits a channel stream back into bundle streams.
///
/// Purely combinational: the high bits of the channel number select the
/// bundle, the low bits are the sub-channel. The stream only advances when
/// the addressed bundle is ready, so a stalled bundle stalls the stream.
#[derive(Clone, Debug)]
pub struct BundleDemultiplexer {
    config: MuxConfiguration,
    channel_shift: usize,
    channel_mask: usize,
}

impl BundleDemultiplexer {
    /// Sub-channels are addressed by bit slicing, so the number of channels
    /// per bundle must be a power of two.
    pub fn new(config: MuxConfiguration) -> Result<Self, Error> {
        config.validate()?;
        if !config.channels_per_bundle.is_power_of_two() {
            return Err(Error::InvalidChannelCount);
        }
        Ok(Self {
            config,
            channel_shift: config.bundle_channel_bits(),
            channel_mask: config.channels_per_bundle - 1,
        })
    }

    pub fn config(&self) -> &MuxConfiguration {
        &self.config
    }

    /// `(bundle, sub_channel)` of a global channel number.
    pub fn route(&self, channel_nr: usize) -> (usize, usize) {
        (
            channel_nr >> self.channel_shift,
            channel_nr & self.channel_mask,
        )
    }

    /// `input` is the channel stream event offered this tick (`Some` means
    /// `valid`); `bundle_ready[b]` is the `ready` of bundle `b`'s consumer.
    pub fn step(
        &self,
        input: Option<&OutputEvent>,
        bundle_ready: &[bool],
    ) -> Result<DemuxOutput, Error> {
        if bundle_ready.len() != self.config.bundle_count {
            return Err(Error::InputCountMismatch {
                expected: self.config.bundle_count,
                actual: bundle_ready.len(),
            });
        }
        let input = match input {
            Some(input) => input,
            None => return Ok(DemuxOutput::default()),
        };
        let (bundle, sub_channel) = self.route(input.channel_nr);
        let ready = bundle_ready.get(bundle).copied().unwrap_or(false);
        if !ready {
            log::trace!(
                "demux: channel {} stalled on bundle {}",
                input.channel_nr,
                bundle
            );
            return Ok(DemuxOutput::default());
        }
        Ok(DemuxOutput {
            ready,
            output: Some((
                bundle,
                SampleEvent::framed(input.payload, sub_channel, self.config.channels_per_bundle),
            )),
        })
    }
}
