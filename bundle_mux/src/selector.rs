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

use crate::{MuxConfiguration, OutputEvent, SampleEvent};

/// Round-robin selector: the bundle being drained and the global channel
/// number of its sub-channel 0.
///
/// Between transitions `channel_base == current_bundle * C`.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct SelectorState {
    pub current_bundle: usize,
    pub channel_base: usize,
}

impl SelectorState {
    /// Power-on state.
    pub fn new() -> Self {
        Self::default()
    }

    /// One tick of the output stage.
    ///
    /// `front` is the head of the current bundle's buffer (`None` if empty).
    /// An event is consumed iff there is a front and the consumer is ready;
    /// otherwise the state holds and nothing is emitted. Consuming an event
    /// with `last` set moves on to the next bundle, or back to bundle 0 after
    /// the last bundle, which completes the round.
    pub fn next(
        &self,
        front: Option<&SampleEvent>,
        consumer_ready: bool,
        config: &MuxConfiguration,
    ) -> (SelectorState, Option<OutputEvent>) {
        let front = match front {
            Some(front) if consumer_ready => front,
            _ => return (*self, None),
        };
        let last_bundle = self.current_bundle == config.last_bundle();
        let output = OutputEvent {
            payload: front.payload,
            channel_nr: self.channel_base + front.sub_channel,
            first: self.current_bundle == 0 && front.sub_channel == 0,
            last: last_bundle && front.last,
        };
        let next = if !front.last {
            *self
        } else if last_bundle {
            SelectorState::new()
        } else {
            SelectorState {
                current_bundle: self.current_bundle + 1,
                channel_base: self.channel_base + config.channels_per_bundle,
            }
        };
        (next, Some(output))
    }
}
