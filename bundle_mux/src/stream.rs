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

//! Payloads of the ready/valid streams around the multiplexer.
//!
//! A stream carries `Some(event)` on ticks where its producer asserts `valid`
//! and `None` otherwise; `ready` travels the other way and is returned by the
//! component's `step`.

use std::fmt;

/// One sub-channel sample on a bundle stream.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct SampleEvent {
    pub payload: u32,
    /// Sub-channel index within the bundle frame, `0..C`.
    pub sub_channel: usize,
    /// Informational; the multiplexer does not look at it.
    pub first: bool,
    /// Marks the final sub-channel of the bundle frame. Trusted as given.
    pub last: bool,
}

impl SampleEvent {
    /// A sample framed the way an ADAT receiver frames it: `first` on
    /// sub-channel 0, `last` on sub-channel `channels - 1`.
    pub fn framed(payload: u32, sub_channel: usize, channels: usize) -> Self {
        Self {
            payload,
            sub_channel,
            first: sub_channel == 0,
            last: sub_channel + 1 == channels,
        }
    }
}

/// One channel sample on the multiplexed output stream.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct OutputEvent {
    pub payload: u32,
    /// Global channel number, `0..N*C`.
    pub channel_nr: usize,
    pub first: bool,
    pub last: bool,
}

impl fmt::Display for OutputEvent {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "ch{:02} {:#08x}", self.channel_nr, self.payload)?;
        if self.first {
            write!(f, " first")?;
        }
        if self.last {
            write!(f, " last")?;
        }
        Ok(())
    }
}
