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

use crate::vcd::{ChangeValue, VcdComponent, VcdWriter};
use crate::{Error, MuxConfiguration, SampleEvent};
use ::vcd as vcd_ext;
use bitvec::prelude::*;
use log::trace;
use std::cell::RefCell;
use std::rc::Rc;

type Record = BitBox<usize, Lsb0>;

/// Elastic input buffer of one bundle.
///
/// A bounded FIFO holding packed `(sample, sub_channel, last)` records, laid
/// out as the hardware word would be: the sample in the low bits, the
/// sub-channel index above it and the last flag in the top bit. Fields wider
/// than their slot are truncated when packed.
///
/// Writing into a full buffer or reading from an empty one is a contract
/// violation of the caller and panics.
#[derive(Clone, Debug)]
pub struct ElasticBuffer {
    name: String,

    /// Circular storage of packed records.
    buffer: Vec<Record>,

    /// The write pointer into the circular buffer (producer side).
    write_idx: usize,

    /// The read pointer into the circular buffer (multiplexer side).
    read_idx: usize,

    /// The number of records in the buffer.
    occupancy: usize,

    sample_width: usize,
    channel_bits: usize,
}

impl ElasticBuffer {
    /// A buffer holding exactly one bundle frame.
    pub fn new(name: &str, config: &MuxConfiguration) -> Result<Self, Error> {
        Self::with_capacity(name, config.channels_per_bundle, config)
    }

    pub fn with_capacity(
        name: &str,
        capacity: usize,
        config: &MuxConfiguration,
    ) -> Result<Self, Error> {
        config.validate()?;
        if capacity == 0 {
            return Err(Error::InvalidChannelCount);
        }
        Ok(Self {
            name: name.to_string(),
            buffer: vec![
                BitVec::repeat(false, config.record_width()).into_boxed_bitslice();
                capacity
            ],
            write_idx: 0,
            read_idx: 0,
            occupancy: 0,
            sample_width: config.sample_width,
            channel_bits: config.bundle_channel_bits(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    pub fn len(&self) -> usize {
        self.occupancy
    }

    pub fn is_empty(&self) -> bool {
        self.occupancy == 0
    }

    pub fn is_full(&self) -> bool {
        self.occupancy == self.buffer.len()
    }

    /// The `ready` signal towards the producer.
    pub fn ready(&self) -> bool {
        !self.is_full()
    }

    fn record_width(&self) -> usize {
        self.sample_width + self.channel_bits + 1
    }

    fn pack_to(
        sample_width: usize,
        channel_bits: usize,
        event: &SampleEvent,
        dst: &mut BitSlice<usize, Lsb0>,
    ) {
        let (sample, rest) = dst.split_at_mut(sample_width);
        sample.store_le(event.payload);
        let (channel, last) = rest.split_at_mut(channel_bits);
        if !channel.is_empty() {
            channel.store_le(event.sub_channel);
        }
        last.set(0, event.last);
    }

    fn unpack(&self, src: &BitSlice<usize, Lsb0>) -> SampleEvent {
        let (sample, rest) = src.split_at(self.sample_width);
        let (channel, last) = rest.split_at(self.channel_bits);
        let sub_channel = if channel.is_empty() {
            0
        } else {
            channel.load_le::<usize>()
        };
        SampleEvent {
            payload: sample.load_le::<u32>(),
            sub_channel,
            first: sub_channel == 0,
            last: last[0],
        }
    }

    /// Appends an event. The buffer must not be full.
    pub fn push(&mut self, event: &SampleEvent) {
        assert!(
            !self.is_full(),
            "{}: write into a full elastic buffer.",
            self.name
        );
        Self::pack_to(
            self.sample_width,
            self.channel_bits,
            event,
            &mut self.buffer[self.write_idx],
        );
        self.write_idx = (self.write_idx + 1) % self.buffer.len();
        self.occupancy += 1;
        trace!(
            "{}: push write_idx: {}, occupancy: {}",
            self.name,
            self.write_idx,
            self.occupancy
        );
    }

    /// The oldest unconsumed event, if any.
    ///
    /// `first` is re-derived from the sub-channel index; the buffer does not
    /// store it.
    pub fn front(&self) -> Option<SampleEvent> {
        if self.is_empty() {
            None
        } else {
            Some(self.unpack(&self.buffer[self.read_idx]))
        }
    }

    /// Removes the front event. The buffer must not be empty.
    pub fn pop(&mut self) -> SampleEvent {
        assert!(
            !self.is_empty(),
            "{}: read from an empty elastic buffer.",
            self.name
        );
        let event = self.unpack(&self.buffer[self.read_idx]);
        self.read_idx = (self.read_idx + 1) % self.buffer.len();
        self.occupancy -= 1;
        trace!(
            "{}: pop read_idx: {}, occupancy: {}",
            self.name,
            self.read_idx,
            self.occupancy
        );
        event
    }

    /// Records the registered state after a commit; it shows up in the VCD
    /// at the next timestamp.
    pub(crate) fn vcd_trace(&self, writer: Rc<RefCell<VcdWriter>>) {
        let _vcd_fifo_scope = VcdWriter::managed_trace_scope(Rc::clone(&writer), &self.name);
        let mut writer = writer.borrow_mut();
        writer.change_vector("level", self.occupancy as u64, 32);
        writer.change_vector("r_rdy", u64::from(!self.is_empty()), 1);
        writer.change_vector("w_rdy", u64::from(self.ready()), 1);
        for (addr, record) in self.buffer.iter().enumerate() {
            writer.change_bits(
                format!("\\mem[{}]", addr).as_str(),
                record,
                ChangeValue::Defer,
            );
        }
    }
}

impl VcdComponent for ElasticBuffer {
    fn vcd_write_scope(&self, writer: Rc<RefCell<VcdWriter>>) {
        let _vcd_fifo_scope = VcdWriter::managed_decl_scope(Rc::clone(&writer), &self.name);
        let mut writer = writer.borrow_mut();
        writer.add_integer_var::<u32>("level");
        writer.add_var(vcd_ext::VarType::Wire, 1, "r_rdy", None);
        writer.add_var(vcd_ext::VarType::Wire, 1, "w_rdy", None);
        for addr in 0..self.capacity() {
            writer.add_var(
                vcd_ext::VarType::Reg,
                self.record_width(),
                format!("\\mem[{}]", addr).as_str(),
                None,
            );
        }
    }

    fn vcd_init(&self, writer: Rc<RefCell<VcdWriter>>) {
        let _vcd_fifo_scope = VcdWriter::managed_trace_scope(Rc::clone(&writer), &self.name);
        let mut writer = writer.borrow_mut();
        writer.change_vector_immediately("level", self.occupancy as u64, 32);
        writer.change_vector_immediately("r_rdy", u64::from(!self.is_empty()), 1);
        writer.change_vector_immediately("w_rdy", u64::from(self.ready()), 1);
        for (addr, record) in self.buffer.iter().enumerate() {
            writer.change_bits(
                format!("\\mem[{}]", addr).as_str(),
                record,
                ChangeValue::Immediately,
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buffer() -> ElasticBuffer {
        ElasticBuffer::new("fifo0", &MuxConfiguration::default()).unwrap()
    }

    #[test]
    fn fifo_order() {
        let mut fifo = buffer();
        assert_eq!(fifo.capacity(), 8);
        assert!(fifo.is_empty());
        assert!(fifo.ready());
        assert_eq!(fifo.front(), None);
        for ch in 0..8 {
            fifo.push(&SampleEvent::framed(0x100 + ch as u32, ch, 8));
        }
        assert!(fifo.is_full());
        assert!(!fifo.ready());
        for ch in 0..8 {
            let expected = SampleEvent::framed(0x100 + ch as u32, ch, 8);
            assert_eq!(fifo.front(), Some(expected));
            assert_eq!(fifo.pop(), expected);
        }
        assert!(fifo.is_empty());
    }

    #[test]
    fn front_is_not_consumed() {
        let mut fifo = buffer();
        fifo.push(&SampleEvent::framed(42, 0, 8));
        assert_eq!(fifo.front().map(|e| e.payload), Some(42));
        assert_eq!(fifo.front().map(|e| e.payload), Some(42));
        assert_eq!(fifo.len(), 1);
    }

    #[test]
    fn wrap_around() {
        let mut fifo = buffer();
        for round in 0..3u32 {
            for ch in 0..5 {
                fifo.push(&SampleEvent::framed(round * 16 + ch as u32, ch, 8));
            }
            for ch in 0..5 {
                assert_eq!(fifo.pop().payload, round * 16 + ch as u32);
            }
        }
        assert_eq!(fifo.read_idx, 15 % 8);
        assert_eq!(fifo.write_idx, 15 % 8);
        assert!(fifo.is_empty());
    }

    #[test]
    fn record_fields_are_truncated_to_their_width() {
        let mut fifo = buffer();
        fifo.push(&SampleEvent {
            payload: 0xab12_3456,
            sub_channel: 9,
            first: false,
            last: true,
        });
        let event = fifo.pop();
        assert_eq!(event.payload, 0x12_3456);
        assert_eq!(event.sub_channel, 1);
        assert!(event.last);
        // first is derived from the stored sub-channel, not stored
        assert!(!event.first);
    }

    #[test]
    fn last_flag_is_carried_not_derived() {
        let mut fifo = buffer();
        fifo.push(&SampleEvent {
            payload: 1,
            sub_channel: 3,
            first: false,
            last: true,
        });
        fifo.push(&SampleEvent {
            payload: 2,
            sub_channel: 7,
            first: false,
            last: false,
        });
        assert!(fifo.pop().last);
        assert!(!fifo.pop().last);
    }

    #[test]
    fn single_channel_bundle_has_no_index_bits() {
        let config = MuxConfiguration {
            bundle_count: 2,
            channels_per_bundle: 1,
            sample_width: 16,
        };
        let mut fifo = ElasticBuffer::new("fifo1", &config).unwrap();
        assert_eq!(fifo.record_width(), 17);
        fifo.push(&SampleEvent::framed(0xbeef, 0, 1));
        assert!(!fifo.ready());
        assert_eq!(fifo.pop(), SampleEvent::framed(0xbeef, 0, 1));
    }

    #[test]
    #[should_panic]
    fn write_full_panics() {
        let mut fifo = buffer();
        for ch in 0..9 {
            fifo.push(&SampleEvent::framed(0, ch % 8, 8));
        }
    }

    #[test]
    #[should_panic]
    fn read_empty_panics() {
        let mut fifo = buffer();
        fifo.pop();
    }

    #[test]
    fn rejects_invalid_configuration() {
        let config = |sample_width| MuxConfiguration {
            bundle_count: 1,
            channels_per_bundle: 8,
            sample_width,
        };
        assert_eq!(
            ElasticBuffer::new("wide", &config(40)).err(),
            Some(Error::InvalidSampleWidth(40))
        );
        assert_eq!(
            ElasticBuffer::new("empty", &config(0)).err(),
            Some(Error::InvalidSampleWidth(0))
        );
        assert_eq!(
            ElasticBuffer::with_capacity("no_slots", 0, &config(24)).err(),
            Some(Error::InvalidChannelCount)
        );
        let mut fifo = ElasticBuffer::new("widest", &config(32)).unwrap();
        fifo.push(&SampleEvent::framed(u32::MAX, 0, 8));
        assert_eq!(fifo.pop().payload, u32::MAX);
    }
}
