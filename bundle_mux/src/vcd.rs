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

use bitvec::prelude::*;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt::Display;
use std::fs;
use std::io;
use std::path;
use std::rc::Rc;

pub const DEFAULT_TOP_MODULE: &str = "bundle_mux";
const DEFAULT_VCD_HEADER: &str = "bundle_mux VCD";

type SizedData = BitBox<usize, Lsb0>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChangeValue {
    Immediately,
    Defer,
}

/// Packs the low `width` bits of `value`.
fn pack_u64(value: u64, width: usize) -> SizedData {
    let mut bits = BitVec::<usize, Lsb0>::repeat(false, width);
    if width > 0 {
        let stored = width.min(64);
        bits[..stored].store_le(value);
    }
    bits.into_boxed_bitslice()
}

/// Value change dump of a simulation, one timestamp per tick.
///
/// Signals are addressed by their scoped name (`bundle_mux.fifo0.level`);
/// the current scope is maintained with `managed_decl_scope` while declaring
/// and `managed_trace_scope` while tracing. Values are only written when they
/// change. An I/O error is logged once; afterwards the writer ignores all
/// requests so that tracing never fails a simulation.
pub struct VcdWriter {
    writer: vcd::Writer<fs::File>,
    is_error_state: bool,
    scope_stack: Vec<String>,
    id_map: HashMap<String, vcd::IdCode>,
    last_value_map: HashMap<vcd::IdCode, SizedData>,
    deferred_changes: HashMap<vcd::IdCode, SizedData>,
    timestamp: u64,
}

pub struct VcdTraceScope {
    writer: Rc<RefCell<VcdWriter>>,
    scope: String,
}

impl Drop for VcdTraceScope {
    fn drop(&mut self) {
        self.writer.borrow_mut().leave_scope(self.scope.as_str());
    }
}

pub struct VcdDeclScope {
    writer: Rc<RefCell<VcdWriter>>,
    scope: String,
}

impl Drop for VcdDeclScope {
    fn drop(&mut self) {
        self.writer.borrow_mut().upscope(self.scope.as_str());
    }
}

impl VcdWriter {
    pub fn new(dst: path::PathBuf) -> io::Result<Self> {
        let dst_file = fs::File::create(&dst)?;
        log::debug!("VCD file: {}", dst.display());
        Ok(Self {
            writer: vcd::Writer::new(dst_file),
            is_error_state: false,
            scope_stack: vec![],
            id_map: HashMap::new(),
            last_value_map: HashMap::new(),
            deferred_changes: HashMap::new(),
            timestamp: 0,
        })
    }

    fn vcd_error_handler(&mut self, err: io::Error) {
        if !self.is_error_state {
            self.is_error_state = true;
            log::warn!("VCD writing failed with error {:?}", err)
        }
    }

    pub fn is_error_state(&self) -> bool {
        self.is_error_state
    }

    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    pub fn managed_decl_scope<T>(writer: Rc<RefCell<VcdWriter>>, scope: &T) -> VcdDeclScope
    where
        T: Display + ?Sized,
    {
        writer.borrow_mut().add_module(scope);
        VcdDeclScope {
            writer: Rc::clone(&writer),
            scope: scope.to_string(),
        }
    }

    pub fn managed_trace_scope<T>(writer: Rc<RefCell<VcdWriter>>, scope: &T) -> VcdTraceScope
    where
        T: Display + ?Sized,
    {
        writer.borrow_mut().enter_scope(scope);
        VcdTraceScope {
            writer: Rc::clone(&writer),
            scope: scope.to_string(),
        }
    }

    /// Declares the top module with its cycle counter and the signals of
    /// `component`, then records their power-on values at timestamp 0.
    pub fn write_header(writer: Rc<RefCell<Self>>, component: &dyn VcdComponent) {
        let result = {
            let mut w = writer.borrow_mut();
            w.writer
                .comment(DEFAULT_VCD_HEADER)
                .and_then(|_| w.writer.date(chrono::Utc::now().to_string().as_str()))
        };
        result.unwrap_or_else(|err| writer.borrow_mut().vcd_error_handler(err));
        {
            let _vcd_decl_scope =
                VcdWriter::managed_decl_scope(Rc::clone(&writer), DEFAULT_TOP_MODULE);
            writer.borrow_mut().add_integer_var::<u64>("sim_cycles");
            component.vcd_write_scope(Rc::clone(&writer));
        }
        let result = writer.borrow_mut().writer.enddefinitions();
        result.unwrap_or_else(|err| writer.borrow_mut().vcd_error_handler(err));
        {
            let _vcd_trace_scope =
                VcdWriter::managed_trace_scope(Rc::clone(&writer), DEFAULT_TOP_MODULE);
            writer.borrow_mut().enter_cycle();
            writer
                .borrow_mut()
                .change_vector_immediately("sim_cycles", 0, 64);
            component.vcd_init(Rc::clone(&writer));
            writer.borrow_mut().end_cycle();
        }
    }

    fn enter_scope<T: Display + ?Sized>(&mut self, name: &T) {
        self.scope_stack.push(name.to_string())
    }

    fn record_change(&mut self, id_code: vcd::IdCode, sized_data: &SizedData) {
        if self.is_error_state {
            return;
        }
        self._record_change(id_code, sized_data)
            .unwrap_or_else(|err| self.vcd_error_handler(err));
    }

    fn _record_change(&mut self, id_code: vcd::IdCode, sized_data: &SizedData) -> io::Result<()> {
        if let Some(last_sized_data) = self.last_value_map.get(&id_code) {
            if last_sized_data == sized_data {
                return Ok(());
            }
        }
        self.writer.change_vector(
            id_code,
            sized_data
                .iter()
                .rev()
                .map(|b| (*b).into())
                .collect::<Vec<_>>()
                .as_slice(),
        )?;
        self.last_value_map.insert(id_code, sized_data.clone());
        Ok(())
    }

    fn echo_change(&self, name: &str) {
        if cfg!(feature = "trace-echo-vcd-signal-changes") {
            log::trace!("VCD changing {}", self.scoped_name(name));
        }
    }

    /// Registers a change that becomes visible at the next timestamp.
    pub fn change_vector(&mut self, name: &str, value: u64, width: usize) {
        self.change_bits(name, &pack_u64(value, width), ChangeValue::Defer);
    }

    pub fn change_vector_immediately(&mut self, name: &str, value: u64, width: usize) {
        self.change_bits(name, &pack_u64(value, width), ChangeValue::Immediately);
    }

    pub fn change_bits(
        &mut self,
        name: &str,
        bits: &BitSlice<usize, Lsb0>,
        change_value: ChangeValue,
    ) {
        if let Some(id_code) = self.lookup_id_code(name) {
            self.echo_change(name);
            let sized_data = bits.to_bitvec().into_boxed_bitslice();
            if change_value == ChangeValue::Defer {
                self.deferred_changes.insert(id_code, sized_data);
            } else {
                self.record_change(id_code, &sized_data);
            }
        }
    }

    fn lookup_id_code(&self, name: &str) -> Option<vcd::IdCode> {
        let scoped_name = self.scoped_name(name);
        if let Some(id_code) = self.id_map.get(scoped_name.as_str()) {
            Some(*id_code)
        } else {
            log::warn!(
                "No such scoped name {} was defined for VCD dumps.",
                scoped_name
            );
            None
        }
    }

    pub fn flush_after_simulation(&mut self) {
        self.enter_cycle();
        self.end_cycle();
    }

    pub fn enter_cycle(&mut self) {
        if self.is_error_state {
            return;
        }
        self._enter_cycle()
            .unwrap_or_else(|err| self.vcd_error_handler(err));
    }

    fn _enter_cycle(&mut self) -> io::Result<()> {
        // Start new cycle.
        self.writer.timestamp(self.timestamp)?;
        // Write all deferred changes; these should appear in the new cycle which we've begun.
        let deferred_changes: HashMap<vcd::IdCode, SizedData> =
            self.deferred_changes.drain().collect();
        for (id_code, data) in deferred_changes {
            self._record_change(id_code, &data)?;
        }
        Ok(())
    }

    pub fn end_cycle(&mut self) {
        if self.is_error_state {
            return;
        }
        self.timestamp += 1;
    }

    fn leave_scope<T: Display + ?Sized>(&mut self, scope: &T) {
        let popped_scope = self
            .scope_stack
            .pop()
            .expect("Attempted to leave a scope without entering one first.");
        assert_eq!(popped_scope, scope.to_string());
    }

    fn add_module<T: Display + ?Sized>(&mut self, name: &T) {
        if self.is_error_state {
            // keep the scope stack balanced for the matching upscope
            self.scope_stack.push(name.to_string());
            return;
        }
        self._add_module::<T>(name)
            .unwrap_or_else(|err| self.vcd_error_handler(err));
    }

    fn _add_module<T: Display + ?Sized>(&mut self, name: &T) -> io::Result<()> {
        self.scope_stack.push(name.to_string());
        self.writer.add_module(&name.to_string())
    }

    fn upscope<T: Display + ?Sized>(&mut self, scope: &T) {
        self.leave_scope(scope);
        if self.is_error_state {
            return;
        }
        self.writer
            .upscope()
            .unwrap_or_else(|err| self.vcd_error_handler(err));
    }

    pub fn add_integer_var<T: Sized>(&mut self, reference: &str) {
        self.add_var(
            vcd::VarType::Integer,
            std::mem::size_of::<T>() * 8,
            reference,
            None,
        );
    }

    pub fn add_var(
        &mut self,
        var_type: vcd::VarType,
        width: usize,
        reference: &str,
        index: Option<vcd::ReferenceIndex>,
    ) {
        if self.is_error_state {
            return;
        }
        self._add_var(var_type, width, reference, index)
            .unwrap_or_else(|err| self.vcd_error_handler(err));
    }

    fn _add_var(
        &mut self,
        var_type: vcd::VarType,
        width: usize,
        reference: &str,
        index: Option<vcd::ReferenceIndex>,
    ) -> io::Result<()> {
        let var_id = self
            .writer
            .add_var(var_type, width as u32, reference, index)?;
        self.add_id_map(reference, var_id);
        Ok(())
    }

    fn scoped_name(&self, name: &str) -> String {
        self.scope_stack.join(".") + "." + name
    }

    fn add_id_map(&mut self, name: &str, vcd_id: vcd::IdCode) {
        let scoped_name = self.scoped_name(name);
        if self.id_map.contains_key(scoped_name.as_str()) {
            log::warn!("Scoped name {} was redefined for VCD dumps.", scoped_name);
        }
        self.id_map.insert(scoped_name, vcd_id);
    }
}

/// An object implementing the VcdComponent can declare and initialize values to
/// be traced by a VCD. Each such object is responsible for calling their inner
/// VcdComponent objects.
///
/// The multiplexer declares a `selector` and an `out` scope and calls its
/// buffers, which declare one `fifo<i>` scope each:
///
/// ```text
/// bundle_mux.sim_cycles
/// bundle_mux.selector.current_bundle
/// bundle_mux.fifo0.level
/// bundle_mux.fifo0.\mem[0]
/// bundle_mux.out.channel_nr
/// ```
pub trait VcdComponent {
    /// A VCD header contains a hierarchical scope of names to be traced. Each
    /// component is expected to declare its variables to be traced and call
    /// `vcd_write_scope` on its members implementing the `VcdComponent`
    /// trait.
    fn vcd_write_scope(&self, vcd_writer: Rc<RefCell<VcdWriter>>);

    /// Components can record the initial value of their values to be traced.
    /// Components should call `vcd_init` on members implementing the
    /// `VcdComponent` trait.
    fn vcd_init(&self, vcd_writer: Rc<RefCell<VcdWriter>>);
}
