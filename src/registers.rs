// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2025.

//! In-memory model of a single 32-bit guest register.
//!
//! Each register latch pairs a [`LocalRegisterCopy`] with the mask of bits
//! the guest may change. Guest writes go through [`RegModel::guest_write`],
//! which preserves everything outside the writable mask and diagnoses the
//! residue; device code updates status fields through the typed
//! field-value interface. Registers with write-1-to-clear or write-1-to-act
//! bits decode the written value themselves and use the internal setters.

use log::warn;
use tock_registers::fields::{Field, FieldValue};
use tock_registers::{LocalRegisterCopy, RegisterLongName};

pub(crate) struct RegModel<R: RegisterLongName> {
    value: LocalRegisterCopy<u32, R>,
    writable: u32,
    name: &'static str,
}

impl<R: RegisterLongName> RegModel<R> {
    /// A latch whose guest-writable bits are the fields named in `writable`.
    pub(crate) fn new(reset: u32, writable: FieldValue<u32, R>, name: &'static str) -> Self {
        RegModel {
            value: LocalRegisterCopy::new(reset),
            writable: writable.mask(),
            name,
        }
    }

    /// A latch the guest can only read.
    pub(crate) fn read_only(reset: u32, name: &'static str) -> Self {
        RegModel {
            value: LocalRegisterCopy::new(reset),
            writable: 0,
            name,
        }
    }

    pub(crate) fn get(&self) -> u32 {
        self.value.get()
    }

    /// Replace the whole latch, bypassing the writable mask. Reset paths and
    /// snapshot restore only.
    pub(crate) fn set_raw(&mut self, value: u32) {
        self.value.set(value);
    }

    pub(crate) fn read(&self, field: Field<u32, R>) -> u32 {
        self.value.read(field)
    }

    pub(crate) fn is_set(&self, field: Field<u32, R>) -> bool {
        self.value.is_set(field)
    }

    /// Device-internal field update (status bits, mirrors).
    pub(crate) fn modify(&mut self, field: FieldValue<u32, R>) {
        self.value.modify(field);
    }

    /// Apply a guest write: writable fields take the new value, everything
    /// else is kept and the dropped residue is logged.
    pub(crate) fn guest_write(&mut self, value: u32) {
        let residue = value & !self.writable;
        if residue != 0 {
            warn!(
                "{}: dropping write to read-only/reserved bits {:#010x}",
                self.name, residue
            );
        }
        self.value
            .set((self.value.get() & !self.writable) | (value & self.writable));
    }
}
