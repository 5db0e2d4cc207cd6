// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2025.

//! Character-device backend consumed by the LPUART model.
//!
//! The backend is a byte stream (a pty, socket, pipe, ...) owned by the host
//! framework. Framing and parity are not simulated on the wire; the line
//! parameters are only projected onto the backend so the peer can match
//! them. Bytes flowing toward the guest do not arrive through this trait:
//! the host asks the device how much room it has with
//! [`crate::lpuart::Lpuart::can_receive`] and delivers with
//! [`crate::lpuart::Lpuart::receive`].

/// Parity projected onto the backend.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Parity {
    None,
    Even,
    Odd,
}

/// Stop-bit count projected onto the backend.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopBits {
    One,
    Two,
}

/// Serial line parameters, in the shape the backend's configuration call
/// expects.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SerialParams {
    pub speed: u32,
    pub data_bits: u8,
    pub parity: Parity,
    pub stop_bits: StopBits,
}

/// Host-side byte sink/source for one LPUART instance.
///
/// All methods are non-blocking. A backend that cannot accept output right
/// now returns a short count from `write`; the device then arms a single
/// writable watch via `add_watch` and the host re-enters the device's pump
/// when the sink drains.
pub trait CharBackend {
    /// Whether a peer is attached. A disconnected backend swallows output.
    fn connected(&self) -> bool;

    /// Try to accept `buf`, returning how many bytes were taken.
    fn write(&self, buf: &[u8]) -> usize;

    /// Ask to be called back once the sink is writable again. Returns false
    /// when the watch could not be registered.
    fn add_watch(&self) -> bool;

    /// Drop an outstanding writable watch, if any.
    fn remove_watch(&self);

    /// Project new line parameters onto the backend.
    fn set_params(&self, params: &SerialParams);
}
