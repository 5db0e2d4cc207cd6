// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2025.

//! S32K358 Low-Power UART (LPUART).
//!
//! A byte-oriented serial peripheral with watermark-driven transmit and
//! receive FIFOs. Instances 0 and 1 implement 16-byte FIFOs with 4-bit
//! watermark fields; instances 2..=15 implement 4-byte FIFOs with 2-bit
//! watermark fields. Until a FIFO is enabled through the FIFO register its
//! effective depth is a single byte.
//!
//! Host interface:
//! - MMIO region: 0x800 bytes of registers via [`BusDevice`]
//! - interrupt output: one aggregated line
//! - character backend: non-blocking byte sink/source with a writable watch
//!
//! Output is drained opportunistically: a DATA write queues the byte and
//! immediately offers the whole FIFO to the backend. When the backend
//! pushes back, the remainder stays queued and a single writable watch is
//! armed; [`Lpuart::writable`] re-enters the pump when it fires. Nothing
//! here ever blocks.
//!
//! Not modeled: 9/10-bit frames, flow control, break and idle detection,
//! DMA. Wire-level framing is not simulated; the line parameters are only
//! projected onto the backend.

use log::warn;
use tock_registers::{register_bitfields, LocalRegisterCopy};

use crate::bus::{word_access, BusDevice, InterruptLine};
use crate::chardev::{CharBackend, Parity, SerialParams, StopBits};
use crate::fifo::ByteFifo;
use crate::registers::RegModel;
use crate::ConfigError;

/// Size of the MMIO register bank.
pub const LPUART_MMIO_LEN: u64 = 0x800;

/// Deepest FIFO any instance implements; snapshot arrays use this size.
pub const FIFO_MAX_DEPTH: usize = 16;

const VERID_OFFSET: u64 = 0x00;
const PARAM_OFFSET: u64 = 0x04;
const GLOBAL_OFFSET: u64 = 0x08;
const BAUD_OFFSET: u64 = 0x10;
const STAT_OFFSET: u64 = 0x14;
const CTRL_OFFSET: u64 = 0x18;
const DATA_OFFSET: u64 = 0x1C;
const FIFO_OFFSET: u64 = 0x28;
const WATER_OFFSET: u64 = 0x2C;

register_bitfields![u32,
    GLOBAL [
        RST OFFSET(1) NUMBITS(1) []
    ],
    BAUD [
        SBR OFFSET(0) NUMBITS(13) [],
        SBNS OFFSET(13) NUMBITS(1) [],
        BOTHEDGE OFFSET(17) NUMBITS(1) [],
        OSR OFFSET(24) NUMBITS(5) []
    ],
    STAT [
        RDRF OFFSET(21) NUMBITS(1) [],
        TC OFFSET(22) NUMBITS(1) [],
        TDRE OFFSET(23) NUMBITS(1) []
    ],
    CTRL [
        PT OFFSET(0) NUMBITS(1) [],
        PE OFFSET(1) NUMBITS(1) [],
        RE OFFSET(18) NUMBITS(1) [],
        TE OFFSET(19) NUMBITS(1) [],
        RIE OFFSET(21) NUMBITS(1) [],
        TCIE OFFSET(22) NUMBITS(1) [],
        TIE OFFSET(23) NUMBITS(1) []
    ],
    DATA [
        RT OFFSET(0) NUMBITS(8) [],
        RXEMPT OFFSET(12) NUMBITS(1) []
    ],
    FIFO [
        RXFIFOSIZE OFFSET(0) NUMBITS(3) [],
        RXFE OFFSET(3) NUMBITS(1) [],
        TXFIFOSIZE OFFSET(4) NUMBITS(3) [],
        TXFE OFFSET(7) NUMBITS(1) [],
        RXUFE OFFSET(8) NUMBITS(1) [],
        TXOFE OFFSET(9) NUMBITS(1) [],
        RXFLUSH OFFSET(14) NUMBITS(1) [],
        TXFLUSH OFFSET(15) NUMBITS(1) [],
        RXUF OFFSET(16) NUMBITS(1) [],
        TXOF OFFSET(17) NUMBITS(1) [],
        RXEMPT OFFSET(22) NUMBITS(1) [],
        TXEMPT OFFSET(23) NUMBITS(1) []
    ],
    WATER [
        TXWATER OFFSET(0) NUMBITS(4) [],
        TXCOUNT OFFSET(8) NUMBITS(5) [],
        RXWATER OFFSET(16) NUMBITS(4) [],
        RXCOUNT OFFSET(24) NUMBITS(5) []
    ],
];

// Reset values, page 4595 of the reference manual. Instances 0 and 1 carry
// the wider FIFO geometry.
const BAUD_RESET: u32 = 0x0F00_0004;
const STAT_RESET: u32 = 0x00C0_0000;
const DATA_RESET: u32 = 0x0000_1000;

fn verid_reset(id: u8) -> u32 {
    if id < 2 {
        0x0404_0007
    } else {
        0x0404_0003
    }
}

fn param_reset(id: u8) -> u32 {
    if id < 2 {
        0x0000_0404
    } else {
        0x0000_0202
    }
}

fn fifo_reset(id: u8) -> u32 {
    if id < 2 {
        0x00C0_0033
    } else {
        0x00C0_0011
    }
}

fn fifo_depth(id: u8) -> usize {
    if id < 2 {
        16
    } else {
        4
    }
}

fn watermark_max(id: u8) -> u32 {
    if id < 2 {
        0xF
    } else {
        0x3
    }
}

/// Snapshot of one LPUART instance. The FIFO byte arrays are stored at
/// maximal size regardless of the instance geometry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LpuartState {
    pub verid: u32,
    pub param: u32,
    pub global: u32,
    pub baud: u32,
    pub stat: u32,
    pub ctrl: u32,
    pub data: u32,
    pub fifo: u32,
    pub tx_fifo: [u8; FIFO_MAX_DEPTH],
    pub rx_fifo: [u8; FIFO_MAX_DEPTH],
    pub tx_written: u32,
    pub rx_written: u32,
    pub tx_watermark: u32,
    pub rx_watermark: u32,
}

pub struct Lpuart<'a> {
    id: u8,
    pclk_frq: u32,
    verid: u32,
    param: u32,
    global: RegModel<GLOBAL::Register>,
    baud: RegModel<BAUD::Register>,
    stat: RegModel<STAT::Register>,
    ctrl: RegModel<CTRL::Register>,
    data: RegModel<DATA::Register>,
    fifo: RegModel<FIFO::Register>,
    tx_fifo: ByteFifo,
    rx_fifo: ByteFifo,
    tx_watermark: u32,
    rx_watermark: u32,
    backend: &'a dyn CharBackend,
    irq: &'a dyn InterruptLine,
    // Single-slot writable watch; arming while armed is a no-op.
    watch_armed: bool,
}

impl<'a> Lpuart<'a> {
    /// Build instance `id` clocked at `pclk_frq` Hz.
    pub fn new(
        id: u8,
        pclk_frq: u32,
        backend: &'a dyn CharBackend,
        irq: &'a dyn InterruptLine,
    ) -> Result<Lpuart<'a>, ConfigError> {
        if pclk_frq == 0 {
            return Err(ConfigError::PclkFrequencyNotSet);
        }
        if id > 15 {
            return Err(ConfigError::InstanceOutOfRange(id));
        }
        let mut uart = Lpuart {
            id,
            pclk_frq,
            verid: verid_reset(id),
            param: param_reset(id),
            global: RegModel::read_only(0, "LPUART GLOBAL"),
            baud: RegModel::new(
                BAUD_RESET,
                BAUD::SBR::SET + BAUD::SBNS::SET + BAUD::BOTHEDGE::SET + BAUD::OSR::SET,
                "LPUART BAUD",
            ),
            stat: RegModel::read_only(STAT_RESET, "LPUART STAT"),
            ctrl: RegModel::new(
                0,
                CTRL::PT::SET
                    + CTRL::PE::SET
                    + CTRL::RE::SET
                    + CTRL::TE::SET
                    + CTRL::RIE::SET
                    + CTRL::TCIE::SET
                    + CTRL::TIE::SET,
                "LPUART CTRL",
            ),
            data: RegModel::read_only(DATA_RESET, "LPUART DATA"),
            fifo: RegModel::read_only(fifo_reset(id), "LPUART FIFO"),
            tx_fifo: ByteFifo::new(1),
            rx_fifo: ByteFifo::new(1),
            tx_watermark: 0,
            rx_watermark: 0,
            backend,
            irq,
            watch_armed: false,
        };
        uart.reset();
        Ok(uart)
    }

    /// Apply the id-specific reset values and drop all queued bytes.
    pub fn reset(&mut self) {
        if self.watch_armed {
            self.backend.remove_watch();
            self.watch_armed = false;
        }
        self.verid = verid_reset(self.id);
        self.param = param_reset(self.id);
        self.global.set_raw(0);
        self.baud.set_raw(BAUD_RESET);
        self.stat.set_raw(STAT_RESET);
        self.ctrl.set_raw(0);
        self.data.set_raw(DATA_RESET);
        self.fifo.set_raw(fifo_reset(self.id));
        self.tx_fifo = ByteFifo::new(1);
        self.rx_fifo = ByteFifo::new(1);
        self.tx_watermark = 0;
        self.rx_watermark = 0;
        self.irq.set_level(false);
    }

    /// Room for bytes from the backend: the free receive capacity, or 0
    /// while the receiver is disabled.
    pub fn can_receive(&self) -> usize {
        if !self.ctrl.is_set(CTRL::RE) {
            return 0;
        }
        self.rx_fifo.capacity() - self.rx_fifo.len()
    }

    /// Bytes delivered by the backend. With the receiver disabled they are
    /// dropped at the gate; bytes already queued stay readable either way.
    pub fn receive(&mut self, buf: &[u8]) {
        if !self.ctrl.is_set(CTRL::RE) {
            return;
        }
        for &byte in buf {
            if !self.rx_fifo.push(byte) {
                break;
            }
        }
        self.update_fifo_flags();
        self.update_irq();
    }

    /// The backend's writable watch fired: drain what we can.
    pub fn writable(&mut self) {
        self.watch_armed = false;
        self.pump_tx();
    }

    /// Capture the persisted state.
    pub fn save(&self) -> LpuartState {
        LpuartState {
            verid: self.verid,
            param: self.param,
            global: self.global.get(),
            baud: self.baud.get(),
            stat: self.stat.get(),
            ctrl: self.ctrl.get(),
            data: self.data.get(),
            fifo: self.fifo.get(),
            tx_fifo: self.tx_fifo.snapshot(),
            rx_fifo: self.rx_fifo.snapshot(),
            tx_written: self.tx_fifo.len() as u32,
            rx_written: self.rx_fifo.len() as u32,
            tx_watermark: self.tx_watermark,
            rx_watermark: self.rx_watermark,
        }
    }

    /// Restore a snapshot and re-establish the backend side: line parameters
    /// are reprojected and, when transmit bytes are still queued, the
    /// writable watch is re-armed so they go out again.
    pub fn restore(&mut self, state: &LpuartState) {
        if self.watch_armed {
            self.backend.remove_watch();
            self.watch_armed = false;
        }
        self.verid = state.verid;
        self.param = state.param;
        self.global.set_raw(state.global);
        self.baud.set_raw(state.baud);
        self.stat.set_raw(state.stat);
        self.ctrl.set_raw(state.ctrl);
        self.data.set_raw(state.data);
        self.fifo.set_raw(state.fifo);
        self.tx_fifo = ByteFifo::new(self.tx_capacity());
        self.tx_fifo.restore(&state.tx_fifo, state.tx_written as usize);
        self.rx_fifo = ByteFifo::new(self.rx_capacity());
        self.rx_fifo.restore(&state.rx_fifo, state.rx_written as usize);
        self.tx_watermark = state.tx_watermark;
        self.rx_watermark = state.rx_watermark;

        if !self.tx_fifo.is_empty() {
            self.watch_armed = self.backend.add_watch();
        }
        self.update_params();
        self.update_irq();
    }

    fn tx_capacity(&self) -> usize {
        if self.fifo.is_set(FIFO::TXFE) {
            fifo_depth(self.id)
        } else {
            1
        }
    }

    fn rx_capacity(&self) -> usize {
        if self.fifo.is_set(FIFO::RXFE) {
            fifo_depth(self.id)
        } else {
            1
        }
    }

    /// Project speed, parity and stop bits onto the backend.
    fn update_params(&self) {
        let sbr = self.baud.read(BAUD::SBR);
        let osr = self.baud.read(BAUD::OSR);
        // baud rate = clock / ((OSR + 1) * SBR), page 4618
        let speed = if sbr > 0 {
            self.pclk_frq / ((osr + 1) * sbr)
        } else {
            self.pclk_frq
        };
        let parity = if !self.ctrl.is_set(CTRL::PE) {
            Parity::None
        } else if self.ctrl.is_set(CTRL::PT) {
            Parity::Odd
        } else {
            Parity::Even
        };
        let stop_bits = if self.baud.is_set(BAUD::SBNS) {
            StopBits::Two
        } else {
            StopBits::One
        };
        self.backend.set_params(&SerialParams {
            speed,
            data_bits: 8,
            parity,
            stop_bits,
        });
    }

    /// Recompute every occupancy-derived flag.
    fn update_fifo_flags(&mut self) {
        let tx_len = self.tx_fifo.len() as u32;
        let rx_len = self.rx_fifo.len() as u32;
        self.stat.modify(if tx_len <= self.tx_watermark {
            STAT::TDRE::SET
        } else {
            STAT::TDRE::CLEAR
        });
        self.stat.modify(if rx_len > self.rx_watermark {
            STAT::RDRF::SET
        } else {
            STAT::RDRF::CLEAR
        });
        self.stat.modify(if tx_len == 0 {
            STAT::TC::SET
        } else {
            STAT::TC::CLEAR
        });
        self.fifo.modify(if tx_len == 0 {
            FIFO::TXEMPT::SET
        } else {
            FIFO::TXEMPT::CLEAR
        });
        self.fifo.modify(if rx_len == 0 {
            FIFO::RXEMPT::SET
        } else {
            FIFO::RXEMPT::CLEAR
        });
        self.data.modify(if rx_len == 0 {
            DATA::RXEMPT::SET
        } else {
            DATA::RXEMPT::CLEAR
        });
    }

    fn update_irq(&mut self) {
        let pending = (self.ctrl.is_set(CTRL::TIE) && self.stat.is_set(STAT::TDRE))
            || (self.ctrl.is_set(CTRL::TCIE) && self.stat.is_set(STAT::TC))
            || (self.ctrl.is_set(CTRL::RIE) && self.stat.is_set(STAT::RDRF))
            || (self.fifo.is_set(FIFO::TXOFE) && self.fifo.is_set(FIFO::TXOF))
            || (self.fifo.is_set(FIFO::RXUFE) && self.fifo.is_set(FIFO::RXUF));
        self.irq.set_level(pending);
    }

    /// Try to hand queued transmit bytes to the backend; never blocks.
    fn pump_tx(&mut self) {
        if !self.backend.connected() {
            // No peer: the queue drains into the void.
            self.tx_fifo.clear();
        } else if !self.ctrl.is_set(CTRL::TE) || self.tx_fifo.is_empty() {
            // Nothing to drain right now.
        } else {
            let accepted = self.backend.write(self.tx_fifo.as_slice());
            self.tx_fifo.drain_front(accepted);
            if !self.tx_fifo.is_empty() && !self.watch_armed {
                self.watch_armed = self.backend.add_watch();
                if !self.watch_armed {
                    // No way to hear about the sink draining: shed the tail
                    // rather than wedge the guest's transmitter.
                    self.tx_fifo.clear();
                }
            }
        }
        self.update_fifo_flags();
        self.update_irq();
    }

    fn data_write(&mut self, value: u32) {
        let residue = value & !DATA::RT::SET.mask();
        if residue != 0 {
            warn!(
                "LPUART DATA: dropping write to reserved bits {:#010x}",
                residue
            );
        }
        if !self.ctrl.is_set(CTRL::TE) {
            return;
        }
        if self.tx_fifo.is_full() {
            self.fifo.modify(FIFO::TXOF::SET);
            self.update_irq();
            return;
        }
        self.stat.modify(STAT::TC::CLEAR);
        self.fifo.modify(FIFO::TXEMPT::CLEAR);
        self.tx_fifo.push(value as u8);
        self.update_fifo_flags();
        self.pump_tx();
    }

    fn data_read(&mut self) -> u32 {
        match self.rx_fifo.pop() {
            None => {
                self.fifo.modify(FIFO::RXUF::SET);
                self.update_irq();
            }
            Some(byte) => {
                self.data.modify(DATA::RT.val(u32::from(byte)));
                self.update_fifo_flags();
                self.update_irq();
            }
        }
        self.data.get()
    }

    fn global_write(&mut self, value: u32) {
        if value & !GLOBAL::RST::SET.mask() != 0 {
            warn!("LPUART GLOBAL: only the RST bit is writable");
            return;
        }
        if value & GLOBAL::RST::SET.mask() != 0 {
            self.reset();
        }
        // RST stays latched until the guest clears it; while it is set every
        // other register ignores writes.
        self.global.set_raw(value);
    }

    fn baud_write(&mut self, value: u32) {
        if self.ctrl.is_set(CTRL::RE) || self.ctrl.is_set(CTRL::TE) {
            warn!(
                "LPUART BAUD: receiver and transmitter must be disabled to change the baud register"
            );
            return;
        }
        let v: LocalRegisterCopy<u32, BAUD::Register> = LocalRegisterCopy::new(value);
        let osr = v.read(BAUD::OSR);
        if osr == 1 || osr == 2 {
            warn!("LPUART BAUD: OSR values 1 and 2 are reserved");
            return;
        }
        if (3..=6).contains(&osr) && !v.is_set(BAUD::BOTHEDGE) {
            warn!("LPUART BAUD: OSR values 3..6 require both-edge sampling");
            return;
        }
        self.baud.guest_write(value);
        self.update_params();
    }

    fn ctrl_write(&mut self, value: u32) {
        self.ctrl.guest_write(value);
        self.update_params();
        // Enabling the transmitter releases anything queued while it was
        // off; the pump recomputes flags on its own.
        if self.ctrl.is_set(CTRL::TE) && !self.tx_fifo.is_empty() {
            self.pump_tx();
        }
        self.update_irq();
    }

    fn fifo_write(&mut self, value: u32) {
        let v: LocalRegisterCopy<u32, FIFO::Register> = LocalRegisterCopy::new(value);
        let writable = (FIFO::RXFE::SET
            + FIFO::TXFE::SET
            + FIFO::RXUFE::SET
            + FIFO::TXOFE::SET
            + FIFO::RXFLUSH::SET
            + FIFO::TXFLUSH::SET
            + FIFO::RXUF::SET
            + FIFO::TXOF::SET)
            .mask();
        let residue = value & !writable;
        if residue != 0 {
            warn!(
                "LPUART FIFO: dropping write to read-only/reserved bits {:#010x}",
                residue
            );
        }

        // The FIFO enables resize the effective depth, so they may only
        // change while the matching CTRL enable is off. A change empties
        // the queue.
        if v.is_set(FIFO::TXFE) != self.fifo.is_set(FIFO::TXFE) {
            if self.ctrl.is_set(CTRL::TE) {
                warn!("LPUART FIFO: TXFE cannot change while the transmitter is enabled");
            } else {
                self.fifo.modify(FIFO::TXFE.val(v.read(FIFO::TXFE)));
                self.tx_fifo = ByteFifo::new(self.tx_capacity());
            }
        }
        if v.is_set(FIFO::RXFE) != self.fifo.is_set(FIFO::RXFE) {
            if self.ctrl.is_set(CTRL::RE) {
                warn!("LPUART FIFO: RXFE cannot change while the receiver is enabled");
            } else {
                self.fifo.modify(FIFO::RXFE.val(v.read(FIFO::RXFE)));
                self.rx_fifo = ByteFifo::new(self.rx_capacity());
            }
        }

        self.fifo.modify(FIFO::RXUFE.val(v.read(FIFO::RXUFE)));
        self.fifo.modify(FIFO::TXOFE.val(v.read(FIFO::TXOFE)));

        if v.is_set(FIFO::RXFLUSH) {
            self.rx_fifo.clear();
        }
        if v.is_set(FIFO::TXFLUSH) {
            self.tx_fifo.clear();
        }
        if v.is_set(FIFO::RXUF) {
            self.fifo.modify(FIFO::RXUF::CLEAR);
        }
        if v.is_set(FIFO::TXOF) {
            self.fifo.modify(FIFO::TXOF::CLEAR);
        }

        self.update_fifo_flags();
        self.update_irq();
    }

    fn water_write(&mut self, value: u32) {
        let v: LocalRegisterCopy<u32, WATER::Register> = LocalRegisterCopy::new(value);
        let tx_water = v.read(WATER::TXWATER);
        let rx_water = v.read(WATER::RXWATER);
        let max = watermark_max(self.id);
        if tx_water > max || rx_water > max {
            warn!(
                "LPUART WATER: watermark out of range for this instance ({:#010x})",
                value
            );
            return;
        }
        let writable = (WATER::TXWATER::SET + WATER::RXWATER::SET).mask();
        let residue = value & !writable;
        if residue != 0 {
            warn!(
                "LPUART WATER: dropping write to read-only bits {:#010x}",
                residue
            );
        }
        self.tx_watermark = tx_water;
        self.rx_watermark = rx_water;
        self.update_fifo_flags();
        self.update_irq();
    }

    /// WATER reads report live occupancy next to the stored watermarks.
    fn water_read(&self) -> u32 {
        let mut v: LocalRegisterCopy<u32, WATER::Register> = LocalRegisterCopy::new(0);
        v.modify(
            WATER::TXWATER.val(self.tx_watermark)
                + WATER::TXCOUNT.val(self.tx_fifo.len() as u32)
                + WATER::RXWATER.val(self.rx_watermark)
                + WATER::RXCOUNT.val(self.rx_fifo.len() as u32),
        );
        v.get()
    }

    fn read_reg(&mut self, offset: u64) -> u32 {
        match offset {
            VERID_OFFSET => self.verid,
            PARAM_OFFSET => self.param,
            GLOBAL_OFFSET => self.global.get(),
            BAUD_OFFSET => self.baud.get(),
            STAT_OFFSET => self.stat.get(),
            CTRL_OFFSET => self.ctrl.get(),
            DATA_OFFSET => self.data_read(),
            FIFO_OFFSET => self.fifo.get(),
            WATER_OFFSET => self.water_read(),
            _ => {
                warn!("LPUART read: bad offset {:#x}", offset);
                0
            }
        }
    }

    fn write_reg(&mut self, offset: u64, value: u32) {
        // A device held in reset only listens to GLOBAL.
        if self.global.is_set(GLOBAL::RST) && offset != GLOBAL_OFFSET {
            warn!(
                "LPUART write: offset {:#x} ignored while GLOBAL.RST is set",
                offset
            );
            return;
        }
        match offset {
            VERID_OFFSET => warn!("LPUART: VERID is a read-only register"),
            PARAM_OFFSET => warn!("LPUART: PARAM is a read-only register"),
            GLOBAL_OFFSET => self.global_write(value),
            BAUD_OFFSET => self.baud_write(value),
            STAT_OFFSET => {
                if value != 0 {
                    warn!("LPUART STAT: no writable bits ({:#010x} dropped)", value);
                }
            }
            CTRL_OFFSET => self.ctrl_write(value),
            DATA_OFFSET => self.data_write(value),
            FIFO_OFFSET => self.fifo_write(value),
            WATER_OFFSET => self.water_write(value),
            _ => {
                warn!("LPUART write: bad offset {:#x}", offset);
            }
        }
    }
}

impl BusDevice for Lpuart<'_> {
    fn read(&mut self, offset: u64, size: usize) -> u32 {
        if !word_access("LPUART", offset, size) {
            return 0;
        }
        self.read_reg(offset)
    }

    fn write(&mut self, offset: u64, value: u32, size: usize) {
        if !word_access("LPUART", offset, size) {
            return;
        }
        self.write_reg(offset, value);
    }
}
