// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2025.

//! S32K358 Periodic Interrupt Timer (PIT).
//!
//! Four independent countdown channels behind one register bank and one
//! outgoing interrupt line. Each channel mirrors its load value and current
//! value straight into a [`SwTimer`]; the registers never cache a counter.
//!
//! Host interface:
//! - clock input: the peripheral clock, queried for its period
//! - MMIO region: 0x140 bytes of registers via [`BusDevice`]
//! - interrupt output: one aggregated line
//!
//! The real-time interrupt, timer chaining and freeze-in-debug are not
//! modeled: their control bits are stored and diagnosed as unimplemented.

use log::warn;
use tock_registers::register_bitfields;

use crate::bus::{word_access, BusDevice, InterruptLine};
use crate::registers::RegModel;
use crate::time::{Clock, SwTimer};
use crate::ConfigError;

/// Size of the MMIO register bank.
pub const PIT_MMIO_LEN: u64 = 0x140;

const NUM_CHANNELS: usize = 4;

// Channel registers repeat every 0x10 bytes starting at 0x100.
const MCR_OFFSET: u64 = 0x000;
const CHANNEL_BASE: u64 = 0x100;
const CHANNEL_STRIDE: u64 = 0x10;
const LDVAL_REG: u64 = 0x0;
const CVAL_REG: u64 = 0x4;
const TCTRL_REG: u64 = 0x8;
const TFLG_REG: u64 = 0xC;

register_bitfields![u32,
    MCR [
        FRZ 0,
        MDIS 1,
        MDIS_RTI 2
    ],
    TCTRL [
        TEN 0,
        TIE 1,
        CHN 2
    ],
    TFLG [
        TIF 0
    ],
];

const TCTRL_NAMES: [&str; NUM_CHANNELS] =
    ["PIT TCTRL0", "PIT TCTRL1", "PIT TCTRL2", "PIT TCTRL3"];

struct PitChannel {
    ctrl: RegModel<TCTRL::Register>,
    flag: RegModel<TFLG::Register>,
    timer: SwTimer,
}

impl PitChannel {
    fn new(idx: usize) -> PitChannel {
        PitChannel {
            ctrl: RegModel::new(
                0,
                TCTRL::TEN::SET + TCTRL::TIE::SET + TCTRL::CHN::SET,
                TCTRL_NAMES[idx],
            ),
            flag: RegModel::read_only(0, "PIT TFLG"),
            timer: SwTimer::new(),
        }
    }

    fn interrupting(&self) -> bool {
        self.ctrl.is_set(TCTRL::TEN)
            && self.ctrl.is_set(TCTRL::TIE)
            && self.flag.is_set(TFLG::TIF)
    }
}

pub struct Pit<'a> {
    mcr: RegModel<MCR::Register>,
    channels: [PitChannel; NUM_CHANNELS],
    clock: &'a dyn Clock,
    irq: &'a dyn InterruptLine,
}

impl<'a> Pit<'a> {
    /// Build a PIT counting `clock`. The clock must have a source connected.
    pub fn new(clock: &'a dyn Clock, irq: &'a dyn InterruptLine) -> Result<Pit<'a>, ConfigError> {
        let period_ns = clock.period_ns();
        if period_ns == 0 {
            return Err(ConfigError::ClockNotConnected);
        }
        let mut pit = Pit {
            mcr: RegModel::new(
                0,
                MCR::FRZ::SET + MCR::MDIS::SET + MCR::MDIS_RTI::SET,
                "PIT MCR",
            ),
            channels: core::array::from_fn(PitChannel::new),
            clock,
            irq,
        };
        for ch in pit.channels.iter_mut() {
            ch.timer.begin();
            ch.timer.set_period_ns(period_ns);
            ch.timer.commit();
        }
        pit.reset();
        Ok(pit)
    }

    /// Return every channel to its power-on state: disabled, flag clear,
    /// limit 0.
    pub fn reset(&mut self) {
        for ch in self.channels.iter_mut() {
            ch.ctrl.set_raw(0);
            ch.flag.set_raw(0);
            ch.timer.begin();
            ch.timer.stop();
            ch.timer.set_limit(0, true);
            ch.timer.commit();
        }
        self.mcr.set_raw(0);
        self.irq.set_level(false);
    }

    /// The peripheral clock changed; propagate the new period.
    pub fn clk_update(&mut self) {
        let period_ns = self.clock.period_ns();
        for ch in self.channels.iter_mut() {
            ch.timer.begin();
            ch.timer.set_period_ns(period_ns);
            ch.timer.commit();
        }
    }

    /// Consume `ns` of virtual time on every channel, flagging expiries.
    pub fn advance(&mut self, ns: u64) {
        for idx in 0..NUM_CHANNELS {
            let expiries = self.channels[idx].timer.advance(ns);
            if expiries > 0 {
                self.channel_tick(idx);
            }
        }
    }

    /// Rebuild the software timers after a snapshot load: the registers are
    /// authoritative, the timers carry no persisted state of their own.
    pub fn post_load(&mut self) {
        self.clk_update();
        for idx in 0..NUM_CHANNELS {
            self.update_channel_run_state(idx);
        }
        self.update_irq();
    }

    fn channel_tick(&mut self, idx: usize) {
        let ch = &mut self.channels[idx];
        // The flag always latches; the line only follows when the channel
        // has interrupts enabled.
        ch.flag.modify(TFLG::TIF::SET);
        if ch.ctrl.is_set(TCTRL::TIE) {
            self.irq.set_level(true);
        }
    }

    fn update_irq(&mut self) {
        if self.mcr.is_set(MCR::MDIS) {
            self.irq.set_level(false);
            return;
        }
        let pending = self.channels.iter().any(PitChannel::interrupting);
        self.irq.set_level(pending);
    }

    fn update_channel_run_state(&mut self, idx: usize) {
        let enabled =
            !self.mcr.is_set(MCR::MDIS) && self.channels[idx].ctrl.is_set(TCTRL::TEN);
        let timer = &mut self.channels[idx].timer;
        timer.begin();
        if enabled {
            timer.run();
        } else {
            timer.stop();
        }
        timer.commit();
    }

    fn channel_reg(offset: u64) -> (usize, u64) {
        let rel = offset - CHANNEL_BASE;
        ((rel / CHANNEL_STRIDE) as usize, rel % CHANNEL_STRIDE)
    }

    fn read_reg(&mut self, offset: u64) -> u32 {
        match offset {
            MCR_OFFSET => self.mcr.get(),
            CHANNEL_BASE..=0x13F => {
                let (idx, reg) = Self::channel_reg(offset);
                let ch = &self.channels[idx];
                match reg {
                    LDVAL_REG => ch.timer.limit(),
                    CVAL_REG => ch.timer.count(),
                    TCTRL_REG => ch.ctrl.get(),
                    TFLG_REG => ch.flag.get(),
                    _ => {
                        warn!("PIT read: bad offset {:#x}", offset);
                        0
                    }
                }
            }
            _ => {
                warn!("PIT read: bad offset {:#x}", offset);
                0
            }
        }
    }

    fn write_reg(&mut self, offset: u64, value: u32) {
        match offset {
            MCR_OFFSET => {
                self.mcr.guest_write(value);
                if value & (MCR::FRZ::SET + MCR::MDIS_RTI::SET).mask() != 0 {
                    warn!("PIT: FRZ and MDIS_RTI are not supported");
                }
                // Gating the module starts or stops every channel at once.
                for idx in 0..NUM_CHANNELS {
                    self.update_channel_run_state(idx);
                }
                self.update_irq();
            }
            CHANNEL_BASE..=0x13F => {
                let (idx, reg) = Self::channel_reg(offset);
                match reg {
                    LDVAL_REG => {
                        let enabled = !self.mcr.is_set(MCR::MDIS)
                            && self.channels[idx].ctrl.is_set(TCTRL::TEN);
                        let timer = &mut self.channels[idx].timer;
                        timer.begin();
                        // The counter in flight is untouched; the new limit
                        // loads at the next wrap.
                        timer.set_limit(value, false);
                        if enabled {
                            timer.run();
                        }
                        timer.commit();
                    }
                    CVAL_REG => {
                        warn!("PIT write: CVAL{} is read-only", idx);
                    }
                    TCTRL_REG => {
                        self.channels[idx].ctrl.guest_write(value);
                        if value & TCTRL::CHN::SET.mask() != 0 {
                            warn!("PIT: chain mode is not supported");
                        }
                        // Enabling TIE with the flag already pending raises
                        // the line here, not at the next expiry.
                        self.update_irq();
                        self.update_channel_run_state(idx);
                    }
                    TFLG_REG => {
                        let residue = value & !TFLG::TIF::SET.mask();
                        if residue != 0 {
                            warn!(
                                "PIT TFLG{}: dropping write to reserved bits {:#010x}",
                                idx, residue
                            );
                        }
                        if value & TFLG::TIF::SET.mask() != 0 {
                            self.channels[idx].flag.modify(TFLG::TIF::CLEAR);
                        }
                        self.update_irq();
                    }
                    _ => {
                        warn!("PIT write: bad offset {:#x}", offset);
                    }
                }
            }
            _ => {
                warn!("PIT write: bad offset {:#x}", offset);
            }
        }
    }
}

impl BusDevice for Pit<'_> {
    fn read(&mut self, offset: u64, size: usize) -> u32 {
        if !word_access("PIT", offset, size) {
            return 0;
        }
        self.read_reg(offset)
    }

    fn write(&mut self, offset: u64, value: u32, size: usize) {
        if !word_access("PIT", offset, size) {
            return;
        }
        self.write_reg(offset, value);
    }
}
