// Licensed under the Apache-2.0 license

//! In-memory SPI register model.
//!
//! Implements [`SpiRegisters`] over plain state: the transmit-empty flag
//! stays asserted (frames shift out instantly), receive data comes from a
//! scripted feed, and the overrun flag obeys the hardware clear protocol —
//! it only falls after the status register and then the data register have
//! been read, in that order. Every access is recorded for ordering
//! assertions.

use core::cell::RefCell;

use heapless::Vec;

use super::regs::{sr, Reg, SpiRegisters};

const TRACE_DEPTH: usize = 256;
const DATA_DEPTH: usize = 64;

/// One recorded register access.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Access {
    Read(Reg),
    Write(Reg, u32),
}

struct SimState {
    cr1: u32,
    cr2: u32,
    sr: u32,
    dr: u32,
    behavioral: bool,
    ovr_sr_read: bool,
    sent: Vec<u16, DATA_DEPTH>,
    rx_feed: Vec<u16, DATA_DEPTH>,
    rx_pos: usize,
    trace: Vec<Access, TRACE_DEPTH>,
}

impl SimState {
    fn record(&mut self, access: Access) {
        let _ = self.trace.push(access);
    }

    fn rx_pending(&self) -> bool {
        self.rx_pos < self.rx_feed.len()
    }
}

/// Simulated SPI register block. Register access goes through `&SpiSim`.
pub struct SpiSim {
    inner: RefCell<SimState>,
}

impl Default for SpiSim {
    fn default() -> Self {
        Self::new()
    }
}

impl SpiSim {
    /// Model with an always-ready transmitter and a scripted receive feed.
    #[must_use]
    pub fn new() -> Self {
        Self::with_behavior(true)
    }

    /// Model whose flags only change when the test sets them.
    #[must_use]
    pub fn inert() -> Self {
        Self::with_behavior(false)
    }

    fn with_behavior(behavioral: bool) -> Self {
        Self {
            inner: RefCell::new(SimState {
                cr1: 0,
                cr2: 0,
                sr: if behavioral { sr::TXE } else { 0 },
                dr: 0,
                behavioral,
                ovr_sr_read: false,
                sent: Vec::new(),
                rx_feed: Vec::new(),
                rx_pos: 0,
                trace: Vec::new(),
            }),
        }
    }

    /// Queues frames returned by subsequent data-register reads.
    pub fn feed_rx(&self, words: &[u16]) {
        let mut state = self.inner.borrow_mut();
        for &word in words {
            let _ = state.rx_feed.push(word);
        }
        if state.behavioral && state.rx_pending() {
            state.sr |= sr::RXNE;
        }
    }

    pub fn set_sr_bits(&self, bits: u32) {
        self.inner.borrow_mut().sr |= bits;
    }

    pub fn clear_sr_bits(&self, bits: u32) {
        self.inner.borrow_mut().sr &= !bits;
    }

    /// Raw register view for assertions; not recorded, no flag protocol.
    #[must_use]
    pub fn peek(&self, reg: Reg) -> u32 {
        let state = self.inner.borrow();
        match reg {
            Reg::Cr1 => state.cr1,
            Reg::Cr2 => state.cr2,
            Reg::Sr => state.sr,
            Reg::Dr => state.dr,
        }
    }

    /// Frames written to the data register, in order.
    #[must_use]
    pub fn sent(&self) -> Vec<u16, DATA_DEPTH> {
        self.inner.borrow().sent.clone()
    }

    /// The recorded access sequence.
    #[must_use]
    pub fn trace(&self) -> Vec<Access, TRACE_DEPTH> {
        self.inner.borrow().trace.clone()
    }

    fn do_read(&self, reg: Reg) -> u32 {
        let mut state = self.inner.borrow_mut();
        state.record(Access::Read(reg));
        match reg {
            Reg::Cr1 => state.cr1,
            Reg::Cr2 => state.cr2,
            Reg::Sr => {
                if state.sr & sr::OVR != 0 {
                    state.ovr_sr_read = true;
                }
                state.sr
            }
            Reg::Dr => {
                if state.ovr_sr_read && state.sr & sr::OVR != 0 {
                    state.sr &= !sr::OVR;
                    state.ovr_sr_read = false;
                }
                if state.behavioral {
                    if let Some(&word) = state.rx_feed.get(state.rx_pos) {
                        state.rx_pos += 1;
                        state.dr = word.into();
                    }
                    if state.rx_pending() {
                        state.sr |= sr::RXNE;
                    } else {
                        state.sr &= !sr::RXNE;
                    }
                }
                state.dr
            }
        }
    }

    fn do_write(&self, reg: Reg, value: u32) {
        let mut state = self.inner.borrow_mut();
        state.record(Access::Write(reg, value));
        match reg {
            Reg::Cr1 => state.cr1 = value,
            Reg::Cr2 => state.cr2 = value,
            Reg::Sr => state.sr = value,
            Reg::Dr => {
                state.dr = value;
                if state.behavioral {
                    let _ = state.sent.push(value as u16);
                }
            }
        }
    }
}

impl SpiRegisters for &SpiSim {
    fn read(&self, reg: Reg) -> u32 {
        self.do_read(reg)
    }

    fn write(&mut self, reg: Reg, value: u32) {
        self.do_write(reg, value);
    }
}
