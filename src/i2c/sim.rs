// Licensed under the Apache-2.0 license

//! In-memory I2C register model.
//!
//! Implements [`I2cRegisters`] over plain state so the transfer engines can
//! run on a host: the model reproduces the silicon's side-effecting flag
//! protocols (SB cleared by the address write, ADDR cleared by the
//! SR1-then-SR2 read pair, RXNE refilled from a scripted feed) and records
//! every register access in order, so tests can assert not just what was
//! written but when.
//!
//! The model is also usable outside `cfg(test)`, e.g. to exercise
//! application logic against the driver without hardware.

use core::cell::RefCell;

use heapless::Vec;

use super::regs::{cr1, sr1, sr2, I2cRegisters, Reg};

const TRACE_DEPTH: usize = 256;
const DATA_DEPTH: usize = 64;

/// One recorded register access.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Access {
    Read(Reg),
    Write(Reg, u32),
}

#[derive(Copy, Clone, PartialEq, Eq)]
enum Direction {
    Write,
    Read,
}

struct SimState {
    cr1: u32,
    cr2: u32,
    oar1: u32,
    dr: u32,
    sr1: u32,
    sr2: u32,
    ccr: u32,
    trise: u32,
    behavioral: bool,
    direction: Direction,
    addr_byte: Option<u8>,
    sr1_seen_addr: bool,
    sent: Vec<u8, DATA_DEPTH>,
    rx_feed: Vec<u8, DATA_DEPTH>,
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

    fn after_address_phase(&mut self) {
        match self.direction {
            Direction::Write => self.sr1 |= sr1::TXE,
            Direction::Read => {
                if self.rx_pending() {
                    self.sr1 |= sr1::RXNE;
                }
            }
        }
    }
}

/// Simulated I2C register block. Register access goes through `&I2cSim`.
pub struct I2cSim {
    inner: RefCell<SimState>,
}

impl Default for I2cSim {
    fn default() -> Self {
        Self::new()
    }
}

impl I2cSim {
    /// Model that advances flags the way the peripheral would (start sets
    /// SB, the address write raises ADDR, data writes complete instantly).
    #[must_use]
    pub fn new() -> Self {
        Self::with_behavior(true)
    }

    /// Model whose flags only change when the test sets them. A blocking
    /// wait against this model never completes on its own, which is how a
    /// wedged bus is simulated.
    #[must_use]
    pub fn inert() -> Self {
        Self::with_behavior(false)
    }

    fn with_behavior(behavioral: bool) -> Self {
        Self {
            inner: RefCell::new(SimState {
                cr1: 0,
                cr2: 0,
                oar1: 0,
                dr: 0,
                sr1: 0,
                sr2: 0,
                ccr: 0,
                trise: 0,
                behavioral,
                direction: Direction::Write,
                addr_byte: None,
                sr1_seen_addr: false,
                sent: Vec::new(),
                rx_feed: Vec::new(),
                rx_pos: 0,
                trace: Vec::new(),
            }),
        }
    }

    /// Queues bytes the modeled slave will return on data-register reads.
    pub fn feed_rx(&self, bytes: &[u8]) {
        let mut state = self.inner.borrow_mut();
        for &byte in bytes {
            let _ = state.rx_feed.push(byte);
        }
        if state.behavioral && state.direction == Direction::Read {
            state.sr1 |= sr1::RXNE;
        }
    }

    pub fn set_sr1_bits(&self, bits: u32) {
        self.inner.borrow_mut().sr1 |= bits;
    }

    pub fn clear_sr1_bits(&self, bits: u32) {
        self.inner.borrow_mut().sr1 &= !bits;
    }

    pub fn set_sr2_bits(&self, bits: u32) {
        self.inner.borrow_mut().sr2 |= bits;
    }

    /// Raw register view for assertions; does not appear in the trace and
    /// triggers no flag protocol.
    #[must_use]
    pub fn peek(&self, reg: Reg) -> u32 {
        let state = self.inner.borrow();
        match reg {
            Reg::Cr1 => state.cr1,
            Reg::Cr2 => state.cr2,
            Reg::Oar1 => state.oar1,
            Reg::Dr => state.dr,
            Reg::Sr1 => state.sr1,
            Reg::Sr2 => state.sr2,
            Reg::Ccr => state.ccr,
            Reg::Trise => state.trise,
        }
    }

    /// Address byte captured from the address phase, direction bit included.
    #[must_use]
    pub fn addr_byte(&self) -> Option<u8> {
        self.inner.borrow().addr_byte
    }

    /// Data bytes written after the address phase, in order.
    #[must_use]
    pub fn sent(&self) -> Vec<u8, DATA_DEPTH> {
        self.inner.borrow().sent.clone()
    }

    /// The recorded access sequence.
    #[must_use]
    pub fn trace(&self) -> Vec<Access, TRACE_DEPTH> {
        self.inner.borrow().trace.clone()
    }

    /// Number of stop conditions written so far.
    #[must_use]
    pub fn stop_count(&self) -> usize {
        self.inner
            .borrow()
            .trace
            .iter()
            .filter(|a| matches!(a, Access::Write(Reg::Cr1, v) if v & cr1::STOP != 0))
            .count()
    }

    fn do_read(&self, reg: Reg) -> u32 {
        let mut state = self.inner.borrow_mut();
        state.record(Access::Read(reg));
        match reg {
            Reg::Cr1 => state.cr1,
            Reg::Cr2 => state.cr2,
            Reg::Oar1 => state.oar1,
            Reg::Ccr => state.ccr,
            Reg::Trise => state.trise,
            Reg::Sr1 => {
                if state.sr1 & sr1::ADDR != 0 {
                    state.sr1_seen_addr = true;
                }
                state.sr1
            }
            Reg::Sr2 => {
                let value = state.sr2;
                if state.sr1_seen_addr && state.sr1 & sr1::ADDR != 0 {
                    state.sr1 &= !sr1::ADDR;
                    state.sr1_seen_addr = false;
                    if state.behavioral {
                        state.after_address_phase();
                    }
                }
                value
            }
            Reg::Dr => {
                if state.behavioral && state.direction == Direction::Read {
                    if let Some(&byte) = state.rx_feed.get(state.rx_pos) {
                        state.rx_pos += 1;
                        state.dr = byte.into();
                    }
                    if state.rx_pending() {
                        state.sr1 |= sr1::RXNE;
                    } else {
                        state.sr1 &= !sr1::RXNE;
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
            Reg::Cr1 => {
                if state.behavioral {
                    if value & cr1::START != 0 {
                        state.sr1 |= sr1::SB;
                        state.sr2 |= sr2::MSL | sr2::BUSY;
                    }
                    if value & cr1::STOP != 0 {
                        state.sr2 &= !(sr2::MSL | sr2::BUSY);
                        state.sr1 &= !sr1::BTF;
                    }
                }
                state.cr1 = value & !(cr1::START | cr1::STOP);
            }
            Reg::Cr2 => state.cr2 = value,
            Reg::Oar1 => state.oar1 = value,
            Reg::Ccr => state.ccr = value,
            Reg::Trise => state.trise = value,
            Reg::Sr1 => state.sr1 = value,
            Reg::Sr2 => state.sr2 = value,
            Reg::Dr => {
                state.dr = value;
                if state.behavioral {
                    if state.sr1 & sr1::SB != 0 {
                        state.addr_byte = Some(value as u8);
                        state.direction = if value & 1 != 0 {
                            Direction::Read
                        } else {
                            Direction::Write
                        };
                        state.sr1 &= !sr1::SB;
                        state.sr1 |= sr1::ADDR;
                    } else if state.direction == Direction::Write {
                        let _ = state.sent.push(value as u8);
                        state.sr1 |= sr1::TXE | sr1::BTF;
                    }
                }
            }
        }
    }
}

impl I2cRegisters for &I2cSim {
    fn read(&self, reg: Reg) -> u32 {
        self.do_read(reg)
    }

    fn write(&mut self, reg: Reg, value: u32) {
        self.do_write(reg, value);
    }
}
