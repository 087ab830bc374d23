// Licensed under the Apache-2.0 license

//! I2C controller driver.
//!
//! One [`I2cController`] drives one hardware instance through the
//! [`I2cRegisters`] capability. Blocking master transfers poll status flags
//! through the controller's wait strategy; interrupt-driven transfers arm
//! the event/buffer/error interrupt enables and are advanced by
//! [`I2cController::handle_event_interrupt`] /
//! [`I2cController::handle_error_interrupt`], which the board's interrupt
//! dispatch must call from the instance's EV and ER lines.
//!
//! The handle is the only shared state between the start entry points and
//! the interrupt handlers; the [`TransferState`] field gates it (see
//! `crate::common`). The application serializes all access to one handle.

use embedded_hal::i2c::{Operation, SevenBitAddress};

use crate::common::{Busy, BusyWait, Logger, NoOpLogger, TransferState, WaitStrategy};
use crate::syscon::BusControl;

use super::common::{
    AckControl, DutyCycle, I2cConfig, I2cError, I2cEvent, I2cEvents, NullEvents,
    STANDARD_MODE_LIMIT_HZ,
};
use super::regs::{ccr, cr1, cr2, oar1, sr1, sr2, trise, I2cRegisters, Reg};

#[derive(Copy, Clone, PartialEq, Eq)]
enum Direction {
    Write = 0,
    Read = 1,
}

/// Error-flag-to-error mapping walked by the error interrupt handler. Any
/// subset of these may be asserted at once; each is cleared and reported
/// independently.
const ERROR_FLAGS: [(u32, I2cError); 5] = [
    (sr1::BERR, I2cError::Bus),
    (sr1::ARLO, I2cError::ArbitrationLost),
    (sr1::AF, I2cError::AckFailure),
    (sr1::OVR, I2cError::Overrun),
    (sr1::TIMEOUT, I2cError::Timeout),
];

/// Driver handle for one I2C instance.
///
/// `'buf` bounds the buffers lent to interrupt-driven transfers: they stay
/// borrowed by the controller until completion, when the received bytes are
/// handed back through the events capability.
pub struct I2cController<
    'buf,
    R: I2cRegisters,
    E: I2cEvents = NullEvents,
    W: WaitStrategy = BusyWait,
    L: Logger = NoOpLogger,
> {
    regs: R,
    pub config: I2cConfig,
    pub events: E,
    pub logger: L,
    wait: W,
    state: TransferState,
    tx: Option<&'buf [u8]>,
    tx_len: usize,
    rx: Option<&'buf mut [u8]>,
    rx_len: usize,
    rx_size: usize,
    target_addr: SevenBitAddress,
    repeated_start: bool,
}

impl<'buf, R: I2cRegisters> I2cController<'buf, R> {
    /// Controller with the default no-op callback, unbounded waits, and no
    /// logging.
    pub fn new(regs: R, config: I2cConfig) -> Self {
        Self::with_parts(regs, config, NullEvents, BusyWait, NoOpLogger)
    }
}

impl<'buf, R, E, W, L> I2cController<'buf, R, E, W, L>
where
    R: I2cRegisters,
    E: I2cEvents,
    W: WaitStrategy,
    L: Logger,
{
    pub fn with_parts(regs: R, config: I2cConfig, events: E, wait: W, logger: L) -> Self {
        Self {
            regs,
            config,
            events,
            logger,
            wait,
            state: TransferState::Ready,
            tx: None,
            tx_len: 0,
            rx: None,
            rx_len: 0,
            rx_size: 0,
            target_addr: 0,
            repeated_start: false,
        }
    }

    #[must_use]
    pub fn state(&self) -> TransferState {
        self.state
    }

    /// Programs timing and addressing from the configuration.
    ///
    /// Enables the bus clock, then writes CR2.FREQ, CCR (standard-mode
    /// divisor below 100 kHz, fast-mode divisor with the duty-cycle bit at
    /// or above), TRISE, OAR1, and the default ACK policy. Never fails; a
    /// nonsensical configuration produces nonsensical register values.
    pub fn init(&mut self, syscon: &mut impl BusControl) {
        syscon.enable_clock();
        let pclk = syscon.bus_clock().raw();
        let freq_mhz = pclk / 1_000_000;
        self.regs
            .modify(Reg::Cr2, |v| (v & !cr2::FREQ_MASK) | (freq_mhz & cr2::FREQ_MASK));

        let scl = self.config.scl.raw().max(1);
        let fast = scl >= STANDARD_MODE_LIMIT_HZ;
        let divisor = if fast {
            match self.config.duty_cycle {
                DutyCycle::Ratio2to1 => 3 * scl,
                DutyCycle::Ratio16to9 => 2 * scl,
            }
        } else {
            2 * scl
        };
        let mut ccr_value = (pclk / divisor) & ccr::CCR_MASK;
        if fast {
            ccr_value |= ccr::FS;
            if self.config.duty_cycle == DutyCycle::Ratio16to9 {
                ccr_value |= ccr::DUTY;
            }
        }
        self.regs.write(Reg::Ccr, ccr_value);

        // Maximum SCL rise time: 1000 ns standard mode, 300 ns fast mode.
        let rise = if fast {
            freq_mhz * 300 / 1_000 + 1
        } else {
            freq_mhz + 1
        };
        self.regs.write(Reg::Trise, rise & trise::TRISE_MASK);

        self.regs.write(
            Reg::Oar1,
            (u32::from(self.config.own_address) << oar1::ADD_SHIFT) | oar1::ALWAYS_ONE,
        );
        if self.config.ack == AckControl::Enabled {
            self.set_ack(true);
        }
        self.logger
            .log(format_args!("i2c: init ccr={ccr_value:#x} trise={rise}"));
    }

    /// Resets the peripheral through the reset collaborator and gates its
    /// clock off. The handle returns to `Ready` with no buffers attached.
    pub fn deinit(&mut self, syscon: &mut impl BusControl) {
        syscon.pulse_reset();
        syscon.disable_clock();
        self.tx = None;
        self.tx_len = 0;
        self.rx = None;
        self.rx_len = 0;
        self.rx_size = 0;
        self.state = TransferState::Ready;
    }

    /// Sets the peripheral-enable bit.
    pub fn enable(&mut self) {
        self.regs.modify(Reg::Cr1, |v| v | cr1::PE);
    }

    /// Clears the peripheral-enable bit.
    pub fn disable(&mut self) {
        self.regs.modify(Reg::Cr1, |v| v & !cr1::PE);
    }

    // ---------------------------------------------------------------- blocking

    /// Blocking master write.
    ///
    /// Returns once the whole transfer, including the stop condition when
    /// `repeated_start` is false, is complete on the wire. With the default
    /// wait strategy an unresponsive bus hangs the caller; a bounded
    /// strategy surfaces [`I2cError::Timeout`] instead.
    pub fn master_write(
        &mut self,
        addr: SevenBitAddress,
        bytes: &[u8],
        repeated_start: bool,
    ) -> Result<(), I2cError> {
        self.generate_start();
        self.wait_flag(sr1::SB)?;
        self.send_address(addr, Direction::Write);
        self.wait_flag(sr1::ADDR)?;
        self.clear_addr();
        for &byte in bytes {
            self.wait_flag(sr1::TXE)?;
            self.regs.write(Reg::Dr, byte.into());
        }
        // TXE and BTF together mean both data and shift register are empty;
        // only then may the stop condition go out.
        self.wait_flag(sr1::TXE)?;
        self.wait_flag(sr1::BTF)?;
        if !repeated_start {
            self.generate_stop();
        }
        Ok(())
    }

    /// Blocking master read.
    ///
    /// Single-byte reads disable acknowledge before the ADDR clear so the
    /// one incoming byte is NACKed; longer reads disable acknowledge and
    /// generate the stop when exactly two bytes remain. The configured ACK
    /// policy is restored afterwards.
    pub fn master_read(
        &mut self,
        addr: SevenBitAddress,
        buffer: &mut [u8],
        repeated_start: bool,
    ) -> Result<(), I2cError> {
        self.generate_start();
        self.wait_flag(sr1::SB)?;
        self.send_address(addr, Direction::Read);
        self.wait_flag(sr1::ADDR)?;

        let len = buffer.len();
        match len {
            0 => {
                self.clear_addr();
                if !repeated_start {
                    self.generate_stop();
                }
            }
            1 => {
                self.set_ack(false);
                self.clear_addr();
                self.wait_flag(sr1::RXNE)?;
                if !repeated_start {
                    self.generate_stop();
                }
                let byte = self.read_dr();
                if let Some(slot) = buffer.first_mut() {
                    *slot = byte;
                }
            }
            _ => {
                self.clear_addr();
                for index in 0..len {
                    self.wait_flag(sr1::RXNE)?;
                    if len - index == 2 {
                        self.set_ack(false);
                        if !repeated_start {
                            self.generate_stop();
                        }
                    }
                    let byte = self.read_dr();
                    if let Some(slot) = buffer.get_mut(index) {
                        *slot = byte;
                    }
                }
            }
        }
        if self.config.ack == AckControl::Enabled {
            self.set_ack(true);
        }
        Ok(())
    }

    // ------------------------------------------------------- interrupt-driven

    /// Starts an interrupt-driven master write and returns immediately.
    ///
    /// Rejected with [`Busy`] (and no side effects) while another transfer
    /// is in flight. On success the start condition is generated and the
    /// event, buffer, and error interrupt enables are armed; completion is
    /// reported through the events capability.
    pub fn write_it(
        &mut self,
        addr: SevenBitAddress,
        bytes: &'buf [u8],
        repeated_start: bool,
    ) -> Result<(), Busy> {
        match self.state {
            TransferState::Ready => {}
            busy => return Err(Busy(busy)),
        }
        self.tx = Some(bytes);
        self.tx_len = bytes.len();
        self.target_addr = addr;
        self.repeated_start = repeated_start;
        self.state = TransferState::BusyTx;
        self.generate_start();
        self.enable_transfer_interrupts();
        Ok(())
    }

    /// Starts an interrupt-driven master read and returns immediately.
    ///
    /// The buffer stays lent to the controller until the completion
    /// callback, which receives the received bytes.
    pub fn read_it(
        &mut self,
        addr: SevenBitAddress,
        buffer: &'buf mut [u8],
        repeated_start: bool,
    ) -> Result<(), Busy> {
        match self.state {
            TransferState::Ready => {}
            busy => return Err(Busy(busy)),
        }
        self.rx_len = buffer.len();
        self.rx_size = buffer.len();
        self.rx = Some(buffer);
        self.target_addr = addr;
        self.repeated_start = repeated_start;
        self.state = TransferState::BusyRx;
        self.generate_start();
        self.enable_transfer_interrupts();
        Ok(())
    }

    /// Aborts an in-flight interrupt-driven transfer.
    ///
    /// Disables the transfer interrupts, releases the buffers, restores the
    /// ACK policy, and issues a stop to release the bus if a transfer was
    /// in flight. No completion callback fires.
    pub fn abort(&mut self) {
        let was_busy = self.state != TransferState::Ready;
        self.disable_transfer_interrupts();
        self.tx = None;
        self.tx_len = 0;
        self.rx = None;
        self.rx_len = 0;
        self.rx_size = 0;
        if self.config.ack == AckControl::Enabled {
            self.set_ack(true);
        }
        if was_busy {
            self.generate_stop();
        }
        self.state = TransferState::Ready;
    }

    /// Event interrupt service handler. Call once per EV interrupt.
    ///
    /// Each asserted status flag is handled independently within one
    /// invocation, advancing the in-flight transfer by one hardware event's
    /// worth of work.
    pub fn handle_event_interrupt(&mut self) {
        let enables = self.regs.read(Reg::Cr2);
        let event_enabled = enables & cr2::ITEVTEN != 0;
        let buffer_enabled = enables & cr2::ITBUFEN != 0;

        // SB: start condition out (master only); send the address byte with
        // the direction of the in-flight operation.
        if event_enabled && self.flag(sr1::SB) {
            match self.state {
                TransferState::BusyTx => self.send_address(self.target_addr, Direction::Write),
                TransferState::BusyRx => self.send_address(self.target_addr, Direction::Read),
                TransferState::Ready => {}
            }
        }

        // ADDR: address phase complete. For a 1-byte read the acknowledge
        // must already be off when the flag-clear sequence runs.
        if event_enabled && self.flag(sr1::ADDR) {
            if self.state == TransferState::BusyRx && self.rx_size == 1 {
                self.set_ack(false);
            }
            self.clear_addr();
        }

        if event_enabled && self.flag(sr1::BTF) {
            self.handle_byte_transfer_finished();
        }

        // STOPF: slave mode only; cleared by reading SR1 (already done by
        // the flag check) followed by a write to CR1, even if nothing in
        // CR1 changes.
        if event_enabled && self.flag(sr1::STOPF) {
            let value = self.regs.read(Reg::Cr1);
            self.regs.write(Reg::Cr1, value);
            self.events.on_event(I2cEvent::StopDetected);
        }

        if event_enabled && buffer_enabled && self.flag(sr1::TXE) {
            self.handle_transmit_empty();
        }

        if event_enabled && buffer_enabled && self.flag(sr1::RXNE) {
            self.handle_receive_not_empty();
        }
    }

    /// Error interrupt service handler. Call once per ER interrupt.
    ///
    /// Every asserted error flag is cleared by zeroing its SR1 bit and
    /// surfaced exactly once through the events capability. The in-flight
    /// transfer is left as-is; recovery (retry, [`Self::abort`], reset) is
    /// the application's decision.
    pub fn handle_error_interrupt(&mut self) {
        if self.regs.read(Reg::Cr2) & cr2::ITERREN == 0 {
            return;
        }
        for (mask, error) in ERROR_FLAGS {
            if self.flag(mask) {
                self.regs.modify(Reg::Sr1, |v| v & !mask);
                self.logger.log(format_args!("i2c: error {error:?}"));
                self.events.on_error(error);
            }
        }
    }

    // ------------------------------------------------------------- internals

    fn handle_byte_transfer_finished(&mut self) {
        if self.state == TransferState::BusyTx && self.flag(sr1::TXE) && self.tx_len == 0 {
            if !self.repeated_start {
                self.generate_stop();
            }
            self.close_transmission();
            self.events.on_event(I2cEvent::TxComplete);
        }
    }

    fn handle_transmit_empty(&mut self) {
        match self.state {
            TransferState::BusyTx => {
                if self.tx_len > 0 {
                    if let Some(buf) = self.tx {
                        let index = buf.len() - self.tx_len;
                        if let Some(&byte) = buf.get(index) {
                            self.regs.write(Reg::Dr, byte.into());
                        }
                    }
                    self.tx_len -= 1;
                }
            }
            TransferState::Ready => {
                // Addressed as a slave transmitter: the application supplies
                // one byte per interrupt.
                if self.regs.read(Reg::Sr2) & sr2::TRA != 0 {
                    let byte = self.events.on_data_requested();
                    self.regs.write(Reg::Dr, byte.into());
                }
            }
            TransferState::BusyRx => {}
        }
    }

    fn handle_receive_not_empty(&mut self) {
        match self.state {
            TransferState::BusyRx => self.master_rx_byte(),
            TransferState::Ready => {
                if self.regs.read(Reg::Sr2) & sr2::TRA == 0 {
                    let byte = self.read_dr();
                    self.events.on_data_received(byte);
                }
            }
            TransferState::BusyTx => {}
        }
    }

    /// One received byte in an interrupt-driven master read.
    ///
    /// The two-remaining check runs before the byte is taken out of the
    /// data register: at that iteration the last byte is already being
    /// shifted in, so acknowledge must drop (and the stop go out) now for
    /// the final byte to be NACKed.
    fn master_rx_byte(&mut self) {
        if self.rx_size > 1 && self.rx_len == 2 {
            self.set_ack(false);
            if !self.repeated_start {
                self.generate_stop();
            }
        }
        let byte = self.read_dr();
        let index = self.rx_size - self.rx_len;
        if let Some(buf) = self.rx.as_deref_mut() {
            if let Some(slot) = buf.get_mut(index) {
                *slot = byte;
            }
        }
        self.rx_len = self.rx_len.saturating_sub(1);

        if self.rx_len == 0 {
            if self.rx_size == 1 && !self.repeated_start {
                self.generate_stop();
            }
            let buffer = self.rx.take();
            let size = self.rx_size;
            self.close_reception();
            if let Some(buffer) = buffer {
                if let Some(data) = buffer.get(..size) {
                    self.events.on_event(I2cEvent::RxComplete(data));
                }
            }
        }
    }

    fn close_transmission(&mut self) {
        self.tx = None;
        self.tx_len = 0;
        self.state = TransferState::Ready;
        self.disable_transfer_interrupts();
    }

    fn close_reception(&mut self) {
        self.rx = None;
        self.rx_len = 0;
        self.rx_size = 0;
        self.state = TransferState::Ready;
        if self.config.ack == AckControl::Enabled {
            self.set_ack(true);
        }
        self.disable_transfer_interrupts();
    }

    fn flag(&self, mask: u32) -> bool {
        self.regs.read(Reg::Sr1) & mask != 0
    }

    fn wait_flag(&mut self, mask: u32) -> Result<(), I2cError> {
        let Self { regs, wait, .. } = self;
        wait.wait_until(|| regs.read(Reg::Sr1) & mask != 0)
            .map_err(|_| I2cError::Timeout)
    }

    fn generate_start(&mut self) {
        self.regs.modify(Reg::Cr1, |v| v | cr1::START);
    }

    fn generate_stop(&mut self) {
        self.regs.modify(Reg::Cr1, |v| v | cr1::STOP);
    }

    fn set_ack(&mut self, enabled: bool) {
        self.regs.modify(Reg::Cr1, |v| {
            if enabled {
                v | cr1::ACK
            } else {
                v & !cr1::ACK
            }
        });
    }

    fn send_address(&mut self, addr: SevenBitAddress, direction: Direction) {
        self.regs
            .write(Reg::Dr, (u32::from(addr) << 1) | direction as u32);
    }

    /// ADDR is cleared by reading SR1 and then SR2; both reads must happen
    /// even though the values are discarded.
    fn clear_addr(&mut self) {
        let _ = self.regs.read(Reg::Sr1);
        let _ = self.regs.read(Reg::Sr2);
    }

    fn read_dr(&mut self) -> u8 {
        self.regs.read(Reg::Dr) as u8
    }

    fn enable_transfer_interrupts(&mut self) {
        self.regs
            .modify(Reg::Cr2, |v| v | cr2::ITBUFEN | cr2::ITEVTEN | cr2::ITERREN);
    }

    fn disable_transfer_interrupts(&mut self) {
        self.regs
            .modify(Reg::Cr2, |v| v & !(cr2::ITBUFEN | cr2::ITEVTEN));
    }
}

impl<'buf, R, E, W, L> embedded_hal::i2c::ErrorType for I2cController<'buf, R, E, W, L>
where
    R: I2cRegisters,
    E: I2cEvents,
    W: WaitStrategy,
    L: Logger,
{
    type Error = I2cError;
}

impl<'buf, R, E, W, L> embedded_hal::i2c::I2c for I2cController<'buf, R, E, W, L>
where
    R: I2cRegisters,
    E: I2cEvents,
    W: WaitStrategy,
    L: Logger,
{
    fn read(&mut self, address: SevenBitAddress, read: &mut [u8]) -> Result<(), Self::Error> {
        self.master_read(address, read, false)
    }

    fn write(&mut self, address: SevenBitAddress, write: &[u8]) -> Result<(), Self::Error> {
        self.master_write(address, write, false)
    }

    fn write_read(
        &mut self,
        address: SevenBitAddress,
        write: &[u8],
        read: &mut [u8],
    ) -> Result<(), Self::Error> {
        self.master_write(address, write, true)?;
        self.master_read(address, read, false)
    }

    fn transaction(
        &mut self,
        address: SevenBitAddress,
        operations: &mut [Operation<'_>],
    ) -> Result<(), Self::Error> {
        let count = operations.len();
        for (index, operation) in operations.iter_mut().enumerate() {
            let hold = index + 1 < count;
            match operation {
                Operation::Write(bytes) => self.master_write(address, bytes, hold)?,
                Operation::Read(buffer) => self.master_read(address, buffer, hold)?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::common::I2cConfigBuilder;
    use super::super::sim::{Access, I2cSim};
    use super::*;
    use crate::common::BoundedWait;
    use crate::syscon::FixedClock;
    use fugit::HertzU32;
    use hex_literal::hex;

    #[derive(Default)]
    struct Recorder {
        tx_complete: usize,
        rx_complete: usize,
        rx_data: Vec<u8>,
        stop_events: usize,
        errors: Vec<I2cError>,
        slave_tx_byte: u8,
        slave_rx: Vec<u8>,
    }

    impl I2cEvents for Recorder {
        fn on_event(&mut self, event: I2cEvent<'_>) {
            match event {
                I2cEvent::TxComplete => self.tx_complete += 1,
                I2cEvent::RxComplete(data) => {
                    self.rx_complete += 1;
                    self.rx_data.extend_from_slice(data);
                }
                I2cEvent::StopDetected => self.stop_events += 1,
            }
        }

        fn on_error(&mut self, error: I2cError) {
            self.errors.push(error);
        }

        fn on_data_requested(&mut self) -> u8 {
            self.slave_tx_byte
        }

        fn on_data_received(&mut self, byte: u8) {
            self.slave_rx.push(byte);
        }
    }

    fn config() -> I2cConfig {
        I2cConfig::default()
    }

    fn controller<'buf, 's: 'buf>(
        sim: &'s I2cSim,
    ) -> I2cController<'buf, &'s I2cSim, Recorder, BusyWait, NoOpLogger> {
        let mut i2c =
            I2cController::with_parts(sim, config(), Recorder::default(), BusyWait, NoOpLogger);
        i2c.init(&mut FixedClock::new(HertzU32::MHz(16)));
        i2c
    }

    fn start_writes(sim: &I2cSim) -> usize {
        sim.trace()
            .iter()
            .filter(|a| matches!(a, Access::Write(Reg::Cr1, v) if v & cr1::START != 0))
            .count()
    }

    // First CR1 write that drops ACK without touching START/STOP.
    fn ack_disable_pos(sim: &I2cSim) -> Option<usize> {
        sim.trace().iter().position(|a| {
            matches!(a, Access::Write(Reg::Cr1, v)
                if v & cr1::ACK == 0 && v & (cr1::START | cr1::STOP) == 0)
        })
    }

    fn stop_pos(sim: &I2cSim) -> Option<usize> {
        sim.trace()
            .iter()
            .position(|a| matches!(a, Access::Write(Reg::Cr1, v) if v & cr1::STOP != 0))
    }

    fn dr_read_positions(sim: &I2cSim) -> Vec<usize> {
        sim.trace()
            .iter()
            .enumerate()
            .filter_map(|(i, a)| matches!(a, Access::Read(Reg::Dr)).then_some(i))
            .collect()
    }

    #[test]
    fn init_uses_standard_mode_formula_below_100khz() {
        let sim = I2cSim::new();
        let cfg = I2cConfigBuilder::new()
            .scl(HertzU32::kHz(50))
            .own_address(0x3A)
            .build();
        let mut i2c = I2cController::new(&sim, cfg);
        i2c.init(&mut FixedClock::new(HertzU32::MHz(16)));

        let ccr_value = sim.peek(Reg::Ccr);
        assert_eq!(ccr_value & ccr::CCR_MASK, 160); // 16 MHz / (2 * 50 kHz)
        assert_eq!(ccr_value & ccr::FS, 0);
        assert_eq!(sim.peek(Reg::Trise), 17);
        assert_eq!(sim.peek(Reg::Cr2) & cr2::FREQ_MASK, 16);
        assert_eq!(sim.peek(Reg::Oar1), (0x3A << 1) | oar1::ALWAYS_ONE);
    }

    #[test]
    fn init_uses_fast_mode_with_duty_divisor_at_or_above_100khz() {
        let sim = I2cSim::new();
        let cfg = I2cConfigBuilder::new().scl(HertzU32::kHz(400)).build();
        let mut i2c = I2cController::new(&sim, cfg);
        i2c.init(&mut FixedClock::new(HertzU32::MHz(50)));

        let ccr_value = sim.peek(Reg::Ccr);
        assert_eq!(ccr_value & ccr::CCR_MASK, 41); // 50 MHz / (3 * 400 kHz)
        assert_ne!(ccr_value & ccr::FS, 0);
        assert_eq!(ccr_value & ccr::DUTY, 0);
        assert_eq!(sim.peek(Reg::Trise), 16);
    }

    #[test]
    fn init_fast_mode_16_9_sets_duty_bit_and_divisor() {
        let sim = I2cSim::new();
        let cfg = I2cConfigBuilder::new()
            .scl(HertzU32::kHz(400))
            .duty_cycle(DutyCycle::Ratio16to9)
            .build();
        let mut i2c = I2cController::new(&sim, cfg);
        i2c.init(&mut FixedClock::new(HertzU32::MHz(50)));

        let ccr_value = sim.peek(Reg::Ccr);
        assert_eq!(ccr_value & ccr::CCR_MASK, 62); // 50 MHz / (2 * 400 kHz)
        assert_ne!(ccr_value & ccr::DUTY, 0);
    }

    #[test]
    fn blocking_write_sequences_start_address_data_stop() {
        let sim = I2cSim::new();
        let mut i2c = controller(&sim);
        let payload = hex!("11 22 33");

        i2c.master_write(0x50, &payload, false).unwrap();

        assert_eq!(sim.addr_byte(), Some(0xA0)); // 0x50 << 1, write bit 0
        assert_eq!(sim.sent().as_slice(), payload);
        assert_eq!(sim.stop_count(), 1);

        let trace = sim.trace();
        let start = trace
            .iter()
            .position(|a| matches!(a, Access::Write(Reg::Cr1, v) if v & cr1::START != 0))
            .unwrap();
        let addr = trace
            .iter()
            .position(|a| matches!(a, Access::Write(Reg::Dr, 0xA0)))
            .unwrap();
        let last_data = trace
            .iter()
            .rposition(|a| matches!(a, Access::Write(Reg::Dr, 0x33)))
            .unwrap();
        let stop = stop_pos(&sim).unwrap();
        assert!(start < addr && addr < last_data && last_data < stop);
    }

    #[test]
    fn blocking_read_single_byte_nacks_before_addr_clear() {
        let sim = I2cSim::new();
        sim.feed_rx(&[0xCD]);
        let mut i2c = controller(&sim);
        let mut buf = [0u8; 1];

        i2c.master_read(0x2C, &mut buf, false).unwrap();

        assert_eq!(buf, [0xCD]);
        assert_eq!(sim.addr_byte(), Some(0x59)); // 0x2C << 1 | read bit
        let trace = sim.trace();
        let ack_off = ack_disable_pos(&sim).unwrap();
        let sr2_read = trace
            .iter()
            .position(|a| matches!(a, Access::Read(Reg::Sr2)))
            .unwrap();
        assert!(ack_off < sr2_read);
        // ACK policy restored after the transaction.
        assert_ne!(sim.peek(Reg::Cr1) & cr1::ACK, 0);
    }

    #[test]
    fn blocking_read_multi_byte_nacks_at_two_remaining() {
        let sim = I2cSim::new();
        sim.feed_rx(&hex!("09 08 07"));
        let mut i2c = controller(&sim);
        let mut buf = [0u8; 3];

        i2c.master_read(0x2C, &mut buf, false).unwrap();

        assert_eq!(buf, hex!("09 08 07"));
        let reads = dr_read_positions(&sim);
        assert_eq!(reads.len(), 3);
        let ack_off = ack_disable_pos(&sim).unwrap();
        let stop = stop_pos(&sim).unwrap();
        // Exactly one byte read before acknowledge drops and the stop goes
        // out; both precede the second data-register read.
        assert!(reads[0] < ack_off);
        assert!(ack_off < stop);
        assert!(stop < reads[1]);
        assert_ne!(sim.peek(Reg::Cr1) & cr1::ACK, 0);
    }

    #[test]
    fn blocking_wait_times_out_on_wedged_bus() {
        let sim = I2cSim::inert();
        let mut i2c = I2cController::with_parts(
            &sim,
            config(),
            NullEvents,
            BoundedWait::new(16),
            NoOpLogger,
        );
        assert_eq!(
            i2c.master_write(0x50, &[0x00], false),
            Err(I2cError::Timeout)
        );
    }

    #[test]
    fn interrupt_write_runs_to_completion() {
        let sim = I2cSim::new();
        let payload = hex!("DE AD BE");
        let mut i2c = controller(&sim);

        i2c.write_it(0x50, &payload, false).unwrap();
        assert_eq!(i2c.state(), TransferState::BusyTx);
        assert_ne!(sim.peek(Reg::Cr2) & cr2::ITEVTEN, 0);
        assert_ne!(sim.peek(Reg::Cr2) & cr2::ITBUFEN, 0);
        assert_ne!(sim.peek(Reg::Cr2) & cr2::ITERREN, 0);

        for _ in 0..8 {
            i2c.handle_event_interrupt();
        }

        assert_eq!(sim.addr_byte(), Some(0xA0));
        assert_eq!(sim.sent().as_slice(), payload);
        assert_eq!(sim.stop_count(), 1);
        assert_eq!(i2c.state(), TransferState::Ready);
        assert_eq!(i2c.events.tx_complete, 1);
        // Buffer and event enables dropped at close; error enable stays.
        assert_eq!(sim.peek(Reg::Cr2) & (cr2::ITBUFEN | cr2::ITEVTEN), 0);
        assert_ne!(sim.peek(Reg::Cr2) & cr2::ITERREN, 0);
    }

    #[test]
    fn interrupt_write_with_repeated_start_suppresses_stop() {
        let sim = I2cSim::new();
        let payload = [0x42];
        let mut i2c = controller(&sim);

        i2c.write_it(0x50, &payload, true).unwrap();
        for _ in 0..8 {
            i2c.handle_event_interrupt();
        }

        assert_eq!(i2c.events.tx_complete, 1);
        assert_eq!(sim.stop_count(), 0);
    }

    #[test]
    fn interrupt_read_of_three_bytes_matches_scenario() {
        let sim = I2cSim::new();
        sim.feed_rx(&hex!("01 02 03"));
        let mut buf = [0u8; 3];
        let mut i2c = controller(&sim);

        i2c.read_it(0x2C, &mut buf, false).unwrap();
        for _ in 0..8 {
            i2c.handle_event_interrupt();
        }

        assert_eq!(i2c.events.rx_complete, 1);
        assert_eq!(i2c.events.rx_data, hex!("01 02 03"));
        assert_eq!(i2c.state(), TransferState::Ready);
        assert_eq!(sim.stop_count(), 1);

        let reads = dr_read_positions(&sim);
        assert_eq!(reads.len(), 3);
        let ack_off = ack_disable_pos(&sim).unwrap();
        let stop = stop_pos(&sim).unwrap();
        // NACK staged and stop generated with exactly two bytes remaining:
        // after the first data read, before the second.
        assert!(reads[0] < ack_off && ack_off < reads[1]);
        assert!(reads[0] < stop && stop < reads[1]);
    }

    #[test]
    fn interrupt_read_of_one_byte_nacks_before_addr_clear() {
        let sim = I2cSim::new();
        sim.feed_rx(&[0x5A]);
        let mut buf = [0u8; 1];
        let mut i2c = controller(&sim);

        i2c.read_it(0x2C, &mut buf, false).unwrap();
        for _ in 0..6 {
            i2c.handle_event_interrupt();
        }

        assert_eq!(i2c.events.rx_complete, 1);
        assert_eq!(i2c.events.rx_data, [0x5A]);
        let trace = sim.trace();
        let ack_off = ack_disable_pos(&sim).unwrap();
        let sr2_read = trace
            .iter()
            .position(|a| matches!(a, Access::Read(Reg::Sr2)))
            .unwrap();
        assert!(ack_off < sr2_read);
        assert_eq!(sim.stop_count(), 1);
    }

    #[test]
    fn busy_handle_rejects_new_transfers_without_side_effects() {
        let sim = I2cSim::new();
        let payload = [0x01, 0x02];
        let mut other = [0u8; 4];
        let mut i2c = controller(&sim);

        i2c.write_it(0x50, &payload, false).unwrap();
        let starts_before = start_writes(&sim);

        assert_eq!(
            i2c.read_it(0x2C, &mut other, false),
            Err(Busy(TransferState::BusyTx))
        );
        assert_eq!(i2c.write_it(0x50, &payload, false), Err(Busy(TransferState::BusyTx)));
        assert_eq!(start_writes(&sim), starts_before);
        assert_eq!(i2c.state(), TransferState::BusyTx);

        // The in-flight transfer still completes cleanly.
        for _ in 0..8 {
            i2c.handle_event_interrupt();
        }
        assert_eq!(i2c.events.tx_complete, 1);
        assert_eq!(i2c.state(), TransferState::Ready);
    }

    #[test]
    fn completed_handle_accepts_the_next_transfer() {
        let sim = I2cSim::new();
        let first = [0xAA];
        let second = [0xBB];
        let mut i2c = controller(&sim);

        i2c.write_it(0x50, &first, false).unwrap();
        for _ in 0..6 {
            i2c.handle_event_interrupt();
        }
        assert_eq!(i2c.state(), TransferState::Ready);

        i2c.write_it(0x51, &second, false).unwrap();
        for _ in 0..6 {
            i2c.handle_event_interrupt();
        }
        assert_eq!(i2c.events.tx_complete, 2);
        assert_eq!(sim.sent().as_slice(), [0xAA, 0xBB]);
    }

    #[test]
    fn error_interrupt_clears_and_reports_each_flag() {
        let sim = I2cSim::new();
        let payload = [0x00];
        let mut i2c = controller(&sim);
        i2c.write_it(0x50, &payload, false).unwrap();

        sim.set_sr1_bits(sr1::AF | sr1::BERR);
        i2c.handle_error_interrupt();

        assert_eq!(i2c.events.errors, [I2cError::Bus, I2cError::AckFailure]);
        assert_eq!(sim.peek(Reg::Sr1) & (sr1::AF | sr1::BERR), 0);

        // A second invocation with clean flags reports nothing new.
        i2c.handle_error_interrupt();
        assert_eq!(i2c.events.errors.len(), 2);
    }

    #[test]
    fn error_interrupt_ignores_flags_when_not_enabled() {
        let sim = I2cSim::new();
        let mut i2c = controller(&sim);
        sim.set_sr1_bits(sr1::AF);
        i2c.handle_error_interrupt();
        assert!(i2c.events.errors.is_empty());
    }

    #[test]
    fn abort_restores_ready_and_releases_the_bus() {
        let sim = I2cSim::new();
        let payload = [0x10, 0x20, 0x30];
        let mut i2c = controller(&sim);

        i2c.write_it(0x50, &payload, false).unwrap();
        i2c.handle_event_interrupt();
        i2c.abort();

        assert_eq!(i2c.state(), TransferState::Ready);
        assert_eq!(sim.peek(Reg::Cr2) & (cr2::ITBUFEN | cr2::ITEVTEN), 0);
        assert_eq!(sim.stop_count(), 1);
        assert_eq!(i2c.events.tx_complete, 0);

        let next = [0x77];
        i2c.write_it(0x51, &next, false).unwrap();
        for _ in 0..8 {
            i2c.handle_event_interrupt();
        }
        assert_eq!(i2c.events.tx_complete, 1);
    }

    #[test]
    fn slave_transmit_pulls_bytes_from_the_callback() {
        let sim = I2cSim::inert();
        let mut i2c = controller(&sim);
        i2c.events.slave_tx_byte = 0x69;

        sim.set_sr1_bits(sr1::TXE);
        sim.set_sr2_bits(sr2::TRA);
        {
            let mut regs: &I2cSim = &sim;
            regs.write(Reg::Cr2, cr2::ITEVTEN | cr2::ITBUFEN);
        }
        i2c.handle_event_interrupt();

        assert_eq!(sim.peek(Reg::Dr), 0x69);
    }

    #[test]
    fn slave_receive_hands_bytes_to_the_callback() {
        let sim = I2cSim::inert();
        let mut i2c = controller(&sim);

        {
            let mut regs: &I2cSim = &sim;
            regs.write(Reg::Dr, 0x5C);
            regs.write(Reg::Cr2, cr2::ITEVTEN | cr2::ITBUFEN);
        }
        sim.set_sr1_bits(sr1::RXNE);
        i2c.handle_event_interrupt();

        assert_eq!(i2c.events.slave_rx, [0x5C]);
    }

    #[test]
    fn slave_stop_detection_clears_by_control_write() {
        let sim = I2cSim::inert();
        let mut i2c = controller(&sim);
        {
            let mut regs: &I2cSim = &sim;
            regs.write(Reg::Cr2, cr2::ITEVTEN);
        }
        sim.set_sr1_bits(sr1::STOPF);
        let writes_before = sim
            .trace()
            .iter()
            .filter(|a| matches!(a, Access::Write(Reg::Cr1, _)))
            .count();

        i2c.handle_event_interrupt();

        assert_eq!(i2c.events.stop_events, 1);
        let writes_after = sim
            .trace()
            .iter()
            .filter(|a| matches!(a, Access::Write(Reg::Cr1, _)))
            .count();
        assert_eq!(writes_after, writes_before + 1);
    }

    #[test]
    fn embedded_hal_write_read_uses_a_repeated_start() {
        let sim = I2cSim::new();
        sim.feed_rx(&[0x99]);
        let mut i2c = controller(&sim);
        let mut out = [0u8; 1];

        embedded_hal::i2c::I2c::write_read(&mut i2c, 0x48, &[0x0B], &mut out).unwrap();

        assert_eq!(out, [0x99]);
        // Two starts (write phase, then repeated start), one stop at the end.
        assert_eq!(start_writes(&sim), 2);
        assert_eq!(sim.stop_count(), 1);
    }
}
