// Licensed under the Apache-2.0 license

//! SPI controller driver.
//!
//! One [`SpiController`] drives one hardware instance through the
//! [`SpiRegisters`] capability. SPI has no addressing or start/stop phases,
//! so both engines are plain frame pumps: the blocking paths poll TXE/RXNE
//! per frame, the interrupt-driven paths arm TXEIE/RXNEIE and are advanced
//! by [`SpiController::handle_interrupt`] one flag's worth of work at a
//! time.
//!
//! Frame width follows the DFF configuration bit and is sampled from CR1 on
//! every frame, not latched at the start of a transfer.

use crate::common::{Busy, BusyWait, Logger, NoOpLogger, TransferState, WaitStrategy};
use crate::syscon::BusControl;

use super::common::{
    BusTopology, DeviceMode, FrameSize, NullSpiEvents, SpiConfig, SpiError, SpiEvent, SpiEvents,
};
use super::regs::{cr1, cr2, sr, Reg, SpiRegisters};

use embedded_hal::spi::{Phase, Polarity};

/// Driver handle for one SPI instance.
///
/// `'buf` bounds the buffers lent to interrupt-driven transfers; received
/// bytes are handed back through the events capability at completion.
pub struct SpiController<
    'buf,
    R: SpiRegisters,
    E: SpiEvents = NullSpiEvents,
    W: WaitStrategy = BusyWait,
    L: Logger = NoOpLogger,
> {
    regs: R,
    pub config: SpiConfig,
    pub events: E,
    pub logger: L,
    wait: W,
    state: TransferState,
    tx: Option<&'buf [u8]>,
    tx_len: usize,
    rx: Option<&'buf mut [u8]>,
    rx_len: usize,
}

impl<'buf, R: SpiRegisters> SpiController<'buf, R> {
    /// Controller with the default no-op callback, unbounded waits, and no
    /// logging.
    pub fn new(regs: R, config: SpiConfig) -> Self {
        Self::with_parts(regs, config, NullSpiEvents, BusyWait, NoOpLogger)
    }
}

impl<'buf, R, E, W, L> SpiController<'buf, R, E, W, L>
where
    R: SpiRegisters,
    E: SpiEvents,
    W: WaitStrategy,
    L: Logger,
{
    pub fn with_parts(regs: R, config: SpiConfig, events: E, wait: W, logger: L) -> Self {
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
        }
    }

    #[must_use]
    pub fn state(&self) -> TransferState {
        self.state
    }

    /// Programs CR1 from the configuration as one composed value: device
    /// mode, bus topology, baud-rate prescaler, frame size, clock polarity,
    /// and clock phase. Enables the bus clock first. Never fails.
    pub fn init(&mut self, syscon: &mut impl BusControl) {
        syscon.enable_clock();
        let config = &self.config;
        let mut value = 0;
        if config.device_mode == DeviceMode::Master {
            value |= cr1::MSTR;
        }
        match config.topology {
            // BIDIMODE stays clear for both supported wirings.
            BusTopology::FullDuplex => {}
            BusTopology::SimplexRxOnly => value |= cr1::RXONLY,
        }
        value |= (config.prescaler as u32) << cr1::BR_SHIFT;
        if config.frame_size == FrameSize::Bits16 {
            value |= cr1::DFF;
        }
        if config.mode.polarity == Polarity::IdleHigh {
            value |= cr1::CPOL;
        }
        if config.mode.phase == Phase::CaptureOnSecondTransition {
            value |= cr1::CPHA;
        }
        self.regs.write(Reg::Cr1, value);
        self.logger.log(format_args!("spi: init cr1={value:#x}"));
    }

    /// Resets the peripheral through the reset collaborator and gates its
    /// clock off.
    pub fn deinit(&mut self, syscon: &mut impl BusControl) {
        syscon.pulse_reset();
        syscon.disable_clock();
        self.tx = None;
        self.tx_len = 0;
        self.rx = None;
        self.rx_len = 0;
        self.state = TransferState::Ready;
    }

    /// Sets the peripheral-enable bit.
    pub fn enable(&mut self) {
        self.regs.modify(Reg::Cr1, |v| v | cr1::SPE);
    }

    /// Clears the peripheral-enable bit.
    pub fn disable(&mut self) {
        self.regs.modify(Reg::Cr1, |v| v & !cr1::SPE);
    }

    /// Drives the internal slave-select level under software NSS
    /// management.
    pub fn set_internal_slave_select(&mut self, selected: bool) {
        self.regs.modify(Reg::Cr1, |v| {
            if selected {
                v | cr1::SSI
            } else {
                v & !cr1::SSI
            }
        });
    }

    // ---------------------------------------------------------------- blocking

    /// Blocking send. Waits for TXE before each frame; in 16-bit frame mode
    /// two bytes go out little-endian per frame, an odd trailing byte
    /// zero-padded.
    pub fn send(&mut self, bytes: &[u8]) -> Result<(), SpiError> {
        let mut index = 0;
        while index < bytes.len() {
            self.wait_flag(sr::TXE)?;
            if self.frame_is_16bit() {
                let lo = bytes.get(index).copied().unwrap_or(0);
                let hi = bytes.get(index + 1).copied().unwrap_or(0);
                self.regs
                    .write(Reg::Dr, u16::from_le_bytes([lo, hi]).into());
                index += 2;
            } else {
                if let Some(&byte) = bytes.get(index) {
                    self.regs.write(Reg::Dr, byte.into());
                }
                index += 1;
            }
        }
        Ok(())
    }

    /// Blocking receive. Waits for RXNE before each frame.
    pub fn receive(&mut self, buffer: &mut [u8]) -> Result<(), SpiError> {
        let mut index = 0;
        while index < buffer.len() {
            self.wait_flag(sr::RXNE)?;
            let word = self.regs.read(Reg::Dr);
            if self.frame_is_16bit() {
                let [lo, hi] = (word as u16).to_le_bytes();
                if let Some(slot) = buffer.get_mut(index) {
                    *slot = lo;
                }
                if let Some(slot) = buffer.get_mut(index + 1) {
                    *slot = hi;
                }
                index += 2;
            } else {
                if let Some(slot) = buffer.get_mut(index) {
                    *slot = word as u8;
                }
                index += 1;
            }
        }
        Ok(())
    }

    // ------------------------------------------------------- interrupt-driven

    /// Starts an interrupt-driven send and returns immediately.
    ///
    /// Rejected with [`Busy`] (and no side effects) while another transfer
    /// is in flight; otherwise records the buffer and arms TXEIE.
    pub fn send_it(&mut self, bytes: &'buf [u8]) -> Result<(), Busy> {
        match self.state {
            TransferState::Ready => {}
            busy => return Err(Busy(busy)),
        }
        self.tx = Some(bytes);
        self.tx_len = bytes.len();
        self.state = TransferState::BusyTx;
        self.regs.modify(Reg::Cr2, |v| v | cr2::TXEIE);
        Ok(())
    }

    /// Starts an interrupt-driven receive and returns immediately.
    pub fn receive_it(&mut self, buffer: &'buf mut [u8]) -> Result<(), Busy> {
        match self.state {
            TransferState::Ready => {}
            busy => return Err(Busy(busy)),
        }
        self.rx_len = buffer.len();
        self.rx = Some(buffer);
        self.state = TransferState::BusyRx;
        self.regs.modify(Reg::Cr2, |v| v | cr2::RXNEIE);
        Ok(())
    }

    /// Arms or disarms the error (overrun) interrupt.
    pub fn set_error_interrupt(&mut self, enabled: bool) {
        self.regs.modify(Reg::Cr2, |v| {
            if enabled {
                v | cr2::ERRIE
            } else {
                v & !cr2::ERRIE
            }
        });
    }

    /// Aborts an in-flight interrupt-driven transfer: disarms the buffer
    /// interrupts, releases the buffers, returns to `Ready`. No completion
    /// callback fires.
    pub fn abort(&mut self) {
        self.regs
            .modify(Reg::Cr2, |v| v & !(cr2::TXEIE | cr2::RXNEIE));
        self.tx = None;
        self.tx_len = 0;
        self.rx = None;
        self.rx_len = 0;
        self.state = TransferState::Ready;
    }

    /// Interrupt service handler. Call once per SPI interrupt.
    ///
    /// Checks the three flag/enable pairs independently: transmit-empty,
    /// receive-not-empty, and overrun.
    pub fn handle_interrupt(&mut self) {
        let enables = self.regs.read(Reg::Cr2);
        if enables & cr2::TXEIE != 0 && self.flag(sr::TXE) {
            self.tx_step();
        }
        if enables & cr2::RXNEIE != 0 && self.flag(sr::RXNE) {
            self.rx_step();
        }
        if enables & cr2::ERRIE != 0 && self.flag(sr::OVR) {
            self.overrun_step();
        }
    }

    /// Clears a pending overrun: read the status register, then the data
    /// register. Exposed for recovery outside a transmission, e.g. from the
    /// application after an idle overrun.
    pub fn clear_overrun(&mut self) {
        let _ = self.regs.read(Reg::Sr);
        let _ = self.regs.read(Reg::Dr);
    }

    // ------------------------------------------------------------- internals

    fn tx_step(&mut self) {
        if self.state != TransferState::BusyTx {
            return;
        }
        let frame16 = self.frame_is_16bit();
        if let Some(buf) = self.tx {
            let index = buf.len() - self.tx_len;
            if frame16 {
                let lo = buf.get(index).copied().unwrap_or(0);
                let hi = buf.get(index + 1).copied().unwrap_or(0);
                self.regs
                    .write(Reg::Dr, u16::from_le_bytes([lo, hi]).into());
                self.tx_len = self.tx_len.saturating_sub(2);
            } else {
                if let Some(&byte) = buf.get(index) {
                    self.regs.write(Reg::Dr, byte.into());
                }
                self.tx_len = self.tx_len.saturating_sub(1);
            }
        }
        if self.tx_len == 0 {
            self.close_transmission();
            self.events.on_event(SpiEvent::TxComplete);
        }
    }

    fn rx_step(&mut self) {
        if self.state != TransferState::BusyRx {
            return;
        }
        let frame16 = self.frame_is_16bit();
        let word = self.regs.read(Reg::Dr);
        if let Some(buf) = self.rx.as_deref_mut() {
            let index = buf.len() - self.rx_len;
            if frame16 {
                let [lo, hi] = (word as u16).to_le_bytes();
                if let Some(slot) = buf.get_mut(index) {
                    *slot = lo;
                }
                if let Some(slot) = buf.get_mut(index + 1) {
                    *slot = hi;
                }
            } else if let Some(slot) = buf.get_mut(index) {
                *slot = word as u8;
            }
        }
        self.rx_len = self.rx_len.saturating_sub(if frame16 { 2 } else { 1 });
        if self.rx_len == 0 {
            let buffer = self.rx.take();
            self.close_reception();
            if let Some(buffer) = buffer {
                self.events.on_event(SpiEvent::RxComplete(&*buffer));
            }
        }
    }

    fn overrun_step(&mut self) {
        // The clear sequence runs here only when a transmission is in
        // flight; otherwise the application decides when to clear, via
        // `clear_overrun`.
        if self.state == TransferState::BusyTx {
            let _ = self.regs.read(Reg::Sr);
            let _ = self.regs.read(Reg::Dr);
        }
        self.events.on_event(SpiEvent::Overrun);
    }

    fn close_transmission(&mut self) {
        self.regs.modify(Reg::Cr2, |v| v & !cr2::TXEIE);
        self.tx = None;
        self.tx_len = 0;
        self.state = TransferState::Ready;
    }

    fn close_reception(&mut self) {
        self.regs.modify(Reg::Cr2, |v| v & !cr2::RXNEIE);
        self.rx = None;
        self.rx_len = 0;
        self.state = TransferState::Ready;
    }

    fn frame_is_16bit(&self) -> bool {
        self.regs.read(Reg::Cr1) & cr1::DFF != 0
    }

    fn flag(&self, mask: u32) -> bool {
        self.regs.read(Reg::Sr) & mask != 0
    }

    fn wait_flag(&mut self, mask: u32) -> Result<(), SpiError> {
        let Self { regs, wait, .. } = self;
        wait.wait_until(|| regs.read(Reg::Sr) & mask != 0)
            .map_err(|_| SpiError::Timeout)
    }
}

impl<'buf, R, E, W, L> embedded_hal::spi::ErrorType for SpiController<'buf, R, E, W, L>
where
    R: SpiRegisters,
    E: SpiEvents,
    W: WaitStrategy,
    L: Logger,
{
    type Error = SpiError;
}

impl<'buf, R, E, W, L> embedded_hal_nb::spi::FullDuplex<u8> for SpiController<'buf, R, E, W, L>
where
    R: SpiRegisters,
    E: SpiEvents,
    W: WaitStrategy,
    L: Logger,
{
    fn read(&mut self) -> nb::Result<u8, SpiError> {
        if self.flag(sr::RXNE) {
            Ok(self.regs.read(Reg::Dr) as u8)
        } else {
            Err(nb::Error::WouldBlock)
        }
    }

    fn write(&mut self, word: u8) -> nb::Result<(), SpiError> {
        if self.flag(sr::TXE) {
            self.regs.write(Reg::Dr, word.into());
            Ok(())
        } else {
            Err(nb::Error::WouldBlock)
        }
    }
}
