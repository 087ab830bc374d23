// Licensed under the Apache-2.0 license

//! Shared types for the I2C driver: configuration, events, and errors.

use fugit::HertzU32;

/// Highest SCL frequency still driven with standard-mode timings. At or
/// above this the clock-control register is programmed for fast mode.
pub const STANDARD_MODE_LIMIT_HZ: u32 = 100_000;

/// Fast-mode SCL duty cycle selection.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DutyCycle {
    /// t_low / t_high = 2.
    Ratio2to1,
    /// t_low / t_high = 16 / 9.
    Ratio16to9,
}

/// Default acknowledge behavior after each received byte.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AckControl {
    Enabled,
    Disabled,
}

/// Immutable-after-init I2C configuration.
pub struct I2cConfig {
    pub scl: HertzU32,
    pub duty_cycle: DutyCycle,
    pub own_address: u8,
    pub ack: AckControl,
}

impl Default for I2cConfig {
    fn default() -> Self {
        I2cConfigBuilder::new().build()
    }
}

pub struct I2cConfigBuilder {
    scl: HertzU32,
    duty_cycle: DutyCycle,
    own_address: u8,
    ack: AckControl,
}

impl Default for I2cConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl I2cConfigBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            scl: HertzU32::kHz(100),
            duty_cycle: DutyCycle::Ratio2to1,
            own_address: 0,
            ack: AckControl::Enabled,
        }
    }

    #[must_use]
    pub fn scl(mut self, scl: HertzU32) -> Self {
        self.scl = scl;
        self
    }

    #[must_use]
    pub fn duty_cycle(mut self, duty_cycle: DutyCycle) -> Self {
        self.duty_cycle = duty_cycle;
        self
    }

    #[must_use]
    pub fn own_address(mut self, own_address: u8) -> Self {
        self.own_address = own_address;
        self
    }

    #[must_use]
    pub fn ack(mut self, ack: AckControl) -> Self {
        self.ack = ack;
        self
    }

    #[must_use]
    pub fn build(self) -> I2cConfig {
        I2cConfig {
            scl: self.scl,
            duty_cycle: self.duty_cycle,
            own_address: self.own_address,
            ack: self.ack,
        }
    }
}

/// Completion and bus events surfaced to the application callback.
///
/// `RxComplete` borrows the received bytes for the duration of the callback;
/// handlers that need them afterwards copy them out.
#[derive(Debug, PartialEq, Eq)]
pub enum I2cEvent<'a> {
    TxComplete,
    RxComplete(&'a [u8]),
    /// Stop condition seen while addressed as a slave.
    StopDetected,
}

/// Hardware-reported errors, one per status flag.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum I2cError {
    Bus,
    ArbitrationLost,
    AckFailure,
    Overrun,
    Timeout,
}

impl embedded_hal::i2c::Error for I2cError {
    fn kind(&self) -> embedded_hal::i2c::ErrorKind {
        use embedded_hal::i2c::{ErrorKind, NoAcknowledgeSource};
        match self {
            I2cError::Bus => ErrorKind::Bus,
            I2cError::ArbitrationLost => ErrorKind::ArbitrationLoss,
            I2cError::AckFailure => ErrorKind::NoAcknowledge(NoAcknowledgeSource::Unknown),
            I2cError::Overrun => ErrorKind::Overrun,
            I2cError::Timeout => ErrorKind::Other,
        }
    }
}

/// Application callback capability.
///
/// All methods run in interrupt context and must not block; issuing a
/// blocking transfer on the same bus from a callback deadlocks it. Every
/// method has a no-op default so implementations override only what they
/// consume. Slave data flow goes through [`Self::on_data_requested`] /
/// [`Self::on_data_received`], one byte per interrupt.
pub trait I2cEvents {
    fn on_event(&mut self, event: I2cEvent<'_>) {
        let _ = event;
    }

    fn on_error(&mut self, error: I2cError) {
        let _ = error;
    }

    /// Next byte to transmit while addressed as a slave transmitter.
    fn on_data_requested(&mut self) -> u8 {
        0xFF
    }

    /// Byte received while addressed as a slave receiver.
    fn on_data_received(&mut self, byte: u8) {
        let _ = byte;
    }
}

/// Default callback: ignores everything.
#[derive(Default)]
pub struct NullEvents;

impl I2cEvents for NullEvents {}
