// Licensed under the Apache-2.0 license

//! Shared types for the SPI driver: configuration, events, and errors.

use embedded_hal::spi::{Mode, MODE_0};

/// Master or slave operation.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DeviceMode {
    Master,
    Slave,
}

/// Bus wiring supported by the driver.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BusTopology {
    FullDuplex,
    SimplexRxOnly,
}

/// Baud-rate prescaler applied to the bus clock.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Prescaler {
    Div2 = 0,
    Div4 = 1,
    Div8 = 2,
    Div16 = 3,
    Div32 = 4,
    Div64 = 5,
    Div128 = 6,
    Div256 = 7,
}

/// Data-register width per transferred frame.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FrameSize {
    Bits8,
    Bits16,
}

/// Immutable-after-init SPI configuration.
pub struct SpiConfig {
    pub device_mode: DeviceMode,
    pub topology: BusTopology,
    pub prescaler: Prescaler,
    pub frame_size: FrameSize,
    /// Clock polarity and phase.
    pub mode: Mode,
}

impl Default for SpiConfig {
    fn default() -> Self {
        SpiConfigBuilder::new().build()
    }
}

pub struct SpiConfigBuilder {
    device_mode: DeviceMode,
    topology: BusTopology,
    prescaler: Prescaler,
    frame_size: FrameSize,
    mode: Mode,
}

impl Default for SpiConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl SpiConfigBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            device_mode: DeviceMode::Master,
            topology: BusTopology::FullDuplex,
            prescaler: Prescaler::Div2,
            frame_size: FrameSize::Bits8,
            mode: MODE_0,
        }
    }

    #[must_use]
    pub fn device_mode(mut self, device_mode: DeviceMode) -> Self {
        self.device_mode = device_mode;
        self
    }

    #[must_use]
    pub fn topology(mut self, topology: BusTopology) -> Self {
        self.topology = topology;
        self
    }

    #[must_use]
    pub fn prescaler(mut self, prescaler: Prescaler) -> Self {
        self.prescaler = prescaler;
        self
    }

    #[must_use]
    pub fn frame_size(mut self, frame_size: FrameSize) -> Self {
        self.frame_size = frame_size;
        self
    }

    #[must_use]
    pub fn mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    #[must_use]
    pub fn build(self) -> SpiConfig {
        SpiConfig {
            device_mode: self.device_mode,
            topology: self.topology,
            prescaler: self.prescaler,
            frame_size: self.frame_size,
            mode: self.mode,
        }
    }
}

/// Completion and error events surfaced to the application callback.
#[derive(Debug, PartialEq, Eq)]
pub enum SpiEvent<'a> {
    TxComplete,
    RxComplete(&'a [u8]),
    /// New data arrived before the previous frame was read out.
    Overrun,
}

/// Errors surfaced by the blocking transfer paths.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SpiError {
    Overrun,
    Timeout,
}

impl embedded_hal::spi::Error for SpiError {
    fn kind(&self) -> embedded_hal::spi::ErrorKind {
        match self {
            SpiError::Overrun => embedded_hal::spi::ErrorKind::Overrun,
            SpiError::Timeout => embedded_hal::spi::ErrorKind::Other,
        }
    }
}

/// Application callback capability. Runs in interrupt context; must not
/// block and must not issue a blocking transfer on the same bus.
pub trait SpiEvents {
    fn on_event(&mut self, event: SpiEvent<'_>) {
        let _ = event;
    }
}

/// Default callback: ignores everything.
#[derive(Default)]
pub struct NullSpiEvents;

impl SpiEvents for NullSpiEvents {}
