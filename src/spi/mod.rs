// Licensed under the Apache-2.0 license

//! SPI driver module.
//!
//! Register-level driver for the STM32F411 SPI controllers: mode/timing
//! configuration, blocking frame transfers, and interrupt-driven transfers
//! advanced by the interrupt handler. Hardware access is abstracted behind
//! [`SpiRegisters`]; [`sim::SpiSim`] drives the same code on a host.

pub mod common;
pub mod controller;
pub mod regs;
pub mod sim;

pub use common::{
    BusTopology, DeviceMode, FrameSize, NullSpiEvents, Prescaler, SpiConfig, SpiConfigBuilder,
    SpiError, SpiEvent, SpiEvents,
};
pub use controller::SpiController;
pub use regs::{SpiMmio, SpiRegisters};
