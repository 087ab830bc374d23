// Licensed under the Apache-2.0 license

//! I2C driver module.
//!
//! Register-level master/slave driver for the STM32F411 I2C controllers:
//! timing configuration, blocking transfers, and interrupt-driven transfers
//! advanced by the event/error interrupt handlers. Hardware access is
//! abstracted behind [`I2cRegisters`]; [`sim::I2cSim`] drives the same code
//! on a host.

pub mod common;
pub mod controller;
pub mod regs;
pub mod sim;

pub use common::{
    AckControl, DutyCycle, I2cConfig, I2cConfigBuilder, I2cError, I2cEvent, I2cEvents, NullEvents,
};
pub use controller::I2cController;
pub use regs::{I2cMmio, I2cRegisters};
