// Licensed under the Apache-2.0 license

//! Bare-metal serial-bus driver kit for the STM32F411.
//!
//! Register-level drivers for the I2C and SPI controllers: timing/mode
//! configuration, blocking (polling) transfers, and interrupt-driven
//! transfers whose state machines advance one hardware event at a time
//! inside the interrupt handlers.
//!
//! Register access goes through per-peripheral capability traits
//! ([`i2c::I2cRegisters`], [`spi::SpiRegisters`]) backed by volatile MMIO in
//! production and by in-memory register models under test, so the flag
//! sequencing the silicon mandates (status reads that clear bits, ACK
//! ordering around the address phase) can be asserted on the host.

#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::indexing_slicing))]
#![cfg_attr(not(test), warn(clippy::expect_used))]
#![cfg_attr(not(test), no_std)]

pub mod common;
pub mod i2c;
pub mod spi;
pub mod syscon;
