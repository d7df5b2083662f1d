//! # embedded-sdlog
//!
//! > An SD/MMC block driver and sample logger written in Embedded Rust
//!
//! This crate drives an SD or MMC card over SPI and exposes it as a
//! `BlockDevice` of 512-byte blocks, ready for a filesystem to sit on. It is
//! written in pure-Rust, is `#![no_std]` and does not use `alloc` or
//! `collections` to keep the memory footprint low. In the first instance it
//! is designed for readability and simplicity over performance.
//!
//! Every wait in the driver is bounded by a number of polls rather than a
//! timer, so no time source is needed.
//!
//! ## Using the crate
//!
//! Hand the driver an SPI peripheral and a Chip Select pin, then initialize
//! it. A card that fails to initialize is left `Faulted`; nothing panics, so
//! the rest of your application carries on without storage.
//!
//! ```rust
//! # struct DummySpi;
//! # struct DummyCsPin;
//! # struct DummyUart;
//! # impl embedded_hal::blocking::spi::Transfer<u8> for DummySpi {
//! #   type Error = ();
//! #   fn transfer<'w>(&mut self, data: &'w mut [u8]) -> Result<&'w [u8], ()> { Ok(data) }
//! # }
//! # impl embedded_hal::digital::v2::OutputPin for DummyCsPin {
//! #   type Error = ();
//! #   fn set_low(&mut self) -> Result<(), ()> { Ok(()) }
//! #   fn set_high(&mut self) -> Result<(), ()> { Ok(()) }
//! # }
//! # impl std::fmt::Write for DummyUart { fn write_str(&mut self, s: &str) -> std::fmt::Result { Ok(()) } }
//! # use std::fmt::Write;
//! # let mut uart = DummyUart;
//! # let sdmmc_spi = DummySpi;
//! # let sdmmc_cs = DummyCsPin;
//! use embedded_sdlog::{Block, BlockDevice, BlockIdx, SdMmcSpi};
//!
//! let mut card = SdMmcSpi::new(sdmmc_spi, sdmmc_cs);
//! write!(uart, "Init SD card...").unwrap();
//! match card.initialize() {
//!     Ok(capabilities) => {
//!         writeln!(uart, "OK! {:?}", capabilities).unwrap();
//!         let mut blocks = [Block::new()];
//!         match card.read(&mut blocks, BlockIdx(0)) {
//!             Ok(()) => writeln!(uart, "{:?}", blocks[0]).unwrap(),
//!             Err(e) => writeln!(uart, "Err: {:?}", e).unwrap(),
//!         }
//!     }
//!     Err(e) => writeln!(uart, "{:?}!", e).unwrap(),
//! };
//! ```
//!
//! ## Features
//!
//! * `defmt-log`: By turning off the default features and enabling the `defmt-log` feature you can
//! configure this crate to log messages over defmt instead.
//! * `refcell-blockdevice`: implement `BlockDevice` for `RefCell<T>` and `&RefCell<T>`, so one
//! card can be shared by several owners that take turns.
//!
//! Make sure that either the `log` feature or the `defmt-log` feature is enabled.

#![cfg_attr(not(test), no_std)]
// #![deny(missing_docs)]

// ****************************************************************************
//
// Imports
//
// ****************************************************************************


#[macro_use]
mod structure;

pub mod block_device;
pub mod record;
pub mod sdmmc;
pub mod sdmmc_proto;

pub use crate::block_device::{
    Block, BlockCount, BlockDevice, BlockIdx, Control, ControlResult, MemoryBlockDevice, Status,
    WriteError,
};
pub use crate::record::{DataLogger, LogError, LogFile, Sample};
pub use crate::sdmmc::Error as SdMmcError;
pub use crate::sdmmc::{AcquireOpts, CardCapabilities, CardKind, CardState, FaultReason, SdMmcSpi};

// ****************************************************************************
//
// End Of File
//
// ****************************************************************************
