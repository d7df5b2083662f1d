//! embedded-sdlog - SDMMC Protocol
//!
//! Implements the SD/MMC protocol on some generic SPI interface, and exposes
//! the card as a [`BlockDevice`].
//!
//! This is currently optimised for readability and debugability, not
//! performance. Every transfer is a single 512-byte block and payload CRCs
//! are never checked.

mod busy;
mod identify;
mod transfer;

use busy::SdMmcSpiBusy;

use crate::block_device::{Control, ControlResult, Status, WriteError};
use crate::{Block, BlockCount, BlockDevice, BlockIdx};

use embedded_hal::blocking::spi::Transfer;
use embedded_hal::digital::v2::OutputPin;
#[cfg(feature = "log")]
use log::{debug, trace, warn};

#[cfg(feature = "defmt-log")]
use defmt::{debug, trace, warn};

/// Represents an SD Card interface.
///
/// Built from an SPI peripheral and a Chip Select pin. We need Chip Select to
/// be separate so we can clock out some bytes without Chip Select asserted
/// (which puts the card into SPI mode).
pub struct SdMmcSpi<SPI, CS>
where
    SPI: Transfer<u8>,
    CS: OutputPin,
{
    spi: SPI,
    cs: CS,
    state: CardState,
    opts: AcquireOpts,
    write_protected: bool,
}

/// The possible errors a transaction with the card can generate.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Error {
    /// We got an error from the SPI peripheral
    Transport,
    /// Couldn't set a GPIO pin
    GpioError,
    /// We didn't get a response when executing this command
    TimeoutCommand(u8),
    /// The card answered this command with a non-zero status
    CommandRejected(u8, u8),
    /// We didn't get a start token when reading data from the card
    DataTimeout,
    /// The card sent this byte where we expected a start token
    ReadError(u8),
    /// The card refused the data block with this response token
    WriteRejected(u8),
    /// The card stayed busy after accepting a data block
    ProgramTimeout,
    /// The card is not in a state to take this operation
    NotReady,
    /// The request itself is invalid
    ParamError,
    /// The medium is write protected
    WriteProtected,
}

impl Error {
    /// Errors after which nothing on the bus can be trusted any more.
    pub fn is_unrecoverable(&self) -> bool {
        matches!(self, Error::Transport | Error::GpioError)
    }
}

/// Why a card could not be brought up, or was taken out of service.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum FaultReason {
    /// Nothing answered the reset command with the idle status
    CardNotFound,
    /// The card rejected our voltage window or garbled the check pattern
    UnsupportedVoltage,
    /// The card never finished its initialization process
    InitTimeout,
    /// A byte-addressed card would not take 512-byte blocks
    BlockLengthRejected,
    /// The card would not tell us its operating conditions
    OcrRejected,
    /// The bus failed underneath us
    Io(Error),
}

impl From<Error> for FaultReason {
    fn from(e: Error) -> Self {
        FaultReason::Io(e)
    }
}

/// The different types of card we support.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CardKind {
    /// A MultiMediaCard, initialised with CMD1
    Mmc,
    /// A version 1 SD card, which does not know CMD8
    SdV1,
    /// A version 2 SD card
    SdV2,
}

/// What identification found out about a card.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct CardCapabilities {
    /// Which family the card belongs to.
    pub kind: CardKind,
    /// Command arguments are block numbers, not byte offsets. Only ever set
    /// for high capacity `SdV2` cards.
    pub block_addressed: bool,
}

impl CardCapabilities {
    /// The command argument that addresses `block_idx` on this card, or
    /// `None` if a byte address would not fit in 32 bits.
    pub fn address(&self, block_idx: BlockIdx) -> Option<u32> {
        if self.block_addressed {
            Some(block_idx.0)
        } else {
            block_idx.0.checked_mul(Block::LEN_U32)
        }
    }
}

/// The lifecycle of the card behind an [`SdMmcSpi`].
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CardState {
    /// No successful identification yet
    Uninitialized,
    /// Identified, reads and writes are permitted
    Ready(CardCapabilities),
    /// Identification failed, or the bus failed since
    Faulted(FaultReason),
}

impl From<CardState> for Status {
    fn from(state: CardState) -> Status {
        match state {
            CardState::Uninitialized => Status::NotInitialized,
            CardState::Ready(_) => Status::Ready,
            CardState::Faulted(_) => Status::Faulted,
        }
    }
}

/// Bounds on every wait the driver performs.
///
/// These are iteration counts, not durations, so how long a timeout takes
/// depends on the SPI clock. The defaults suit a card clocked at a few MHz.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct AcquireOpts {
    /// How many times we send the reset command before giving up.
    pub reset_attempts: u32,
    /// How many times we poll ACMD41/CMD1 for the end of initialization.
    pub init_attempts: u32,
    /// How many bytes we read while waiting for a data start token.
    pub data_token_polls: u32,
    /// How many bytes we read while waiting for the card to stop being busy.
    pub ready_polls: u32,
    /// How many times we try each block of a write.
    pub write_attempts: u32,
    /// The size reported for [`Control::SectorCount`]. The card's own size
    /// register is not consulted.
    pub nominal_block_count: BlockCount,
}

impl Default for AcquireOpts {
    fn default() -> Self {
        AcquireOpts {
            reset_attempts: 10,
            init_attempts: 10_000,
            data_token_polls: 20_000,
            ready_polls: 50_000,
            write_attempts: 3,
            // Roughly a 4 GiB card.
            nominal_block_count: BlockCount(8 * 1024 * 1024),
        }
    }
}

/// Counts down the polls a bounded wait may still make.
struct Delay(u32);

impl Delay {
    fn new(count: u32) -> Delay {
        Delay(count)
    }

    /// Use up one poll, or fail with `err` if there are none left.
    fn delay<E>(&mut self, err: E) -> Result<(), E> {
        if self.0 == 0 {
            Err(err)
        } else {
            self.0 -= 1;
            Ok(())
        }
    }
}

impl<SPI, CS> SdMmcSpi<SPI, CS>
where
    SPI: Transfer<u8>,
    CS: OutputPin,
{
    /// Create a new SD/MMC controller using a raw SPI interface.
    pub fn new(spi: SPI, cs: CS) -> Self {
        Self::with_opts(spi, cs, Default::default())
    }

    /// Create a new SD/MMC controller with non-default wait bounds.
    pub fn with_opts(spi: SPI, cs: CS, opts: AcquireOpts) -> Self {
        SdMmcSpi {
            spi,
            cs,
            state: CardState::Uninitialized,
            opts,
            write_protected: false,
        }
    }

    /// Identify the card and make it available for reads and writes.
    ///
    /// Failure leaves the device `Faulted`; it never panics.
    pub fn initialize(&mut self) -> Result<CardCapabilities, FaultReason> {
        debug!("acquiring card with opts: {:?}", self.opts);
        let result = self.identify();
        self.state = match result {
            Ok(capabilities) => CardState::Ready(capabilities),
            Err(reason) => {
                warn!("card identification failed: {:?}", reason);
                CardState::Faulted(reason)
            }
        };
        result
    }

    /// The current lifecycle state. Never touches the bus.
    pub fn state(&self) -> CardState {
        self.state
    }

    /// What we know about the card, if it has been identified.
    pub fn capabilities(&self) -> Option<CardCapabilities> {
        match self.state {
            CardState::Ready(capabilities) => Some(capabilities),
            _ => None,
        }
    }

    /// Report the socket's write protect switch. While set, every write is
    /// refused without touching the card.
    pub fn set_write_protected(&mut self, write_protected: bool) {
        self.write_protected = write_protected;
    }

    /// Give back the SPI peripheral and Chip Select pin.
    pub fn release(self) -> (SPI, CS) {
        (self.spi, self.cs)
    }

    fn ready(&self) -> Result<CardCapabilities, Error> {
        self.capabilities().ok_or(Error::NotReady)
    }

    /// Take the card out of service if `e` means the bus is gone.
    fn check_fault(&mut self, e: Error) -> Error {
        if e.is_unrecoverable() {
            warn!("bus failure, card taken out of service: {:?}", e);
            self.state = CardState::Faulted(FaultReason::Io(e));
        }
        e
    }
}

impl<SPI, CS> BlockDevice for SdMmcSpi<SPI, CS>
where
    SPI: Transfer<u8>,
    CS: OutputPin,
{
    type Error = Error;

    fn status(&self) -> Status {
        self.state.into()
    }

    /// Read one or more blocks, starting at the given block index. Stops at
    /// the first block that fails.
    fn read(&mut self, blocks: &mut [Block], start_block_idx: BlockIdx) -> Result<(), Self::Error> {
        if blocks.is_empty() {
            return Err(Error::ParamError);
        }
        let capabilities = self.ready()?;
        for (offset, block) in blocks.iter_mut().enumerate() {
            let address = start_block_idx
                .checked_add(offset)
                .and_then(|block_idx| capabilities.address(block_idx))
                .ok_or(Error::ParamError)?;
            trace!("read block at {:x}", address);
            self.read_single_block(address, block)
                .map_err(|e| self.check_fault(e))?;
        }
        Ok(())
    }

    /// Write one or more blocks, starting at the given block index. Each
    /// block gets `write_attempts` tries; the first block that uses them all
    /// up ends the request.
    fn write(
        &mut self,
        blocks: &[Block],
        start_block_idx: BlockIdx,
    ) -> Result<(), WriteError<Self::Error>> {
        if blocks.is_empty() {
            return Err(WriteError::nothing_written(Error::ParamError));
        }
        let capabilities = self.ready().map_err(WriteError::nothing_written)?;
        if self.write_protected {
            return Err(WriteError::nothing_written(Error::WriteProtected));
        }
        for (offset, block) in blocks.iter().enumerate() {
            let committed = BlockCount(offset as u32);
            let address = start_block_idx
                .checked_add(offset)
                .and_then(|block_idx| capabilities.address(block_idx))
                .ok_or(WriteError {
                    committed,
                    error: Error::ParamError,
                })?;
            trace!("write block at {:x}", address);
            self.write_single_block(address, block).map_err(|e| WriteError {
                committed,
                error: self.check_fault(e),
            })?;
        }
        Ok(())
    }

    fn control(&mut self, op: Control) -> Result<ControlResult, Self::Error> {
        self.ready()?;
        match op {
            Control::Sync => {
                self.wait_ready().map_err(|e| self.check_fault(e))?;
                Ok(ControlResult::Synced)
            }
            Control::SectorSize => Ok(ControlResult::SectorSize(Block::LEN as u16)),
            Control::EraseBlockSize => Ok(ControlResult::EraseBlockSize(BlockCount(1))),
            Control::SectorCount => Ok(ControlResult::SectorCount(self.opts.nominal_block_count)),
        }
    }
}

// ****************************************************************************
//
// End Of File
//
// ****************************************************************************
