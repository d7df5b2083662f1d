//! Single block transactions. Each one selects the card, does its work and
//! deselects again, whether or not it succeeded.

use embedded_hal::blocking::spi::Transfer;
use embedded_hal::digital::v2::OutputPin;
#[cfg(feature = "log")]
use log::warn;

#[cfg(feature = "defmt-log")]
use defmt::warn;

use crate::sdmmc_proto::*;
use crate::Block;

use super::{Error, SdMmcSpi, SdMmcSpiBusy};

impl<SPI, CS> SdMmcSpi<SPI, CS>
where
    SPI: Transfer<u8>,
    CS: OutputPin,
{
    /// Read the block at the card address `address`. Never retried.
    pub(super) fn read_single_block(
        &mut self,
        address: u32,
        block: &mut Block,
    ) -> Result<(), Error> {
        let polls = self.opts.data_token_polls;
        let mut busy = SdMmcSpiBusy::new(&mut self.spi, &mut self.cs)?;
        let status = busy.card_command(CMD17, address)?;
        if status != R1_READY_STATE {
            return Err(Error::CommandRejected(CMD17, status));
        }
        busy.read_data(&mut block.contents, polls)
    }

    /// Write the block at the card address `address`, trying up to
    /// `write_attempts` times.
    pub(super) fn write_single_block(
        &mut self,
        address: u32,
        block: &Block,
    ) -> Result<(), Error> {
        let mut attempt = 1;
        loop {
            match self.write_single_block_once(address, block) {
                Ok(()) => return Ok(()),
                Err(e) if e.is_unrecoverable() || attempt >= self.opts.write_attempts => {
                    warn!("write at {:x} failed: {:?}", address, e);
                    return Err(e);
                }
                Err(e) => {
                    warn!("write at {:x} attempt {} failed: {:?}", address, attempt, e);
                    attempt += 1;
                }
            }
        }
    }

    fn write_single_block_once(&mut self, address: u32, block: &Block) -> Result<(), Error> {
        let polls = self.opts.ready_polls;
        let mut busy = SdMmcSpiBusy::new(&mut self.spi, &mut self.cs)?;
        busy.wait_not_busy(polls, Error::NotReady)?;
        let status = busy.card_command(CMD24, address)?;
        if status != R1_READY_STATE {
            return Err(Error::CommandRejected(CMD24, status));
        }
        busy.write_data(DATA_START_BLOCK, &block.contents)?;
        // The card holds the data line low while it programs the block.
        busy.wait_not_busy(polls, Error::ProgramTimeout)
    }

    /// Wait for the card to finish any programming it is still doing.
    pub(super) fn wait_ready(&mut self) -> Result<(), Error> {
        let polls = self.opts.ready_polls;
        let mut busy = SdMmcSpiBusy::new(&mut self.spi, &mut self.cs)?;
        busy.wait_not_busy(polls, Error::NotReady)
    }
}
