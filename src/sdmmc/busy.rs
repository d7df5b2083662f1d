use embedded_hal::{blocking::spi::Transfer, digital::v2::OutputPin};

#[cfg(feature = "log")]
use log::trace;

#[cfg(feature = "defmt-log")]
use defmt::trace;

use crate::sdmmc_proto::*;

use super::{Delay, Error};

/// How many bytes we clock in looking for a command's status byte.
const RESPONSE_POLLS: usize = 10;

/// A struct used to ensure that communication only occurs
/// when CS is low.
///
/// Chip select is asserted for as long as this value lives and released,
/// followed by one filler byte, when it is dropped. That covers every exit
/// path of a transaction, including errors.
pub struct SdMmcSpiBusy<'spi, 'cs, SPI, CS>
where
    SPI: Transfer<u8>,
    CS: OutputPin,
{
    spi: &'spi mut SPI,
    cs: &'cs mut CS,
}

impl<'spi, 'cs, SPI, CS> Drop for SdMmcSpiBusy<'spi, 'cs, SPI, CS>
where
    SPI: Transfer<u8>,
    CS: OutputPin,
{
    fn drop(&mut self) {
        self.cs_high().ok();
        // The card only releases the data line on the next clock edge.
        self.transfer(FILLER).ok();
    }
}

impl<'spi, 'cs, SPI, CS> SdMmcSpiBusy<'spi, 'cs, SPI, CS>
where
    SPI: Transfer<u8>,
    CS: OutputPin,
{
    pub fn new(spi: &'spi mut SPI, cs: &'cs mut CS) -> Result<Self, Error> {
        let mut me = Self { spi, cs };
        me.cs_low()?;
        Ok(me)
    }

    fn cs_high(&mut self) -> Result<(), Error> {
        self.cs.set_high().map_err(|_| Error::GpioError)
    }

    fn cs_low(&mut self) -> Result<(), Error> {
        self.cs.set_low().map_err(|_| Error::GpioError)
    }

    /// Send one byte and receive one byte.
    fn transfer(&mut self, out: u8) -> Result<u8, Error> {
        self.spi
            .transfer(&mut [out])
            .map(|b| b[0])
            .map_err(|_e| Error::Transport)
    }

    /// Receive a byte from the SD card by clocking in an 0xFF byte.
    pub fn receive(&mut self) -> Result<u8, Error> {
        self.transfer(FILLER)
    }

    /// Send a byte to the SD card.
    pub fn send(&mut self, out: u8) -> Result<(), Error> {
        let _ = self.transfer(out)?;
        Ok(())
    }

    /// Spin until the card returns 0xFF, failing with `err` once `polls`
    /// bytes have come back busy.
    pub fn wait_not_busy(&mut self, polls: u32, err: Error) -> Result<(), Error> {
        let mut delay = Delay::new(polls);
        loop {
            delay.delay(err)?;
            if self.receive()? == FILLER {
                return Ok(());
            }
        }
    }

    /// Perform a command and return its R1 status byte.
    ///
    /// Application-specific commands are prefixed with CMD55. If the card
    /// does not like the CMD55 its status is returned instead.
    pub fn card_command(&mut self, command: u8, arg: u32) -> Result<u8, Error> {
        let frame = CommandFrame::new(command, arg);
        if frame.is_app_command() {
            let status = self.send_frame(CommandFrame::new(CMD55, 0))?;
            if status > R1_IDLE_STATE {
                return Ok(status);
            }
        }
        self.send_frame(frame)
    }

    fn send_frame(&mut self, frame: CommandFrame) -> Result<u8, Error> {
        trace!("CMD{} arg {:x}", frame.opcode(), frame.arg());
        self.send(FILLER)?;
        for b in frame.to_bytes().iter() {
            self.send(*b)?;
        }

        for _ in 0..RESPONSE_POLLS {
            let result = self.receive()?;
            if R1::is_response(result) {
                return Ok(result);
            }
        }

        Err(Error::TimeoutCommand(frame.opcode()))
    }

    /// Read a data block from the card. Always fills the given buffer, so
    /// make sure it's the right size.
    ///
    /// The two checksum bytes after the payload are discarded unchecked.
    pub fn read_data(&mut self, buffer: &mut [u8], polls: u32) -> Result<(), Error> {
        // Get first non-FF byte.
        let mut delay = Delay::new(polls);
        let token = loop {
            delay.delay(Error::DataTimeout)?;
            let s = self.receive()?;
            if s != FILLER {
                break s;
            }
        };
        if token != DATA_START_BLOCK {
            return Err(Error::ReadError(token));
        }

        for b in buffer.iter_mut() {
            *b = self.receive()?;
        }

        self.receive()?;
        self.receive()?;
        Ok(())
    }

    /// Write a data block to the card and check it was accepted.
    pub fn write_data(&mut self, token: u8, buffer: &[u8]) -> Result<(), Error> {
        self.send(token)?;
        for &b in buffer.iter() {
            self.send(b)?;
        }
        // Checksum placeholder; the card is not checking.
        self.send(FILLER)?;
        self.send(FILLER)?;
        let status = self.receive()?;
        if (status & DATA_RES_MASK) != DATA_RES_ACCEPTED {
            Err(Error::WriteRejected(status))
        } else {
            Ok(())
        }
    }
}
