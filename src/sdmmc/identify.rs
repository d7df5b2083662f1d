//! Card identification: reset, interface condition, initialization and
//! addressing mode.
//!
//! The sequence never backtracks. Once the interface condition command has
//! sorted the card into the legacy or the modern branch, it stays there.

use embedded_hal::blocking::spi::Transfer;
use embedded_hal::digital::v2::OutputPin;
#[cfg(feature = "log")]
use log::{debug, trace, warn};

#[cfg(feature = "defmt-log")]
use defmt::{debug, trace, warn};

use crate::sdmmc_proto::*;

use super::{
    AcquireOpts, CardCapabilities, CardKind, Delay, Error, FaultReason, SdMmcSpi, SdMmcSpiBusy,
};

/// Filler bytes clocked out with CS high before the first command. Ten bytes
/// give the 74 clock cycles a card needs to power up.
const SETTLE_BYTES: usize = 10;

impl<SPI, CS> SdMmcSpi<SPI, CS>
where
    SPI: Transfer<u8>,
    CS: OutputPin,
{
    fn discard_byte(&mut self) -> Result<u8, Error> {
        self.spi
            .transfer(&mut [FILLER])
            .map(|b| b[0])
            .map_err(|_e| Error::Transport)
    }

    /// Work out what kind of card is in the socket and bring it out of the
    /// idle state.
    pub(super) fn identify(&mut self) -> Result<CardCapabilities, FaultReason> {
        let opts = self.opts;
        trace!("Reset card..");

        // Supply minimum of 74 clock cycles without CS asserted.
        self.cs.set_high().map_err(|_| Error::GpioError)?;
        for _ in 0..SETTLE_BYTES {
            self.discard_byte()?;
        }

        let mut busy = SdMmcSpiBusy::new(&mut self.spi, &mut self.cs)?;
        reset(&mut busy, &opts)?;

        // Older cards reject CMD8 as illegal, and some MMC cards do not
        // answer it at all.
        let capabilities = match busy.card_command(CMD8, IF_COND_ARG) {
            Ok(status) if R1::from_bits_truncate(status).contains(R1::ILLEGAL_COMMAND) => {
                debug!("CMD8 status {:x}, legacy card", status);
                identify_legacy(&mut busy, &opts)?
            }
            Ok(_) => {
                let mut data = [0u8; 4];
                for b in data.iter_mut() {
                    *b = busy.receive()?;
                }
                let if_cond = IfCond::new(data);
                if !if_cond.is_compatible() {
                    warn!(
                        "CMD8 voltage {:x}, check pattern {:x}",
                        if_cond.voltage_accepted(),
                        if_cond.check_pattern()
                    );
                    return Err(FaultReason::UnsupportedVoltage);
                }
                identify_modern(&mut busy, &opts)?
            }
            Err(Error::TimeoutCommand(_)) => {
                debug!("CMD8 unanswered, legacy card");
                identify_legacy(&mut busy, &opts)?
            }
            Err(e) => return Err(e.into()),
        };

        debug!("Card identified: {:?}", capabilities);
        Ok(capabilities)
    }
}

/// Send CMD0 until the card reports idle.
fn reset<SPI, CS>(busy: &mut SdMmcSpiBusy<SPI, CS>, opts: &AcquireOpts) -> Result<(), FaultReason>
where
    SPI: Transfer<u8>,
    CS: OutputPin,
{
    let mut delay = Delay::new(opts.reset_attempts);
    loop {
        delay.delay(FaultReason::CardNotFound)?;
        match busy.card_command(CMD0, 0) {
            Ok(R1_IDLE_STATE) => return Ok(()),
            Ok(r) => {
                warn!("Got response: {:x}, trying again..", r);
            }
            Err(Error::TimeoutCommand(_)) => {
                warn!("Timed out, trying again..");
            }
            Err(e) => return Err(e.into()),
        }
    }
}

/// Repeat `command` until the card leaves the idle state.
///
/// A poll that gets no answer at all counts as the card still being busy.
fn wait_initialized<SPI, CS>(
    busy: &mut SdMmcSpiBusy<SPI, CS>,
    command: u8,
    arg: u32,
    opts: &AcquireOpts,
) -> Result<(), FaultReason>
where
    SPI: Transfer<u8>,
    CS: OutputPin,
{
    let mut delay = Delay::new(opts.init_attempts);
    loop {
        delay.delay(FaultReason::InitTimeout)?;
        match busy.card_command(command, arg) {
            Ok(R1_READY_STATE) => return Ok(()),
            Ok(_) | Err(Error::TimeoutCommand(_)) => {}
            Err(e) => return Err(e.into()),
        }
    }
}

/// Byte-addressed cards must be told to use 512-byte blocks.
fn set_block_length<SPI, CS>(busy: &mut SdMmcSpiBusy<SPI, CS>) -> Result<(), FaultReason>
where
    SPI: Transfer<u8>,
    CS: OutputPin,
{
    let status = busy.card_command(CMD16, BLOCK_LEN)?;
    if status != R1_READY_STATE {
        warn!("CMD16 status {:x}", status);
        return Err(FaultReason::BlockLengthRejected);
    }
    Ok(())
}

/// A card that did not understand CMD8: SD version 1, or failing that, MMC.
fn identify_legacy<SPI, CS>(
    busy: &mut SdMmcSpiBusy<SPI, CS>,
    opts: &AcquireOpts,
) -> Result<CardCapabilities, FaultReason>
where
    SPI: Transfer<u8>,
    CS: OutputPin,
{
    let (kind, command) = match busy.card_command(ACMD41, 0) {
        Ok(r) if r <= R1_IDLE_STATE => (CardKind::SdV1, ACMD41),
        Ok(_) | Err(Error::TimeoutCommand(_)) => (CardKind::Mmc, CMD1),
        Err(e) => return Err(e.into()),
    };
    debug!("Legacy card is {:?}", kind);

    wait_initialized(busy, command, 0, opts)?;
    set_block_length(busy)?;

    Ok(CardCapabilities {
        kind,
        block_addressed: false,
    })
}

/// A version 2 SD card. Only these can be high capacity, and only high
/// capacity cards are block addressed.
fn identify_modern<SPI, CS>(
    busy: &mut SdMmcSpiBusy<SPI, CS>,
    opts: &AcquireOpts,
) -> Result<CardCapabilities, FaultReason>
where
    SPI: Transfer<u8>,
    CS: OutputPin,
{
    wait_initialized(busy, ACMD41, ACMD41_HCS, opts)?;

    if busy.card_command(CMD58, 0)? != R1_READY_STATE {
        return Err(FaultReason::OcrRejected);
    }
    let mut data = [0u8; 4];
    for b in data.iter_mut() {
        *b = busy.receive()?;
    }
    let ocr = Ocr::new(data);
    let block_addressed = ocr.card_capacity_status();
    if !block_addressed {
        set_block_length(busy)?;
    }

    Ok(CardCapabilities {
        kind: CardKind::SdV2,
        block_addressed,
    })
}
