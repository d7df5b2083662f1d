//! embedded-sdlog - Constants from the SD Specifications
//!
//! Only the subset of the SPI-mode protocol that the driver actually speaks
//! is described here.

//==============================================================================

// SD Card Commands

/// Marks an opcode as application-specific. Such commands go out on the
/// wire as CMD55 followed by the opcode with this bit cleared.
pub const APP_COMMAND_ESCAPE: u8 = 0x80;

/// GO_IDLE_STATE - init card in spi mode if CS low
pub const CMD0: u8 = 0x00;
/// SEND_OP_COND - activate the initialization process of an MMC card
pub const CMD1: u8 = 0x01;
/// SEND_IF_COND - verify SD Memory Card interface operating condition.
pub const CMD8: u8 = 0x08;
/// SET_BLOCKLEN - set the block length for byte-addressed cards
pub const CMD16: u8 = 0x10;
/// READ_SINGLE_BLOCK - read a single data block from the card
pub const CMD17: u8 = 0x11;
/// WRITE_BLOCK - write a single data block to the card
pub const CMD24: u8 = 0x18;
/// APP_CMD - escape for application specific command
pub const CMD55: u8 = 0x37;
/// READ_OCR - read the OCR register of a card
pub const CMD58: u8 = 0x3A;
/// SD_SEND_OP_COND - Sends host capacity support information and activates
/// the card's initialization process
pub const ACMD41: u8 = APP_COMMAND_ESCAPE | 0x29;

//==============================================================================

/// status for card in the ready state
pub const R1_READY_STATE: u8 = 0x00;

/// status for card in the idle state
pub const R1_IDLE_STATE: u8 = 0x01;

/// The byte a card drives when it has nothing to say, and the byte we clock
/// out when we have nothing to send.
pub const FILLER: u8 = 0xFF;

/// start data token for read or write single block
pub const DATA_START_BLOCK: u8 = 0xFE;

/// mask for data response tokens after a write block operation
pub const DATA_RES_MASK: u8 = 0x1F;

/// write data accepted token
pub const DATA_RES_ACCEPTED: u8 = 0x05;

/// CMD8 argument: 2.7-3.6V supply window plus the 0xAA check pattern.
pub const IF_COND_ARG: u32 = 0x0000_01AA;

/// The check pattern a card must echo back from CMD8.
pub const IF_COND_CHECK_PATTERN: u8 = 0xAA;

/// The voltage-accepted code for the 2.7-3.6V window.
pub const IF_COND_VOLTAGE_27_36: u8 = 0x01;

/// ACMD41 argument bit announcing that the host supports high capacity cards.
pub const ACMD41_HCS: u32 = 1 << 30;

/// The only block length we negotiate with byte-addressed cards.
pub const BLOCK_LEN: u32 = 512;

bitflags::bitflags! {
    /// The R1 status byte every command is answered with.
    ///
    /// Bit 7 is always zero in a valid response.
    pub struct R1: u8 {
        /// The card is in the idle state and running its init process.
        const IDLE = 0x01;
        /// An erase sequence was cleared before executing.
        const ERASE_RESET = 0x02;
        /// An illegal command code was detected.
        const ILLEGAL_COMMAND = 0x04;
        /// The CRC check of the last command failed.
        const CRC_ERROR = 0x08;
        /// An error in the sequence of erase commands occurred.
        const ERASE_SEQUENCE_ERROR = 0x10;
        /// A misaligned address was used in the command.
        const ADDRESS_ERROR = 0x20;
        /// The command's argument was outside the allowed range.
        const PARAMETER_ERROR = 0x40;
    }
}

impl R1 {
    /// Is this byte a response at all (rather than the bus idling)?
    pub fn is_response(byte: u8) -> bool {
        byte & 0x80 == 0
    }
}

/// A single command, ready to be clocked out.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct CommandFrame {
    command: u8,
    arg: u32,
}

impl CommandFrame {
    /// Build a frame. `command` may carry [`APP_COMMAND_ESCAPE`].
    pub fn new(command: u8, arg: u32) -> CommandFrame {
        CommandFrame { command, arg }
    }

    /// Does this command need the CMD55 prefix?
    pub fn is_app_command(&self) -> bool {
        self.command & APP_COMMAND_ESCAPE != 0
    }

    /// The 6-bit opcode as sent on the wire.
    pub fn opcode(&self) -> u8 {
        self.command & 0x3F
    }

    /// The argument.
    pub fn arg(&self) -> u32 {
        self.arg
    }

    /// Only CMD0 and CMD8 are checked by a card in SPI mode before CRC
    /// checking is switched on, which we never do. Everything else gets the
    /// end bit on its own.
    pub fn checksum(&self) -> u8 {
        match self.opcode() {
            CMD0 => 0x95,
            CMD8 => 0x87,
            _ => 0x01,
        }
    }

    /// Start bit, opcode, big-endian argument, checksum.
    pub fn to_bytes(&self) -> [u8; 6] {
        let arg = self.arg.to_be_bytes();
        [
            0x40 | self.opcode(),
            arg[0],
            arg[1],
            arg[2],
            arg[3],
            self.checksum(),
        ]
    }
}

/// The four trailing bytes of the CMD58 (R3) response.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct Ocr {
    /// The 4 bytes of the Operation Conditions Register, MSB first
    pub data: [u8; 4],
}

impl Ocr {
    /// Wrap the register bytes.
    pub fn new(data: [u8; 4]) -> Ocr {
        Ocr { data }
    }

    fn data(&self) -> &[u8; 4] {
        &self.data
    }

    define_field!(power_up_complete, bool, 0, 7);
    define_field!(card_capacity_status, bool, 0, 6);
    define_field!(voltage_window_high, u8, 1, 0, 8);
}

/// The four trailing bytes of the CMD8 (R7) response.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct IfCond {
    /// The 4 bytes following the R1 status, MSB first
    pub data: [u8; 4],
}

impl IfCond {
    /// Wrap the response bytes.
    pub fn new(data: [u8; 4]) -> IfCond {
        IfCond { data }
    }

    fn data(&self) -> &[u8; 4] {
        &self.data
    }

    define_field!(voltage_accepted, u8, 2, 0, 4);
    define_field!(check_pattern, u8, 3, 0, 8);

    /// Did the card accept our voltage window and echo our pattern?
    pub fn is_compatible(&self) -> bool {
        self.voltage_accepted() == IF_COND_VOLTAGE_27_36
            && self.check_pattern() == IF_COND_CHECK_PATTERN
    }
}

// ****************************************************************************
//
// End Of File
//
// ****************************************************************************
