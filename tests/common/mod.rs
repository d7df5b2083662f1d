//! A simulated SD/MMC card on a simulated SPI bus.
//!
//! The card speaks just enough of the SPI-mode protocol to be identified and
//! to read and write single blocks, and records everything the host does to
//! it.

#![allow(dead_code)]

use std::{
    cell::RefCell,
    collections::{HashMap, VecDeque},
    rc::Rc,
};

use embedded_hal::{blocking::spi::Transfer, digital::v2::OutputPin};
use embedded_sdlog::{AcquireOpts, SdMmcSpi};

pub const ACCEPTED: u8 = 0xE5;
pub const CRC_REJECTED: u8 = 0x0B;

#[derive(Debug, Copy, Clone, PartialEq)]
pub enum Model {
    Absent,
    Mmc,
    SdV1,
    SdV2 { high_capacity: bool },
}

#[derive(Debug, Clone)]
pub struct Profile {
    pub model: Model,
    /// The check pattern the card echoes from CMD8.
    pub echo: u8,
    /// The voltage-accepted byte the card returns from CMD8.
    pub voltage: u8,
    /// How many op-cond polls report idle before the card is ready.
    pub init_polls: u32,
    pub reject_block_len: bool,
    /// Reject this many data blocks before accepting any.
    pub reject_first: u32,
    /// Reject every data block after this many have been accepted.
    pub accept_limit: Option<u32>,
    /// Busy bytes after an accepted write.
    pub program_busy: u32,
    /// Filler bytes between a CMD17 status and its start token.
    pub read_gap: usize,
    pub missing_read_token: bool,
    /// The byte sent where a read's start token belongs.
    pub read_token: u8,
    /// Give no response at all to CMD8.
    pub silent_cmd8: bool,
    /// Answer CMD58 with an illegal command status.
    pub reject_ocr: bool,
}

impl Profile {
    pub fn new(model: Model) -> Profile {
        Profile {
            model,
            echo: 0xAA,
            voltage: 0x01,
            init_polls: 0,
            reject_block_len: false,
            reject_first: 0,
            accept_limit: None,
            program_busy: 4,
            read_gap: 3,
            missing_read_token: false,
            read_token: 0xFE,
            silent_cmd8: false,
            reject_ocr: false,
        }
    }

    pub fn sdhc() -> Profile {
        Profile::new(Model::SdV2 {
            high_capacity: true,
        })
    }
}

enum Mode {
    Command,
    AwaitToken { address: u32 },
    Receiving { address: u32, data: Vec<u8> },
}

pub struct Card {
    pub profile: Profile,
    /// Every command received, opcode first. Application commands have bit 7
    /// set.
    pub commands: Vec<(u8, u32)>,
    /// Bytes exchanged on the bus, selected or not.
    pub exchanges: usize,
    /// `exchanges` when chip select was first asserted.
    pub first_select_at: Option<usize>,
    pub selected: bool,
    pub blocks: HashMap<u32, [u8; 512]>,
    /// Data blocks received, accepted or not.
    pub writes_seen: u32,
    pub accepted_writes: u32,
    pub spi_broken: bool,
    frame: Vec<u8>,
    out: VecDeque<u8>,
    busy: u32,
    app: bool,
    idle: bool,
    init_remaining: u32,
    mode: Mode,
}

impl Card {
    pub fn new(profile: Profile) -> Card {
        Card {
            profile,
            commands: Vec::new(),
            exchanges: 0,
            first_select_at: None,
            selected: false,
            blocks: HashMap::new(),
            writes_seen: 0,
            accepted_writes: 0,
            spi_broken: false,
            frame: Vec::new(),
            out: VecDeque::new(),
            busy: 0,
            app: false,
            idle: false,
            init_remaining: 0,
            mode: Mode::Command,
        }
    }

    pub fn count(&self, opcode: u8) -> usize {
        self.commands.iter().filter(|(op, _)| *op == opcode).count()
    }

    pub fn args(&self, opcode: u8) -> Vec<u32> {
        self.commands
            .iter()
            .filter(|(op, _)| *op == opcode)
            .map(|(_, arg)| *arg)
            .collect()
    }

    pub fn block(&self, address: u32) -> [u8; 512] {
        self.blocks.get(&address).copied().unwrap_or([0u8; 512])
    }

    /// Hold the data line busy for the next `bytes` bytes the host reads.
    pub fn hold_busy(&mut self, bytes: u32) {
        self.busy = bytes;
    }

    fn select(&mut self) {
        if self.first_select_at.is_none() {
            self.first_select_at = Some(self.exchanges);
        }
        self.selected = true;
    }

    fn deselect(&mut self) {
        self.selected = false;
        self.frame.clear();
        self.out.clear();
        self.mode = Mode::Command;
    }

    fn exchange(&mut self, mosi: u8) -> u8 {
        self.exchanges += 1;
        if !self.selected {
            return 0xFF;
        }

        match std::mem::replace(&mut self.mode, Mode::Command) {
            Mode::AwaitToken { address } => {
                if mosi == 0xFE {
                    self.mode = Mode::Receiving {
                        address,
                        data: Vec::new(),
                    };
                    return 0xFF;
                }
                self.mode = Mode::AwaitToken { address };
                return self.drive();
            }
            Mode::Receiving { address, mut data } => {
                data.push(mosi);
                if data.len() == 514 {
                    self.finish_write(address, &data[..512]);
                } else {
                    self.mode = Mode::Receiving { address, data };
                }
                return 0xFF;
            }
            Mode::Command => {}
        }

        if !self.frame.is_empty() || mosi & 0xC0 == 0x40 {
            self.frame.push(mosi);
            if self.frame.len() == 6 {
                let frame = std::mem::take(&mut self.frame);
                self.command(&frame);
            }
            return 0xFF;
        }

        self.drive()
    }

    /// What the card puts on the data line when it is not receiving.
    fn drive(&mut self) -> u8 {
        if let Some(b) = self.out.pop_front() {
            b
        } else if self.busy > 0 {
            self.busy -= 1;
            0x00
        } else {
            0xFF
        }
    }

    fn r1(&self) -> u8 {
        if self.idle {
            0x01
        } else {
            0x00
        }
    }

    fn respond(&mut self, bytes: &[u8]) {
        // One byte of command response latency.
        self.out.push_back(0xFF);
        self.out.extend(bytes.iter().copied());
    }

    fn op_cond(&mut self) {
        if self.init_remaining > 0 {
            self.init_remaining -= 1;
            self.respond(&[0x01]);
        } else {
            self.idle = false;
            self.respond(&[0x00]);
        }
    }

    fn command(&mut self, frame: &[u8]) {
        let opcode = frame[0] & 0x3F;
        let arg = u32::from_be_bytes([frame[1], frame[2], frame[3], frame[4]]);
        let app = std::mem::replace(&mut self.app, false);
        self.commands
            .push((if app { opcode | 0x80 } else { opcode }, arg));
        self.out.clear();

        let model = self.profile.model;
        if model == Model::Absent {
            return;
        }

        match (app, opcode) {
            (_, 0) => {
                self.idle = true;
                self.init_remaining = self.profile.init_polls;
                self.respond(&[0x01]);
            }
            (false, 8) if self.profile.silent_cmd8 => {}
            (false, 8) => match model {
                Model::SdV2 { .. } => {
                    let (voltage, echo) = (self.profile.voltage, self.profile.echo);
                    self.respond(&[0x01, 0x00, 0x00, voltage, echo]);
                }
                _ => self.respond(&[0x05]),
            },
            (_, 55) => {
                if model == Model::Mmc {
                    self.respond(&[0x05]);
                } else {
                    self.app = true;
                    let r1 = self.r1();
                    self.respond(&[r1]);
                }
            }
            (true, 41) => self.op_cond(),
            (false, 1) if model == Model::Mmc => self.op_cond(),
            (false, 16) => {
                if self.profile.reject_block_len {
                    self.respond(&[0x40]);
                } else {
                    self.respond(&[0x00]);
                }
            }
            (false, 58) if self.profile.reject_ocr => self.respond(&[0x04]),
            (false, 58) => {
                let high_capacity = matches!(
                    model,
                    Model::SdV2 {
                        high_capacity: true
                    }
                );
                let ocr0 = 0x80 | if high_capacity { 0x40 } else { 0x00 };
                self.respond(&[0x00, ocr0, 0xFF, 0x80, 0x00]);
            }
            (false, 17) => {
                self.respond(&[0x00]);
                if !self.profile.missing_read_token {
                    let data = self.block(arg);
                    self.out.extend(std::iter::repeat(0xFF).take(self.profile.read_gap));
                    self.out.push_back(self.profile.read_token);
                    self.out.extend(data.iter().copied());
                    self.out.extend([0x12, 0x34].iter().copied());
                }
            }
            (false, 24) => {
                self.respond(&[0x00]);
                self.mode = Mode::AwaitToken { address: arg };
            }
            _ => {
                let r1 = self.r1();
                self.respond(&[0x04 | r1]);
            }
        }
    }

    fn finish_write(&mut self, address: u32, data: &[u8]) {
        self.writes_seen += 1;
        let over_limit = self
            .profile
            .accept_limit
            .map_or(false, |limit| self.accepted_writes >= limit);
        if self.profile.reject_first > 0 || over_limit {
            self.profile.reject_first = self.profile.reject_first.saturating_sub(1);
            self.out.push_back(CRC_REJECTED);
            return;
        }
        let mut block = [0u8; 512];
        block.copy_from_slice(data);
        self.blocks.insert(address, block);
        self.accepted_writes += 1;
        self.out.push_back(ACCEPTED);
        self.busy = self.profile.program_busy;
    }
}

pub struct SimSpi(pub Rc<RefCell<Card>>);

pub struct SimCs(pub Rc<RefCell<Card>>);

impl Transfer<u8> for SimSpi {
    type Error = ();

    fn transfer<'w>(&mut self, words: &'w mut [u8]) -> Result<&'w [u8], ()> {
        let mut card = self.0.borrow_mut();
        if card.spi_broken {
            return Err(());
        }
        for w in words.iter_mut() {
            *w = card.exchange(*w);
        }
        Ok(words)
    }
}

impl OutputPin for SimCs {
    type Error = ();

    fn set_low(&mut self) -> Result<(), ()> {
        self.0.borrow_mut().select();
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), ()> {
        self.0.borrow_mut().deselect();
        Ok(())
    }
}

pub type Driver = SdMmcSpi<SimSpi, SimCs>;

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn attach(profile: Profile) -> (Rc<RefCell<Card>>, Driver) {
    attach_with_opts(profile, AcquireOpts::default())
}

pub fn attach_with_opts(profile: Profile, opts: AcquireOpts) -> (Rc<RefCell<Card>>, Driver) {
    init_logger();
    let card = Rc::new(RefCell::new(Card::new(profile)));
    let driver = SdMmcSpi::with_opts(SimSpi(card.clone()), SimCs(card.clone()), opts);
    (card, driver)
}

pub fn pattern(seed: u8) -> embedded_sdlog::Block {
    let mut block = embedded_sdlog::Block::new();
    for (i, b) in block.contents.iter_mut().enumerate() {
        *b = (i as u8) ^ seed;
    }
    block
}
