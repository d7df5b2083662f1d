//! embedded-sdlog - Block Device support
//!
//! Generic code for handling block devices.

#[cfg(feature = "refcell-blockdevice")]
mod refcell;

mod block;
pub use block::*;

/// Whether a block device will currently accept data operations.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Status {
    /// Nobody has brought the device up yet.
    NotInitialized,
    /// Reads and writes are permitted.
    Ready,
    /// The device failed and will not accept reads or writes.
    Faulted,
}

/// Queries and actions a filesystem can ask of a block device besides
/// reading and writing.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Control {
    /// Wait until every write issued so far is committed to the medium.
    Sync,
    /// The size of one sector in bytes.
    SectorSize,
    /// The erase granularity, in sectors.
    EraseBlockSize,
    /// How many sectors the device holds.
    SectorCount,
}

/// The answer to a [`Control`] request.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ControlResult {
    /// All outstanding writes are durable.
    Synced,
    /// Bytes per sector.
    SectorSize(u16),
    /// Sectors per erase block.
    EraseBlockSize(BlockCount),
    /// Sectors on the device.
    SectorCount(BlockCount),
}

/// A failed multi-block write, with how far it got.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct WriteError<E> {
    /// Blocks at the start of the request that were committed before the
    /// failure. Nothing after them was attempted.
    pub committed: BlockCount,
    /// Why the next block could not be written.
    pub error: E,
}

impl<E> WriteError<E> {
    /// A failure before any block was written.
    pub fn nothing_written(error: E) -> Self {
        WriteError {
            committed: BlockCount(0),
            error,
        }
    }
}

/// Represents a block device - a device which can read and write blocks (or
/// sectors). Only supports devices which are <= 2 TiB in size.
pub trait BlockDevice {
    /// The errors that the `BlockDevice` can return. Must be debug formattable.
    type Error: core::fmt::Debug;
    /// Is the device usable right now? Never touches the hardware.
    fn status(&self) -> Status;
    /// Read one or more blocks, starting at the given block index.
    fn read(&mut self, blocks: &mut [Block], start_block_idx: BlockIdx) -> Result<(), Self::Error>;
    /// Write one or more blocks, starting at the given block index. Stops at
    /// the first block that cannot be written.
    fn write(
        &mut self,
        blocks: &[Block],
        start_block_idx: BlockIdx,
    ) -> Result<(), WriteError<Self::Error>>;
    /// Answer a control query.
    fn control(&mut self, op: Control) -> Result<ControlResult, Self::Error>;

    /// Read a single block.
    fn read_block(&mut self, block_idx: BlockIdx) -> Result<Block, Self::Error> {
        let mut blocks = [Block::new()];
        self.read(&mut blocks, block_idx)?;
        let [block] = blocks;
        Ok(block)
    }

    /// Determine how many blocks this device can hold.
    fn num_blocks(&mut self) -> Result<BlockCount, Self::Error> {
        match self.control(Control::SectorCount)? {
            ControlResult::SectorCount(count) => Ok(count),
            _ => Ok(BlockCount(0)),
        }
    }

    /// Make every completed write durable.
    fn sync(&mut self) -> Result<(), Self::Error> {
        self.control(Control::Sync).map(|_| ())
    }
}

impl<T> BlockDevice for &mut T
where
    T: BlockDevice,
{
    type Error = T::Error;

    fn status(&self) -> Status {
        (**self).status()
    }

    fn read(&mut self, blocks: &mut [Block], start_block_idx: BlockIdx) -> Result<(), Self::Error> {
        (*self).read(blocks, start_block_idx)
    }

    fn write(
        &mut self,
        blocks: &[Block],
        start_block_idx: BlockIdx,
    ) -> Result<(), WriteError<Self::Error>> {
        (*self).write(blocks, start_block_idx)
    }

    fn control(&mut self, op: Control) -> Result<ControlResult, Self::Error> {
        (*self).control(op)
    }
}

/// The ways a [`MemoryBlockDevice`] can fail.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum MemoryError {
    /// The request was for zero blocks.
    ParamError,
    /// The request ran past the end of the backing memory.
    OutOfRange {
        /// How many blocks the device holds.
        block_count: BlockCount,
    },
}

/// A block device backed by a byte slice in RAM.
#[derive(Debug)]
pub struct MemoryBlockDevice<'a> {
    memory: &'a mut [u8],
}

impl<'a> MemoryBlockDevice<'a> {
    /// Use `memory` as the device. Any trailing partial block is ignored.
    pub fn new(memory: &'a mut [u8]) -> Self {
        Self { memory }
    }

    fn block_count(&self) -> BlockCount {
        BlockCount((self.memory.len() / Block::LEN) as u32)
    }

    fn block_range(&self, block_idx: BlockIdx) -> Result<core::ops::Range<usize>, MemoryError> {
        if block_idx.0 >= self.block_count().0 {
            return Err(MemoryError::OutOfRange {
                block_count: self.block_count(),
            });
        }
        let start = block_idx.0 as usize * Block::LEN;
        Ok(start..start + Block::LEN)
    }
}

impl<'a> BlockDevice for MemoryBlockDevice<'a> {
    type Error = MemoryError;

    fn status(&self) -> Status {
        Status::Ready
    }

    fn read(&mut self, blocks: &mut [Block], start_block_idx: BlockIdx) -> Result<(), Self::Error> {
        if blocks.is_empty() {
            return Err(MemoryError::ParamError);
        }
        for (idx, block) in blocks.iter_mut().enumerate() {
            let range = start_block_idx
                .checked_add(idx)
                .ok_or(MemoryError::OutOfRange {
                    block_count: self.block_count(),
                })
                .and_then(|block_idx| self.block_range(block_idx))?;
            block.contents.copy_from_slice(&self.memory[range]);
        }
        Ok(())
    }

    fn write(
        &mut self,
        blocks: &[Block],
        start_block_idx: BlockIdx,
    ) -> Result<(), WriteError<Self::Error>> {
        if blocks.is_empty() {
            return Err(WriteError::nothing_written(MemoryError::ParamError));
        }
        for (idx, block) in blocks.iter().enumerate() {
            let range = start_block_idx
                .checked_add(idx)
                .ok_or(MemoryError::OutOfRange {
                    block_count: self.block_count(),
                })
                .and_then(|block_idx| self.block_range(block_idx))
                .map_err(|error| WriteError {
                    committed: BlockCount(idx as u32),
                    error,
                })?;
            self.memory[range].copy_from_slice(&block.contents);
        }
        Ok(())
    }

    fn control(&mut self, op: Control) -> Result<ControlResult, Self::Error> {
        Ok(match op {
            Control::Sync => ControlResult::Synced,
            Control::SectorSize => ControlResult::SectorSize(Block::LEN as u16),
            Control::EraseBlockSize => ControlResult::EraseBlockSize(BlockCount(1)),
            Control::SectorCount => ControlResult::SectorCount(self.block_count()),
        })
    }
}

// ****************************************************************************
//
// End Of File
//
// ****************************************************************************
