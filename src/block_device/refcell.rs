//! Lets a block device be shared by callers that serialise their own access,
//! such as a sensor loop and a filesystem both holding a `&RefCell`.

use crate::{Block, BlockDevice, BlockIdx};

use super::{Control, ControlResult, Status, WriteError};

impl<T> BlockDevice for core::cell::RefCell<T>
where
    T: BlockDevice,
{
    type Error = T::Error;

    fn status(&self) -> Status {
        self.borrow().status()
    }

    fn read(&mut self, blocks: &mut [Block], start_block_idx: BlockIdx) -> Result<(), Self::Error> {
        self.get_mut().read(blocks, start_block_idx)
    }

    fn write(
        &mut self,
        blocks: &[Block],
        start_block_idx: BlockIdx,
    ) -> Result<(), WriteError<Self::Error>> {
        self.get_mut().write(blocks, start_block_idx)
    }

    fn control(&mut self, op: Control) -> Result<ControlResult, Self::Error> {
        self.get_mut().control(op)
    }
}

impl<T> BlockDevice for &core::cell::RefCell<T>
where
    T: BlockDevice,
{
    type Error = T::Error;

    fn status(&self) -> Status {
        self.borrow().status()
    }

    fn read(&mut self, blocks: &mut [Block], start_block_idx: BlockIdx) -> Result<(), Self::Error> {
        let mut underlying = self.borrow_mut();
        underlying.read(blocks, start_block_idx)
    }

    fn write(
        &mut self,
        blocks: &[Block],
        start_block_idx: BlockIdx,
    ) -> Result<(), WriteError<Self::Error>> {
        let mut underlying = self.borrow_mut();
        underlying.write(blocks, start_block_idx)
    }

    fn control(&mut self, op: Control) -> Result<ControlResult, Self::Error> {
        let mut underlying = self.borrow_mut();
        underlying.control(op)
    }
}
