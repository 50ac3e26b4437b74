// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0
//
//! CONTEXT: Flash region abstractions for dual-bank agent storage
//! OWNERS: @runtime
//! STATUS: Functional (host-first)
//! API_STABILITY: Unstable
//! TEST_COVERAGE: Unit tests here + downstream slot manager tests
//!
//! PUBLIC API:
//!   - FlashRegion: byte-addressed region with read_region/write_region/erase/sync
//!   - MemFlash: in-memory region with fault injection for host tests
//!   - FlashError: region error types
//!
//! Production binds `FlashRegion` to the controller's flash driver; host builds
//! and tests use `MemFlash`.

#![forbid(unsafe_code)]

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use thiserror::Error;

/// Value of an erased flash byte.
pub const ERASED_BYTE: u8 = 0xFF;

/// Chunk size used by the default `erase` implementation.
const ERASE_CHUNK: usize = 256;

/// Flash region error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FlashError {
    /// Access falls outside the region.
    #[error("access out of range: offset {offset} len {len} capacity {capacity}")]
    OutOfRange {
        /// Requested start offset.
        offset: usize,
        /// Requested length.
        len: usize,
        /// Region capacity.
        capacity: usize,
    },
    /// The device reported a programming or read failure.
    #[error("flash i/o error: {0}")]
    Io(&'static str),
}

/// Abstract byte-addressed flash region backing one bank.
pub trait FlashRegion {
    /// Region size in bytes.
    fn capacity(&self) -> usize;

    /// Reads `buf.len()` bytes starting at `offset`.
    fn read_region(&self, offset: usize, buf: &mut [u8]) -> Result<(), FlashError>;

    /// Programs `data` starting at `offset`.
    fn write_region(&mut self, offset: usize, data: &[u8]) -> Result<(), FlashError>;

    /// Overwrites the whole region with the erase pattern.
    fn erase(&mut self) -> Result<(), FlashError> {
        let pattern = [ERASED_BYTE; ERASE_CHUNK];
        let capacity = self.capacity();
        let mut offset = 0;
        while offset < capacity {
            let len = (capacity - offset).min(ERASE_CHUNK);
            self.write_region(offset, &pattern[..len])?;
            offset += len;
        }
        Ok(())
    }

    /// Flushes pending writes to durable storage.
    fn sync(&mut self) -> Result<(), FlashError> {
        Ok(())
    }
}

/// Checks that `[offset, offset + len)` lies within `capacity`.
pub fn check_range(offset: usize, len: usize, capacity: usize) -> Result<(), FlashError> {
    match offset.checked_add(len) {
        Some(end) if end <= capacity => Ok(()),
        _ => Err(FlashError::OutOfRange { offset, len, capacity }),
    }
}

/// Fault injected into the next writes of a [`MemFlash`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WriteFault {
    /// Writes behave normally.
    #[default]
    None,
    /// Every write fails with [`FlashError::Io`].
    Fail,
    /// Only the first `budget` bytes (counted across writes) reach the medium;
    /// the rest is silently dropped, as in a torn write on power loss.
    Torn {
        /// Bytes still allowed to land.
        budget: usize,
    },
}

/// In-memory flash region for testing.
///
/// Clones share the same backing memory, so a test can keep a handle to a
/// region after handing it to a slot manager and inspect or corrupt it.
#[derive(Debug, Clone)]
pub struct MemFlash {
    cells: Rc<RefCell<Vec<u8>>>,
    fault: Rc<Cell<WriteFault>>,
    writes: Rc<Cell<usize>>,
}

impl MemFlash {
    /// Creates an erased region of `capacity` bytes.
    pub fn new(capacity: usize) -> Self {
        Self {
            cells: Rc::new(RefCell::new(vec![ERASED_BYTE; capacity])),
            fault: Rc::new(Cell::new(WriteFault::None)),
            writes: Rc::new(Cell::new(0)),
        }
    }

    /// Arms a fault for subsequent writes.
    pub fn set_fault(&self, fault: WriteFault) {
        self.fault.set(fault);
    }

    /// Number of successful `write_region` calls so far.
    pub fn write_count(&self) -> usize {
        self.writes.get()
    }

    /// Copy of the raw region contents.
    pub fn snapshot(&self) -> Vec<u8> {
        self.cells.borrow().clone()
    }

    /// XORs `mask` into the byte at `offset`, bypassing the write path.
    pub fn corrupt(&self, offset: usize, mask: u8) {
        if let Some(byte) = self.cells.borrow_mut().get_mut(offset) {
            *byte ^= mask;
        }
    }
}

impl FlashRegion for MemFlash {
    fn capacity(&self) -> usize {
        self.cells.borrow().len()
    }

    fn read_region(&self, offset: usize, buf: &mut [u8]) -> Result<(), FlashError> {
        let cells = self.cells.borrow();
        check_range(offset, buf.len(), cells.len())?;
        buf.copy_from_slice(&cells[offset..offset + buf.len()]);
        Ok(())
    }

    fn write_region(&mut self, offset: usize, data: &[u8]) -> Result<(), FlashError> {
        let mut cells = self.cells.borrow_mut();
        check_range(offset, data.len(), cells.len())?;
        let landed = match self.fault.get() {
            WriteFault::None => data.len(),
            WriteFault::Fail => return Err(FlashError::Io("injected write failure")),
            WriteFault::Torn { budget } => {
                let landed = budget.min(data.len());
                self.fault.set(WriteFault::Torn { budget: budget - landed });
                landed
            }
        };
        cells[offset..offset + landed].copy_from_slice(&data[..landed]);
        self.writes.set(self.writes.get() + 1);
        Ok(())
    }
}
