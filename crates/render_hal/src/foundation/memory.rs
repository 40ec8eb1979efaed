//! Byte-range views and owned allocations
//!
//! Every upload into a GPU buffer goes through one of two types:
//!
//! - [`MemoryBlock`]: a borrowed, non-owning view over contiguous bytes. Its
//!   size is always reported in bytes, no matter which element type it was
//!   built from.
//! - [`OwnedMemoryBlock`]: an exclusive owner of a heap allocation. It can be
//!   moved but not copied, and adopting an existing allocation through
//!   [`OwnedMemoryBlock::take`] is a move of the allocation itself.
//!
//! Malformed ranges and undersized copy destinations are reported as
//! [`MemoryError`] values instead of being left to the caller's discipline.

use bytemuck::Pod;
use std::fmt;
use std::ops::Range;
use thiserror::Error;

/// Errors raised while building or copying memory blocks
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MemoryError {
    /// The range start lies past its end
    #[error("Inverted range: start {start} is past end {end}")]
    InvertedRange {
        /// First element of the requested range
        start: usize,
        /// One-past-last element of the requested range
        end: usize,
    },

    /// The range reaches past the end of the source slice
    #[error("Range end {end} exceeds {len} available elements")]
    OutOfBounds {
        /// One-past-last element of the requested range
        end: usize,
        /// Number of elements in the source slice
        len: usize,
    },

    /// A copy destination is smaller than its source
    #[error("Destination too small: {required} bytes required, {available} available")]
    DestinationTooSmall {
        /// Bytes the copy needs to write
        required: usize,
        /// Bytes the destination can hold
        available: usize,
    },

    /// The bytes cannot be reinterpreted as the requested element type
    #[error("Block of {size} bytes cannot be viewed as {element_size}-byte elements")]
    ElementMismatch {
        /// Block size in bytes
        size: usize,
        /// Size of the requested element type
        element_size: usize,
    },
}

/// Non-owning view over a contiguous byte range
///
/// Equality compares the start address and the byte length, not the
/// contents: two views are equal when they describe the same memory.
#[derive(Clone, Copy)]
pub struct MemoryBlock<'a> {
    bytes: &'a [u8],
}

impl<'a> MemoryBlock<'a> {
    /// A zero-length view
    pub const fn empty() -> Self {
        Self { bytes: &[] }
    }

    /// View over every element of `elements`
    pub fn new<T: Pod>(elements: &'a [T]) -> Self {
        Self {
            bytes: bytemuck::cast_slice(elements),
        }
    }

    /// View over the elements `range` of `elements`
    ///
    /// The resulting size is `range.len() * size_of::<T>()` bytes.
    pub fn from_elements<T: Pod>(elements: &'a [T], range: Range<usize>) -> Result<Self, MemoryError> {
        if range.start > range.end {
            return Err(MemoryError::InvertedRange {
                start: range.start,
                end: range.end,
            });
        }
        if range.end > elements.len() {
            return Err(MemoryError::OutOfBounds {
                end: range.end,
                len: elements.len(),
            });
        }
        Ok(Self::new(&elements[range]))
    }

    /// View over raw bytes
    pub const fn from_bytes(bytes: &'a [u8]) -> Self {
        Self { bytes }
    }

    /// Length of the view in bytes
    pub const fn size(&self) -> usize {
        self.bytes.len()
    }

    /// True when the view covers no bytes
    pub const fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Start address of the view
    pub const fn as_ptr(&self) -> *const u8 {
        self.bytes.as_ptr()
    }

    /// The viewed bytes
    pub const fn as_bytes(&self) -> &'a [u8] {
        self.bytes
    }

    /// Copy every byte of this view into the front of `dst`
    pub fn copy_to(&self, dst: &mut OwnedMemoryBlock) -> Result<(), MemoryError> {
        let available = dst.size();
        if available < self.size() {
            return Err(MemoryError::DestinationTooSmall {
                required: self.size(),
                available,
            });
        }
        dst.as_bytes_mut()[..self.size()].copy_from_slice(self.bytes);
        Ok(())
    }

    /// Copy the viewed bytes into a fresh allocation
    pub fn to_owned_block(&self) -> OwnedMemoryBlock {
        let mut owned = OwnedMemoryBlock::zeroed(self.size());
        owned.as_bytes_mut().copy_from_slice(self.bytes);
        owned
    }
}

impl PartialEq for MemoryBlock<'_> {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self.bytes.as_ptr(), other.bytes.as_ptr()) && self.size() == other.size()
    }
}

impl Eq for MemoryBlock<'_> {}

impl fmt::Debug for MemoryBlock<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryBlock")
            .field("start", &self.as_ptr())
            .field("length_bytes", &self.size())
            .finish()
    }
}

impl Default for MemoryBlock<'_> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<'a, T: Pod> From<&'a [T]> for MemoryBlock<'a> {
    fn from(elements: &'a [T]) -> Self {
        Self::new(elements)
    }
}

/// Type-erased heap allocation adopted by an [`OwnedMemoryBlock`]
///
/// Keeping the original boxed slice around means the allocation is released
/// with the layout it was created with.
trait Allocation: Send + Sync {
    fn bytes(&self) -> &[u8];
    fn bytes_mut(&mut self) -> &mut [u8];
}

impl<T: Pod + Send + Sync> Allocation for Box<[T]> {
    fn bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self[..])
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
        bytemuck::cast_slice_mut(&mut self[..])
    }
}

/// Exclusive owner of a contiguous heap allocation
///
/// Move-only: there is no `Clone`, so a block always has exactly one owner and
/// is freed exactly once.
pub struct OwnedMemoryBlock {
    allocation: Box<dyn Allocation>,
    len: usize,
}

impl OwnedMemoryBlock {
    /// Allocate `len` zeroed bytes, aligned for any primitive element type
    pub fn zeroed(len: usize) -> Self {
        let words = (len + 15) / 16;
        let storage: Box<[u128]> = vec![0u128; words].into_boxed_slice();
        Self {
            allocation: Box::new(storage),
            len,
        }
    }

    /// Adopt an existing heap allocation without copying it
    ///
    /// The allocation moves into the block; no other owner can free it
    /// afterwards.
    pub fn take<T: Pod + Send + Sync>(allocation: Box<[T]>) -> Self {
        let len = std::mem::size_of_val(&*allocation);
        Self {
            allocation: Box::new(allocation),
            len,
        }
    }

    /// Length of the block in bytes
    pub fn size(&self) -> usize {
        self.len
    }

    /// True when the block holds no bytes
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Borrow the block as a non-owning view
    pub fn view(&self) -> MemoryBlock<'_> {
        MemoryBlock::from_bytes(self.as_bytes())
    }

    /// The owned bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.allocation.bytes()[..self.len]
    }

    /// The owned bytes, mutably
    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        let len = self.len;
        &mut self.allocation.bytes_mut()[..len]
    }

    /// Reinterpret the block as a slice of `T` in place
    pub fn as_slice<T: Pod>(&self) -> Result<&[T], MemoryError> {
        bytemuck::try_cast_slice(self.as_bytes()).map_err(|_| MemoryError::ElementMismatch {
            size: self.len,
            element_size: std::mem::size_of::<T>(),
        })
    }

    /// Read the block back as owned elements of `T`, regardless of alignment
    pub fn to_vec<T: Pod>(&self) -> Result<Vec<T>, MemoryError> {
        let element_size = std::mem::size_of::<T>();
        if element_size == 0 || self.len % element_size != 0 {
            return Err(MemoryError::ElementMismatch {
                size: self.len,
                element_size,
            });
        }
        Ok(bytemuck::pod_collect_to_vec(self.as_bytes()))
    }

    /// Copy every byte of this block into the front of `dst`
    pub fn copy_to(&self, dst: &mut Self) -> Result<(), MemoryError> {
        self.view().copy_to(dst)
    }
}

impl fmt::Debug for OwnedMemoryBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OwnedMemoryBlock")
            .field("start", &self.as_bytes().as_ptr())
            .field("length_bytes", &self.len)
            .finish()
    }
}

impl<T: Pod + Send + Sync> From<Vec<T>> for OwnedMemoryBlock {
    fn from(elements: Vec<T>) -> Self {
        Self::take(elements.into_boxed_slice())
    }
}
