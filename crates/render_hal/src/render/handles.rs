//! Stable logical handles for GPU buffers
//!
//! Buffers registered with a GPU object are stored in an append-only table.
//! A handle is the buffer's position in that table, so once issued it keeps
//! naming the same buffer for as long as the table lives and is never handed
//! out twice.

use std::fmt;

/// Logical handle of a buffer inside a GPU object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferHandle(usize);

impl BufferHandle {
    /// Handle for the buffer registered at `index`
    pub const fn new(index: usize) -> Self {
        Self(index)
    }

    /// Position of the buffer in its table
    pub const fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for BufferHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Append-only table that issues [`BufferHandle`]s
#[derive(Debug)]
pub struct HandleTable<T> {
    entries: Vec<T>,
}

impl<T> HandleTable<T> {
    /// Create an empty table
    pub const fn new() -> Self {
        Self { entries: Vec::new() }
    }

    /// Store `value` and return its handle
    pub fn insert(&mut self, value: T) -> BufferHandle {
        self.entries.push(value);
        BufferHandle(self.entries.len() - 1)
    }

    /// Look up the value behind `handle`
    pub fn get(&self, handle: BufferHandle) -> Option<&T> {
        self.entries.get(handle.0)
    }

    /// Number of registered values
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when nothing has been registered
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over handles and values in registration order
    pub fn iter(&self) -> impl Iterator<Item = (BufferHandle, &T)> {
        self.entries.iter().enumerate().map(|(i, value)| (BufferHandle(i), value))
    }

    /// Iterate over values in registration order
    pub fn values(&self) -> std::slice::Iter<'_, T> {
        self.entries.iter()
    }
}

impl<T> Default for HandleTable<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handles_are_dense_and_stable() {
        let mut table = HandleTable::new();
        let a = table.insert("a");
        let b = table.insert("b");

        assert_eq!(a.index(), 0);
        assert_eq!(b.index(), 1);
        assert_eq!(table.get(a), Some(&"a"));

        table.insert("c");
        assert_eq!(table.get(a), Some(&"a"));
        assert_eq!(table.get(b), Some(&"b"));
        assert_eq!(table.len(), 3);
    }

    #[test]
    fn unknown_handle_is_none() {
        let table: HandleTable<u32> = HandleTable::default();
        assert!(table.is_empty());
        assert_eq!(table.get(BufferHandle::new(0)), None);
    }
}
