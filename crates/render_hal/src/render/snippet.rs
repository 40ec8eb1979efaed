//! Index snippets for multi-draw batching
//!
//! Several logically separate meshes often share one vertex buffer and one
//! index buffer. An [`IndexSnippetList`] names the index sub-range of each of
//! them so they can be drawn with a single multi-draw-indirect command
//! instead of one draw call per sub-mesh.
//!
//! A list is only submitted after the sanity check has confirmed that every
//! range lies inside the index buffer it will read from. A list with a single
//! bad range is rejected as a whole.

use thiserror::Error;

use crate::render::api::DrawIndexedIndirect;

/// A contiguous range of an index buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IndexSnippet {
    /// First index of the range, counted in elements
    pub offset: u32,
    /// Number of indices in the range
    pub count: u32,
}

impl IndexSnippet {
    /// Range of `count` indices starting at `offset`
    pub const fn new(offset: u32, count: u32) -> Self {
        Self { offset, count }
    }

    /// One past the last index covered, without overflow
    pub const fn end(&self) -> u64 {
        self.offset as u64 + self.count as u64
    }

    /// True when the range lies inside a buffer of `index_count` indices
    pub const fn fits(&self, index_count: u32) -> bool {
        self.end() <= index_count as u64
    }
}

impl From<(u32, u32)> for IndexSnippet {
    fn from((offset, count): (u32, u32)) -> Self {
        Self::new(offset, count)
    }
}

/// A snippet failed the bounds check
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnippetError {
    /// The range reads past the end of the index buffer
    #[error("Snippet {position} covers indices {offset}..{end} but the index buffer holds {index_count}")]
    OutOfBounds {
        /// Position of the snippet in its list
        position: usize,
        /// First index of the snippet
        offset: u32,
        /// One past the last index of the snippet
        end: u64,
        /// Number of indices in the buffer
        index_count: u32,
    },
}

/// Ordered list of index ranges; draw order is list order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexSnippetList {
    snippets: Vec<IndexSnippet>,
}

impl IndexSnippetList {
    /// Create an empty list
    pub const fn new() -> Self {
        Self { snippets: Vec::new() }
    }

    /// Append a range of `count` indices starting at `offset`
    pub fn add_range(&mut self, offset: u32, count: u32) -> &mut Self {
        self.snippets.push(IndexSnippet::new(offset, count));
        self
    }

    /// Append a snippet
    pub fn push(&mut self, snippet: IndexSnippet) {
        self.snippets.push(snippet);
    }

    /// Number of snippets
    pub fn len(&self) -> usize {
        self.snippets.len()
    }

    /// True when the list holds no snippets
    pub fn is_empty(&self) -> bool {
        self.snippets.is_empty()
    }

    /// Snippets in draw order
    pub fn iter(&self) -> std::slice::Iter<'_, IndexSnippet> {
        self.snippets.iter()
    }

    /// Total number of indices drawn by the list
    pub fn total_indices(&self) -> u64 {
        self.snippets.iter().map(|s| u64::from(s.count)).sum()
    }

    /// Check every snippet against an index buffer of `index_count` indices
    ///
    /// Reports the first snippet, in list order, that reads out of bounds.
    pub fn sanity_check(&self, index_count: u32) -> Result<(), SnippetError> {
        match self.snippets.iter().position(|s| !s.fits(index_count)) {
            Some(position) => {
                let snippet = self.snippets[position];
                Err(SnippetError::OutOfBounds {
                    position,
                    offset: snippet.offset,
                    end: snippet.end(),
                    index_count,
                })
            }
            None => Ok(()),
        }
    }

    /// One single-instance indirect command per snippet, in list order
    pub fn to_indirect_commands(&self) -> Vec<DrawIndexedIndirect> {
        self.snippets
            .iter()
            .map(|s| DrawIndexedIndirect::new(s.offset, s.count))
            .collect()
    }
}

impl From<Vec<(u32, u32)>> for IndexSnippetList {
    fn from(ranges: Vec<(u32, u32)>) -> Self {
        ranges.into_iter().map(IndexSnippet::from).collect()
    }
}

impl FromIterator<IndexSnippet> for IndexSnippetList {
    fn from_iter<I: IntoIterator<Item = IndexSnippet>>(iter: I) -> Self {
        Self {
            snippets: iter.into_iter().collect(),
        }
    }
}

impl<'a> IntoIterator for &'a IndexSnippetList {
    type Item = &'a IndexSnippet;
    type IntoIter = std::slice::Iter<'a, IndexSnippet>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ranges_inside_the_buffer_pass() {
        let list = IndexSnippetList::from(vec![(0, 3), (3, 3), (6, 6)]);
        assert_eq!(list.sanity_check(12), Ok(()));
        assert_eq!(list.total_indices(), 12);
    }

    #[test]
    fn range_past_the_end_fails() {
        let list = IndexSnippetList::from(vec![(0, 3), (3, 3), (6, 7)]);
        assert_eq!(
            list.sanity_check(12),
            Err(SnippetError::OutOfBounds {
                position: 2,
                offset: 6,
                end: 13,
                index_count: 12,
            })
        );
    }

    #[test]
    fn first_offending_snippet_is_reported() {
        let list = IndexSnippetList::from(vec![(20, 1), (0, 1), (30, 1)]);
        let Err(SnippetError::OutOfBounds { position, .. }) = list.sanity_check(10) else {
            panic!("expected an out-of-bounds snippet");
        };
        assert_eq!(position, 0);
    }

    #[test]
    fn huge_ranges_do_not_overflow() {
        let list = IndexSnippetList::from(vec![(u32::MAX, u32::MAX)]);
        assert!(list.sanity_check(u32::MAX).is_err());
        assert!(IndexSnippet::new(u32::MAX, 0).fits(u32::MAX));
    }

    #[test]
    fn empty_ranges_at_the_end_are_in_bounds() {
        let mut list = IndexSnippetList::new();
        list.add_range(12, 0);
        assert!(list.sanity_check(12).is_ok());
        assert!(list.sanity_check(11).is_err());
    }

    #[test]
    fn indirect_commands_keep_list_order() {
        let list = IndexSnippetList::from(vec![(6, 6), (0, 3), (3, 3)]);
        let commands = list.to_indirect_commands();
        let ranges: Vec<_> = commands.iter().map(|c| (c.first_index, c.index_count)).collect();
        assert_eq!(ranges, vec![(6, 6), (0, 3), (3, 3)]);
        assert!(commands.iter().all(|c| c.instance_count == 1));
    }
}
