//! Fragments: the units that contribute bytes (or well-known filler) to an
//! output section, and the ordered per-section sequences they live in.
//!
//! Offsets are assigned at append time and are contiguous: a fragment's
//! offset is the end of the fragment before it, plus any alignment padding
//! inserted between them.

use crate::output_sections::OutputSectionId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FragmentId(u32);

impl FragmentId {
    pub(crate) fn from_usize(value: usize) -> FragmentId {
        FragmentId(u32::try_from(value).expect("Fragment store overflowed u32"))
    }

    pub fn as_usize(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SectionDataId(u32);

impl SectionDataId {
    pub(crate) fn from_usize(value: usize) -> SectionDataId {
        SectionDataId(u32::try_from(value).expect("Section data store overflowed u32"))
    }

    pub fn as_usize(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug)]
pub enum FragmentKind {
    /// Regular content copied from an input section.
    Region(Box<[u8]>),
    /// Padding synthesized to satisfy an alignment constraint. The size is
    /// fixed when the fragment is appended.
    Alignment { size: u64, fill: u8 },
    /// Repeated filler with no backing input bytes (BSS, common allocation).
    Fill { size: u64, value: u8 },
    /// Zero-size marker for the current logical end of a section.
    Null,
    /// Backend-synthesized trampoline code.
    Stub(Box<[u8]>),
}

#[derive(Debug)]
pub struct Fragment {
    pub kind: FragmentKind,
    /// Offset within the owning section. Assigned at append time.
    pub offset: u64,
    pub parent: Option<SectionDataId>,
}

impl Fragment {
    pub fn region(bytes: impl Into<Box<[u8]>>) -> Fragment {
        Fragment::new(FragmentKind::Region(bytes.into()))
    }

    pub fn fill(size: u64, value: u8) -> Fragment {
        Fragment::new(FragmentKind::Fill { size, value })
    }

    pub fn stub(bytes: impl Into<Box<[u8]>>) -> Fragment {
        Fragment::new(FragmentKind::Stub(bytes.into()))
    }

    pub(crate) fn new(kind: FragmentKind) -> Fragment {
        Fragment {
            kind,
            offset: 0,
            parent: None,
        }
    }

    pub fn size(&self) -> u64 {
        match &self.kind {
            FragmentKind::Region(bytes) => bytes.len() as u64,
            FragmentKind::Alignment { size, .. } => *size,
            FragmentKind::Fill { size, .. } => *size,
            FragmentKind::Null => 0,
            FragmentKind::Stub(bytes) => bytes.len() as u64,
        }
    }

    pub fn end_offset(&self) -> u64 {
        self.offset + self.size()
    }
}

/// A located byte range: a fragment plus an offset within it. Read-only once
/// constructed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FragmentRef {
    pub fragment: FragmentId,
    pub offset: u64,
}

impl FragmentRef {
    pub fn new(fragment: FragmentId, offset: u64) -> FragmentRef {
        FragmentRef { fragment, offset }
    }
}

/// Ordered fragment sequence owned by one output section.
#[derive(Debug)]
pub struct SectionData {
    pub section: OutputSectionId,
    pub fragments: Vec<FragmentId>,
}

impl SectionData {
    pub fn new(section: OutputSectionId) -> SectionData {
        SectionData {
            section,
            fragments: Vec::new(),
        }
    }
}

/// Rounds `offset` up to `alignment`, which must be a power of two.
pub(crate) fn align_up(offset: u64, alignment: u64) -> u64 {
    debug_assert!(alignment.is_power_of_two());
    offset.next_multiple_of(alignment)
}
