//! Relocation records and the byte-level writer that syncs computed values
//! into the output image.

use crate::fragment::FragmentRef;
use crate::output_sections::OutputSectionId;
use crate::platform::BitClass;
use crate::symbol_db::SymbolId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RelocDataId(u32);

impl RelocDataId {
    pub(crate) fn from_usize(value: usize) -> RelocDataId {
        RelocDataId(u32::try_from(value).expect("Relocation data store overflowed u32"))
    }

    pub fn as_usize(self) -> usize {
        self.0 as usize
    }
}

/// A pending fixup. Created when relocations are read, given a value by the
/// apply phase, and written out by the sync phase.
#[derive(Debug, Clone, Copy)]
pub struct Relocation {
    pub r_type: u32,
    pub symbol: SymbolId,
    /// The location being patched.
    pub target_ref: FragmentRef,
    pub addend: i64,
    value: u64,
}

impl Relocation {
    pub fn new(r_type: u32, symbol: SymbolId, target_ref: FragmentRef, addend: i64) -> Relocation {
        Relocation {
            r_type,
            symbol,
            target_ref,
            addend,
            value: 0,
        }
    }

    /// The computed result. Only meaningful after the apply phase.
    pub fn value(&self) -> u64 {
        self.value
    }

    pub fn set_value(&mut self, value: u64) {
        self.value = value;
    }
}

/// Relocation entries owned by one output section. Unlike section data there
/// is no alignment or sentinel bookkeeping: relocation entries are not byte
/// content.
#[derive(Debug)]
pub struct RelocData {
    pub section: OutputSectionId,
    pub relocations: Vec<Relocation>,
}

impl RelocData {
    pub fn new(section: OutputSectionId) -> RelocData {
        RelocData {
            section,
            relocations: Vec::new(),
        }
    }
}

/// Writes a relocation result into `out` at its start, using the byte width
/// implied by the target's bit class and swapping byte order iff the target
/// isn't little-endian. `out` must be at least the byte width long.
pub(crate) fn write_relocation_value(
    value: u64,
    bit_class: BitClass,
    little_endian: bool,
    out: &mut [u8],
) {
    match (bit_class, little_endian) {
        (BitClass::B32, true) => out[..4].copy_from_slice(&(value as u32).to_le_bytes()),
        (BitClass::B32, false) => out[..4].copy_from_slice(&(value as u32).to_be_bytes()),
        (BitClass::B64, true) => out[..8].copy_from_slice(&value.to_le_bytes()),
        (BitClass::B64, false) => out[..8].copy_from_slice(&value.to_be_bytes()),
    }
}
