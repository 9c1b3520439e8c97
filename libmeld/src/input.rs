//! Pre-parsed input files. The core doesn't read ELF bytes itself; the
//! session feeds it these records and the driver walks them in command-line
//! order, which is what makes the whole link deterministic.

use crate::args::InputAttributes;
use crate::output_sections::SectionFlags;
use crate::output_sections::SectionKind;
use crate::symbol_db::Binding;
use crate::symbol_db::SymbolDesc;
use crate::symbol_db::SymbolType;
use crate::symbol_db::Visibility;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InputId(u32);

impl InputId {
    pub(crate) fn from_usize(value: usize) -> InputId {
        InputId(u32::try_from(value).expect("Input list overflowed u32"))
    }

    pub fn as_usize(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputType {
    Object,
    DynObj,
    Archive,
    Script,
    External,
}

#[derive(Debug, Clone)]
pub struct Input {
    pub name: String,
    pub input_type: InputType,
    pub attributes: InputAttributes,
}

impl Input {
    pub fn new(name: impl Into<String>, input_type: InputType) -> Input {
        Input {
            name: name.into(),
            input_type,
            attributes: InputAttributes::default(),
        }
    }

    /// Whether this input contributes sections and symbols to the link.
    pub fn is_linkable(&self) -> bool {
        matches!(self.input_type, InputType::Object | InputType::DynObj)
    }
}

/// One input file's contribution, already parsed into flat records. Symbol
/// records reference sections by index into `sections`; relocation records
/// reference both tables the same way.
#[derive(Debug)]
pub struct InputObject {
    pub input: Input,
    pub sections: Vec<SectionRecord>,
    pub symbols: Vec<SymbolRecord>,
    pub relocations: Vec<RelocationRecord>,
}

impl InputObject {
    pub fn new(input: Input) -> InputObject {
        InputObject {
            input,
            sections: Vec::new(),
            symbols: Vec::new(),
            relocations: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SectionRecord {
    pub name: String,
    pub kind: SectionKind,
    pub sh_type: u32,
    pub flags: SectionFlags,
    pub alignment: u64,
    /// Memory size. Equals `bytes.len()` except for BSS-like sections, which
    /// carry no bytes.
    pub size: u64,
    pub bytes: Vec<u8>,
}

impl SectionRecord {
    pub fn regular(
        name: impl Into<String>,
        kind: SectionKind,
        sh_type: u32,
        flags: SectionFlags,
        alignment: u64,
        bytes: Vec<u8>,
    ) -> SectionRecord {
        let size = bytes.len() as u64;
        SectionRecord {
            name: name.into(),
            kind,
            sh_type,
            flags,
            alignment,
            size,
            bytes,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SymbolRecord {
    pub name: Vec<u8>,
    pub sym_type: SymbolType,
    pub desc: SymbolDesc,
    pub binding: Binding,
    pub visibility: Visibility,
    pub size: u64,
    pub value: u64,
    /// Index into the owning object's `sections`, for defined symbols.
    pub section: Option<usize>,
    /// Offset within that section.
    pub offset: u64,
}

#[derive(Debug, Clone, Copy)]
pub struct RelocationRecord {
    /// Index of the section the relocation patches.
    pub section: usize,
    pub r_type: u32,
    /// Index into the owning object's `symbols`.
    pub symbol: usize,
    pub offset: u64,
    pub addend: i64,
}
