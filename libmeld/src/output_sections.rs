//! Output sections and the rules that route input sections into them.

use crate::args::OutputKind;
use crate::fragment::SectionDataId;
use crate::relocation::RelocDataId;
use indexmap::IndexMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OutputSectionId(u32);

impl OutputSectionId {
    pub(crate) fn from_usize(value: usize) -> OutputSectionId {
        OutputSectionId(u32::try_from(value).expect("Section table overflowed u32"))
    }

    pub fn as_usize(self) -> usize {
        self.0 as usize
    }
}

bitflags::bitflags! {
    /// The `SHF_*` bits the core inspects. Values match the ELF section
    /// header flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct SectionFlags: u64 {
        const WRITE = object::elf::SHF_WRITE as u64;
        const ALLOC = object::elf::SHF_ALLOC as u64;
        const EXECINSTR = object::elf::SHF_EXECINSTR as u64;
        const MERGE = object::elf::SHF_MERGE as u64;
        const STRINGS = object::elf::SHF_STRINGS as u64;
        const INFO_LINK = object::elf::SHF_INFO_LINK as u64;
        const GROUP = object::elf::SHF_GROUP as u64;
        const TLS = object::elf::SHF_TLS as u64;
    }
}

/// Classification of a section's role in the link. Closed set: append
/// routing and rule registration match on it exhaustively.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectionKind {
    Null,
    Regular,
    Bss,
    NamePool,
    Relocation,
    Debug,
    Note,
    ExceptionFrame,
    ExceptionFrameHeader,
    ExceptionTable,
    Version,
    Target,
    MetaData,
    Group,
    Ignore,
}

impl SectionKind {
    /// Whether an input section of this kind gets a merge rule registered,
    /// making it a routing destination for later inputs. Sections produced
    /// directly by the output-format writer never do; relocation sections do
    /// only when the output itself is relocatable.
    pub fn registers_merge_rule(self, output_kind: OutputKind) -> bool {
        match self {
            SectionKind::Regular
            | SectionKind::Bss
            | SectionKind::Debug
            | SectionKind::ExceptionTable
            | SectionKind::Version
            | SectionKind::Target => true,
            SectionKind::Relocation => output_kind.is_relocatable(),
            SectionKind::Null
            | SectionKind::NamePool
            | SectionKind::ExceptionFrame
            | SectionKind::ExceptionFrameHeader
            | SectionKind::Note
            | SectionKind::Group
            | SectionKind::MetaData
            | SectionKind::Ignore => false,
        }
    }

    /// BSS-like sections occupy memory but no file bytes.
    pub fn has_file_content(self) -> bool {
        !matches!(self, SectionKind::Bss | SectionKind::Null | SectionKind::Ignore)
    }
}

/// A named output section. Address and file offset are only valid once the
/// layout collaborator has run.
#[derive(Debug)]
pub struct OutputSection {
    pub name: String,
    pub kind: SectionKind,
    pub sh_type: u32,
    pub flags: SectionFlags,
    pub alignment: u64,
    pub size: u64,
    pub address: u64,
    pub file_offset: u64,
    pub data: Option<SectionDataId>,
    pub reloc_data: Option<RelocDataId>,
}

impl OutputSection {
    pub fn new(
        name: impl Into<String>,
        kind: SectionKind,
        sh_type: u32,
        flags: SectionFlags,
    ) -> OutputSection {
        OutputSection {
            name: name.into(),
            kind,
            sh_type,
            flags,
            alignment: 1,
            size: 0,
            address: 0,
            file_offset: 0,
            data: None,
            reloc_data: None,
        }
    }

    pub fn with_alignment(mut self, alignment: u64) -> OutputSection {
        self.alignment = alignment.max(1);
        self
    }
}

/// Maps an input section name to the output section name it coalesces into.
/// The identity mapping applies when a name is unmapped.
pub trait SectionNameMap {
    fn map_section_name<'a>(&'a self, input_name: &'a str) -> &'a str;
}

/// The default mapping: every input section keeps its own name.
#[derive(Debug, Default)]
pub struct IdentityNameMap;

impl SectionNameMap for IdentityNameMap {
    fn map_section_name<'a>(&'a self, input_name: &'a str) -> &'a str {
        input_name
    }
}

/// A fixed table of name pairs, consulted before falling back to identity.
#[derive(Debug, Default)]
pub struct SectionMap {
    pairs: IndexMap<String, String>,
}

impl SectionMap {
    pub fn insert(&mut self, from: impl Into<String>, to: impl Into<String>) {
        self.pairs.insert(from.into(), to.into());
    }
}

impl SectionNameMap for SectionMap {
    fn map_section_name<'a>(&'a self, input_name: &'a str) -> &'a str {
        self.pairs
            .get(input_name)
            .map(String::as_str)
            .unwrap_or(input_name)
    }
}

/// The worklist of merge rules: input section names that have been routed to
/// an output section. Insertion order is creation order, which keeps lookups
/// deterministic across runs.
#[derive(Debug, Default)]
pub struct SectionRules {
    rules: IndexMap<String, OutputSectionId>,
}

impl SectionRules {
    pub fn append(&mut self, input_name: impl Into<String>, section: OutputSectionId) {
        self.rules.entry(input_name.into()).or_insert(section);
    }

    pub fn matched_section(&self, input_name: &str) -> Option<OutputSectionId> {
        self.rules.get(input_name).copied()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rule_registration_policy() {
        for kind in [
            SectionKind::Regular,
            SectionKind::Bss,
            SectionKind::Debug,
            SectionKind::ExceptionTable,
            SectionKind::Version,
            SectionKind::Target,
        ] {
            assert!(kind.registers_merge_rule(OutputKind::Executable));
        }
        assert!(!SectionKind::Relocation.registers_merge_rule(OutputKind::Executable));
        assert!(SectionKind::Relocation.registers_merge_rule(OutputKind::Relocatable));
        for kind in [
            SectionKind::Null,
            SectionKind::NamePool,
            SectionKind::ExceptionFrame,
            SectionKind::ExceptionFrameHeader,
            SectionKind::Note,
            SectionKind::Group,
            SectionKind::MetaData,
            SectionKind::Ignore,
        ] {
            assert!(!kind.registers_merge_rule(OutputKind::Relocatable));
        }
    }

    #[test]
    fn section_map_falls_back_to_identity() {
        let mut map = SectionMap::default();
        map.insert(".text.hot", ".text");
        assert_eq!(map.map_section_name(".text.hot"), ".text");
        assert_eq!(map.map_section_name(".data"), ".data");
    }

    #[test]
    fn first_rule_wins() {
        let mut rules = SectionRules::default();
        let a = OutputSectionId::from_usize(0);
        let b = OutputSectionId::from_usize(1);
        rules.append(".text", a);
        rules.append(".text", b);
        assert_eq!(rules.matched_section(".text"), Some(a));
    }
}
