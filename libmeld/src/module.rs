//! The module: the single store for everything the link accumulates. All
//! cross-references between stores are plain index handles, so any phase can
//! look anything up without holding borrows across calls.

use crate::fragment::Fragment;
use crate::fragment::FragmentId;
use crate::fragment::FragmentKind;
use crate::fragment::FragmentRef;
use crate::fragment::SectionData;
use crate::fragment::SectionDataId;
use crate::fragment::align_up;
use crate::input::InputId;
use crate::output_sections::OutputSection;
use crate::output_sections::OutputSectionId;
use crate::relocation::RelocData;
use crate::relocation::RelocDataId;
use crate::stub::BranchIsland;
use crate::symbol::SymbolInstance;
use crate::symbol::SymbolInstanceId;
use crate::symbol::SymbolTable;
use crate::symbol_db::SymbolDb;

/// What appending a fragment to a section cost: the padding inserted to meet
/// the alignment constraint plus the fragment's own size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppendResult {
    pub padding: u64,
    pub size: u64,
}

impl AppendResult {
    pub fn total(self) -> u64 {
        self.padding + self.size
    }
}

#[derive(Default)]
pub struct Module {
    sections: Vec<OutputSection>,
    section_data: Vec<SectionData>,
    fragments: Vec<Fragment>,
    symbols: Vec<SymbolInstance>,
    reloc_data: Vec<RelocData>,
    pub symbol_db: SymbolDb,
    pub symbol_table: SymbolTable,
    pub islands: Vec<BranchIsland>,
    /// The input currently being merged, for backends that account
    /// reservations per input.
    pub current_input: Option<InputId>,
}

impl Module {
    pub fn new() -> Module {
        Module::default()
    }

    // ----- sections -----

    pub fn add_section(&mut self, section: OutputSection) -> OutputSectionId {
        let id = OutputSectionId::from_usize(self.sections.len());
        self.sections.push(section);
        id
    }

    pub fn section(&self, id: OutputSectionId) -> &OutputSection {
        &self.sections[id.as_usize()]
    }

    pub fn section_mut(&mut self, id: OutputSectionId) -> &mut OutputSection {
        &mut self.sections[id.as_usize()]
    }

    pub fn num_sections(&self) -> usize {
        self.sections.len()
    }

    pub fn section_ids(&self) -> impl Iterator<Item = OutputSectionId> {
        (0..self.sections.len()).map(OutputSectionId::from_usize)
    }

    pub fn find_section(&self, name: &str) -> Option<OutputSectionId> {
        self.sections
            .iter()
            .position(|section| section.name == name)
            .map(OutputSectionId::from_usize)
    }

    // ----- section data -----

    pub fn add_section_data(&mut self, section: OutputSectionId) -> SectionDataId {
        let id = SectionDataId::from_usize(self.section_data.len());
        self.section_data.push(SectionData::new(section));
        self.sections[section.as_usize()].data = Some(id);
        id
    }

    pub fn section_data(&self, id: SectionDataId) -> &SectionData {
        &self.section_data[id.as_usize()]
    }

    pub fn section_data_mut(&mut self, id: SectionDataId) -> &mut SectionData {
        &mut self.section_data[id.as_usize()]
    }

    // ----- fragments -----

    pub fn add_fragment(&mut self, fragment: Fragment) -> FragmentId {
        let id = FragmentId::from_usize(self.fragments.len());
        self.fragments.push(fragment);
        id
    }

    pub fn fragment(&self, id: FragmentId) -> &Fragment {
        &self.fragments[id.as_usize()]
    }

    pub fn fragment_mut(&mut self, id: FragmentId) -> &mut Fragment {
        &mut self.fragments[id.as_usize()]
    }

    /// Appends a fragment to a section's data, assigning its offset as the
    /// end of the last fragment already there plus whatever padding
    /// `alignment` demands. Padding materializes as an alignment fragment so
    /// that the sequence's offsets stay contiguous and auditable; a zero-size
    /// sentinel after the fragment marks the section's current logical end.
    pub fn append_fragment(
        &mut self,
        data: SectionDataId,
        fragment: FragmentId,
        alignment: u64,
    ) -> AppendResult {
        let mut offset = self.end_of_section_data(data);

        let mut padding = 0;
        if alignment > 1 {
            let aligned = align_up(offset, alignment);
            padding = aligned - offset;
            if padding > 0 {
                let pad_id = self.add_fragment(Fragment::new(FragmentKind::Alignment {
                    size: padding,
                    fill: 0,
                }));
                self.place(data, pad_id, offset);
            }
            offset = aligned;
        }

        self.place(data, fragment, offset);
        let size = self.fragment(fragment).size();

        let sentinel = self.add_fragment(Fragment::new(FragmentKind::Null));
        self.place(data, sentinel, offset + size);

        let section = self.section_data[data.as_usize()].section;
        let section = &mut self.sections[section.as_usize()];
        section.size = section.size.max(offset + size);
        section.alignment = section.alignment.max(alignment.max(1));

        AppendResult { padding, size }
    }

    fn place(&mut self, data: SectionDataId, fragment: FragmentId, offset: u64) {
        let slot = &mut self.fragments[fragment.as_usize()];
        slot.offset = offset;
        slot.parent = Some(data);
        self.section_data[data.as_usize()].fragments.push(fragment);
    }

    fn end_of_section_data(&self, data: SectionDataId) -> u64 {
        self.section_data[data.as_usize()]
            .fragments
            .last()
            .map(|&last| self.fragment(last).end_offset())
            .unwrap_or(0)
    }

    /// Offset of a located byte range within its output section.
    pub fn fragment_output_offset(&self, target: FragmentRef) -> u64 {
        self.fragment(target.fragment).offset + target.offset
    }

    /// The output section a fragment was appended to, walked through its
    /// parent section-data.
    pub fn output_section_of(&self, fragment: FragmentId) -> Option<OutputSectionId> {
        let data = self.fragment(fragment).parent?;
        Some(self.section_data[data.as_usize()].section)
    }

    // ----- symbol instances -----

    pub fn add_symbol_instance(&mut self, instance: SymbolInstance) -> SymbolInstanceId {
        let id = SymbolInstanceId::from_usize(self.symbols.len());
        self.symbols.push(instance);
        id
    }

    pub fn symbol(&self, id: SymbolInstanceId) -> &SymbolInstance {
        &self.symbols[id.as_usize()]
    }

    pub fn symbol_mut(&mut self, id: SymbolInstanceId) -> &mut SymbolInstance {
        &mut self.symbols[id.as_usize()]
    }

    pub fn num_symbols(&self) -> usize {
        self.symbols.len()
    }

    // ----- relocation data -----

    pub fn add_reloc_data(&mut self, section: OutputSectionId) -> RelocDataId {
        let id = RelocDataId::from_usize(self.reloc_data.len());
        self.reloc_data.push(RelocData::new(section));
        id
    }

    pub fn reloc_data(&self, id: RelocDataId) -> &RelocData {
        &self.reloc_data[id.as_usize()]
    }

    pub fn reloc_data_mut(&mut self, id: RelocDataId) -> &mut RelocData {
        &mut self.reloc_data[id.as_usize()]
    }

    pub fn num_reloc_data(&self) -> usize {
        self.reloc_data.len()
    }

    pub(crate) fn take_reloc_data(&mut self) -> Vec<RelocData> {
        std::mem::take(&mut self.reloc_data)
    }

    pub(crate) fn restore_reloc_data(&mut self, data: Vec<RelocData>) {
        self.reloc_data = data;
    }

    /// Bytes the image needs to hold every section that occupies file space.
    pub fn total_file_size(&self) -> u64 {
        self.sections
            .iter()
            .filter(|section| section.kind.has_file_content())
            .map(|section| section.file_offset + section.size)
            .max()
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output_sections::SectionFlags;
    use crate::output_sections::SectionKind;

    fn module_with_section() -> (Module, SectionDataId) {
        let mut module = Module::new();
        let section = module.add_section(OutputSection::new(
            ".text",
            SectionKind::Regular,
            object::elf::SHT_PROGBITS,
            SectionFlags::ALLOC | SectionFlags::EXECINSTR,
        ));
        let data = module.add_section_data(section);
        (module, data)
    }

    #[test]
    fn appended_fragments_are_contiguous() {
        let (mut module, data) = module_with_section();
        let a = module.add_fragment(Fragment::region(vec![0; 5]));
        let b = module.add_fragment(Fragment::region(vec![0; 3]));
        module.append_fragment(data, a, 1);
        module.append_fragment(data, b, 1);
        assert_eq!(module.fragment(a).offset, 0);
        assert_eq!(module.fragment(b).offset, 5);
        let section = module.section_data(data).section;
        assert_eq!(module.section(section).size, 8);
    }

    #[test]
    fn alignment_inserts_padding_fragment() {
        let (mut module, data) = module_with_section();
        let a = module.add_fragment(Fragment::region(vec![0; 5]));
        let b = module.add_fragment(Fragment::region(vec![0; 4]));
        module.append_fragment(data, a, 1);
        let result = module.append_fragment(data, b, 8);
        assert_eq!(result, AppendResult { padding: 3, size: 4 });
        assert_eq!(module.fragment(b).offset, 8);
        // The fragment sequence records the padding explicitly, and each
        // append leaves a sentinel marking the logical end.
        let fragments = &module.section_data(data).fragments;
        assert_eq!(fragments.len(), 5);
        assert!(matches!(
            module.fragment(fragments[2]).kind,
            FragmentKind::Alignment { size: 3, .. }
        ));
        assert!(matches!(
            module.fragment(*fragments.last().unwrap()).kind,
            FragmentKind::Null
        ));
    }

    #[test]
    fn mixed_alignment_sequence() {
        let (mut module, data) = module_with_section();
        let a = module.add_fragment(Fragment::region(vec![0; 3]));
        let b = module.add_fragment(Fragment::region(vec![0; 6]));
        let c = module.add_fragment(Fragment::region(vec![0; 1]));
        let d = module.add_fragment(Fragment::region(vec![0; 2]));
        assert_eq!(module.append_fragment(data, a, 1).padding, 0);
        assert_eq!(module.append_fragment(data, b, 4).padding, 1);
        assert_eq!(module.append_fragment(data, c, 8).padding, 6);
        // An odd end offset against the widest alignment.
        assert_eq!(module.append_fragment(data, d, 16).padding, 15);
        assert_eq!(module.fragment(a).offset, 0);
        assert_eq!(module.fragment(b).offset, 4);
        assert_eq!(module.fragment(c).offset, 16);
        assert_eq!(module.fragment(d).offset, 32);
        let section = module.section_data(data).section;
        assert_eq!(module.section(section).size, 34);
        assert_eq!(module.section(section).alignment, 16);
    }

    #[test]
    fn no_padding_when_already_aligned() {
        let (mut module, data) = module_with_section();
        let a = module.add_fragment(Fragment::region(vec![0; 8]));
        let b = module.add_fragment(Fragment::region(vec![0; 8]));
        module.append_fragment(data, a, 8);
        let result = module.append_fragment(data, b, 8);
        assert_eq!(result.padding, 0);
        assert_eq!(module.fragment(b).offset, 8);
    }

    #[test]
    fn fragment_offsets_resolve_through_parent_section() {
        let (mut module, data) = module_with_section();
        let a = module.add_fragment(Fragment::region(vec![0; 16]));
        module.append_fragment(data, a, 1);
        let target = FragmentRef::new(a, 6);
        assert_eq!(module.fragment_output_offset(target), 6);
        assert_eq!(
            module.output_section_of(a),
            Some(module.section_data(data).section)
        );
    }
}
