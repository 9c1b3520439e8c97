//! Shared test doubles: a minimal little-endian 64-bit backend with three
//! relocation types, a layout engine that packs sections one after another,
//! and builders for input records.

use crate::args::Args;
use crate::error::Result;
use crate::file_writer::Output;
use crate::fragment::SectionDataId;
use crate::fragment::align_up;
use crate::got::GotPartition;
use crate::got::GotSection;
use crate::input::Input;
use crate::input::InputId;
use crate::input::InputObject;
use crate::input::InputType;
use crate::input::SectionRecord;
use crate::input::SymbolRecord;
use crate::layout::LayoutEngine;
use crate::module::Module;
use crate::output_sections::OutputSection;
use crate::output_sections::OutputSectionId;
use crate::output_sections::SectionFlags;
use crate::output_sections::SectionKind;
use crate::platform::BitClass;
use crate::platform::TargetBackend;
use crate::relocation::Relocation;
use crate::symbol::SymbolInstanceId;
use crate::symbol_db::Binding;
use crate::symbol_db::SymbolDesc;
use crate::symbol_db::SymbolType;
use crate::symbol_db::Visibility;

/// Absolute: S + A.
pub(crate) const R_ABS: u32 = 1;
/// PC-relative: S + A - P.
pub(crate) const R_REL: u32 = 2;
/// GOT-mediated: reserves a table entry during scanning, resolves to S + A.
pub(crate) const R_GOT: u32 = 3;

pub(crate) struct TestBackend {
    got: Option<GotSection>,
}

impl TestBackend {
    pub(crate) fn new() -> TestBackend {
        TestBackend { got: None }
    }

    pub(crate) fn got(&self) -> Option<&GotSection> {
        self.got.as_ref()
    }

    fn got_mut(&mut self, module: &mut Module) -> &mut GotSection {
        if self.got.is_none() {
            let section = module.add_section(
                OutputSection::new(
                    ".got",
                    SectionKind::Target,
                    object::elf::SHT_PROGBITS,
                    SectionFlags::ALLOC | SectionFlags::WRITE,
                )
                .with_alignment(8),
            );
            self.got = Some(GotSection::new(section, BitClass::B64));
        }
        self.got.as_mut().unwrap()
    }
}

impl TargetBackend for TestBackend {
    fn bit_class(&self) -> BitClass {
        BitClass::B64
    }

    fn is_little_endian(&self) -> bool {
        true
    }

    fn scan_relocation(
        &mut self,
        reloc: Relocation,
        _input_symbol: SymbolInstanceId,
        module: &mut Module,
        _args: &Args,
        _target_section: OutputSectionId,
    ) -> Result {
        if reloc.r_type == R_GOT {
            let input = module.current_input.unwrap_or(InputId::from_usize(0));
            let is_local = module.symbol_db.get(reloc.symbol).is_local();
            let got = self.got_mut(module);
            if is_local {
                got.reserve_local_entry(input);
                got.set_local(reloc.symbol);
            } else {
                got.reserve_global_entry(input, reloc.symbol);
                got.set_global(reloc.symbol);
            }
        }
        Ok(())
    }

    fn partial_scan_relocation(
        &mut self,
        _reloc: Relocation,
        _input_symbol: SymbolInstanceId,
        _module: &mut Module,
        _args: &Args,
        _target_section: OutputSectionId,
    ) -> Result {
        Ok(())
    }

    fn apply_relocation(&self, reloc: &mut Relocation, module: &Module, _args: &Args) -> Result {
        let identity = module.symbol_db.get(reloc.symbol);
        let s = identity
            .out_symbol
            .map(|out| module.symbol(out).value)
            .unwrap_or(0);
        let value = match reloc.r_type {
            R_ABS | R_GOT => s.wrapping_add_signed(reloc.addend),
            R_REL => {
                let section = module
                    .output_section_of(reloc.target_ref.fragment)
                    .ok_or_else(|| crate::error!("Relocation target was never placed"))?;
                let place = module.section(section).address
                    + module.fragment_output_offset(reloc.target_ref);
                s.wrapping_add_signed(reloc.addend).wrapping_sub(place)
            }
            other => crate::bail!("Unsupported relocation type {other}"),
        };
        reloc.set_value(value);
        Ok(())
    }

    fn finalize_tls_symbol(
        &self,
        _symbol: &mut crate::symbol::SymbolInstance,
        _module: &Module,
    ) -> Result {
        Ok(())
    }

    fn pre_layout(&mut self, module: &mut Module, _args: &Args) -> Result {
        if let Some(got) = self.got.as_mut() {
            let size = got.finalize_section_size();
            module.section_mut(got.section()).size = size;
        }
        Ok(())
    }

    fn post_process(&mut self, module: &Module, output: &mut Output) -> Result {
        let Some(got) = self.got.as_mut() else {
            return Ok(());
        };
        let section_address = module.section(got.section()).address;
        // Replay reservation order and fill each slot with its own address,
        // standing in for the symbol addresses a real target would store.
        let partitions: Vec<GotPartition> = got.partitions().collect();
        for partition in partitions {
            for _ in 0..partition.locals {
                let id = got.consume_local()?;
                let address = got.entry_address(section_address, id);
                got.entry_mut(id).content = address;
            }
            for _ in 0..partition.globals {
                let id = got.consume_global()?;
                let address = got.entry_address(section_address, id);
                got.entry_mut(id).content = address;
            }
        }
        if got.has_entries() {
            let section = module.section(got.section());
            let region = output.request_region(section.file_offset, section.size)?;
            got.emit(region, true);
        }
        Ok(())
    }
}

/// Packs sections in creation order: file offsets are contiguous over
/// sections with file content, addresses start at a fixed base (zero for
/// relocatable output).
#[derive(Default)]
pub(crate) struct SequentialLayout {
    ranges: Vec<(SectionDataId, String)>,
}

impl SequentialLayout {
    pub(crate) fn num_ranges(&self) -> usize {
        self.ranges.len()
    }
}

impl LayoutEngine for SequentialLayout {
    fn add_input_range(&mut self, data: SectionDataId, input_name: &str) {
        self.ranges.push((data, input_name.to_owned()));
    }

    fn layout(&mut self, module: &mut Module, _backend: &dyn TargetBackend, args: &Args) -> Result {
        let mut file_offset = 0u64;
        let mut address = if args.is_relocatable() { 0 } else { 0x10000u64 };
        let ids: Vec<OutputSectionId> = module.section_ids().collect();
        for id in ids {
            let section = module.section_mut(id);
            let alignment = section.alignment.max(1);
            file_offset = align_up(file_offset, alignment);
            address = align_up(address, alignment);
            section.file_offset = file_offset;
            section.address = if args.is_relocatable() { 0 } else { address };
            if section.kind.has_file_content() {
                file_offset += section.size;
            }
            address += section.size;
        }
        Ok(())
    }
}

// ----- input builders -----

pub(crate) fn input_object(name: &str) -> InputObject {
    InputObject::new(Input::new(name, InputType::Object))
}

pub(crate) fn shared_object(name: &str) -> InputObject {
    InputObject::new(Input::new(name, InputType::DynObj))
}

pub(crate) fn text_section(bytes: Vec<u8>) -> SectionRecord {
    SectionRecord::regular(
        ".text",
        SectionKind::Regular,
        object::elf::SHT_PROGBITS,
        SectionFlags::ALLOC | SectionFlags::EXECINSTR,
        4,
        bytes,
    )
}

pub(crate) fn defined_symbol(name: &str, section: usize, offset: u64) -> SymbolRecord {
    SymbolRecord {
        name: name.as_bytes().to_vec(),
        sym_type: SymbolType::Func,
        desc: SymbolDesc::Defined,
        binding: Binding::Global,
        visibility: Visibility::Default,
        size: 0,
        value: 0,
        section: Some(section),
        offset,
    }
}

pub(crate) fn undefined_symbol(name: &str) -> SymbolRecord {
    SymbolRecord {
        name: name.as_bytes().to_vec(),
        sym_type: SymbolType::NoType,
        desc: SymbolDesc::Undefined,
        binding: Binding::Global,
        visibility: Visibility::Default,
        size: 0,
        value: 0,
        section: None,
        offset: 0,
    }
}

mod tests {
    use super::*;
    use crate::fragment::Fragment;
    use crate::fragment::FragmentRef;
    use crate::symbol::SymbolInstance;
    use crate::symbol_db::SymbolSource;

    #[test]
    fn pc_relative_application() {
        let mut module = Module::new();
        let section = module.add_section(OutputSection::new(
            ".text",
            SectionKind::Regular,
            object::elf::SHT_PROGBITS,
            SectionFlags::ALLOC | SectionFlags::EXECINSTR,
        ));
        let data = module.add_section_data(section);
        let fragment = module.add_fragment(Fragment::region(vec![0; 16]));
        module.append_fragment(data, fragment, 1);
        module.section_mut(section).address = 0x1000;

        let outcome = module.symbol_db.resolve(
            b"target",
            SymbolSource::Regular,
            SymbolType::Func,
            SymbolDesc::Defined,
            Binding::Global,
            0,
            Visibility::Default,
        );
        let mut out = SymbolInstance::new(outcome.id);
        out.value = 0x1234;
        let out = module.add_symbol_instance(out);
        module.symbol_db.get_mut(outcome.id).out_symbol = Some(out);

        let backend = TestBackend::new();
        let mut reloc = Relocation::new(R_REL, outcome.id, FragmentRef::new(fragment, 8), 4);
        backend
            .apply_relocation(&mut reloc, &module, &Args::default())
            .unwrap();
        assert_eq!(reloc.value(), 0x1234 + 4 - (0x1000 + 8));
    }
}
