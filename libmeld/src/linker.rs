//! The linker core proper: symbol entry points, section routing, and the
//! relocation lifecycle. A `Linker` borrows the session's module plus the
//! external collaborators (backend, layout engine, name map) and drives all
//! mutation through them; it owns nothing but the section-routing rules.

use crate::args::Args;
use crate::error::Result;
use crate::file_writer::Output;
use crate::fragment::Fragment;
use crate::fragment::FragmentId;
use crate::fragment::FragmentKind;
use crate::fragment::FragmentRef;
use crate::fragment::SectionDataId;
use crate::input::SectionRecord;
use crate::layout::LayoutEngine;
use crate::module::Module;
use crate::output_sections::OutputSection;
use crate::output_sections::OutputSectionId;
use crate::output_sections::SectionFlags;
use crate::output_sections::SectionKind;
use crate::output_sections::SectionNameMap;
use crate::output_sections::SectionRules;
use crate::platform::TargetBackend;
use crate::relocation::RelocDataId;
use crate::relocation::Relocation;
use crate::relocation::write_relocation_value;
use crate::symbol::SymbolInstance;
use crate::symbol::SymbolInstanceId;
use crate::symbol_db::Binding;
use crate::symbol_db::IdentitySnapshot;
use crate::symbol_db::SymbolDesc;
use crate::symbol_db::SymbolId;
use crate::symbol_db::SymbolSource;
use crate::symbol_db::SymbolType;
use crate::symbol_db::Visibility;
use crate::symbol_db::should_force_local;
use crate::symbol_db::should_force_local_attrs;

/// One symbol occurrence as reported by an input, before it has met the name
/// pool.
#[derive(Debug, Clone, Copy)]
pub struct SymbolOccurrence<'data> {
    pub name: &'data [u8],
    pub sym_type: SymbolType,
    pub desc: SymbolDesc,
    pub binding: Binding,
    pub visibility: Visibility,
    pub size: u64,
    pub value: u64,
    pub fragment_ref: Option<FragmentRef>,
}

pub struct Linker<'a> {
    args: &'a Args,
    pub module: &'a mut Module,
    backend: &'a mut dyn TargetBackend,
    layout_engine: &'a mut dyn LayoutEngine,
    name_map: &'a dyn SectionNameMap,
    rules: SectionRules,
}

impl<'a> Linker<'a> {
    pub fn new(
        args: &'a Args,
        module: &'a mut Module,
        backend: &'a mut dyn TargetBackend,
        layout_engine: &'a mut dyn LayoutEngine,
        name_map: &'a dyn SectionNameMap,
    ) -> Linker<'a> {
        Linker {
            args,
            module,
            backend,
            layout_engine,
            name_map,
            rules: SectionRules::default(),
        }
    }

    pub fn args(&self) -> &Args {
        self.args
    }

    // ----- symbol entry points -----

    /// Merges one symbol occurrence from a regular object. Returns the
    /// input-side instance; the output-side instance is created or updated as
    /// the override outcome dictates.
    pub fn add_symbol_from_object(&mut self, occ: SymbolOccurrence) -> SymbolInstanceId {
        if occ.binding == Binding::Local {
            let id = self.module.symbol_db.create_local(
                occ.name,
                occ.sym_type,
                occ.desc,
                occ.size,
                occ.visibility,
            );
            let instance_id = self.add_instance(id, occ.value, occ.fragment_ref);
            self.module.symbol_db.get_mut(id).out_symbol = Some(instance_id);
            // Section symbols exist only to anchor relocations; they are not
            // emitted to the output symbol table.
            if occ.sym_type != SymbolType::Section {
                self.module.symbol_table.add(instance_id, Binding::Local);
            }
            return instance_id;
        }

        let outcome = self.module.symbol_db.resolve(
            occ.name,
            SymbolSource::Regular,
            occ.sym_type,
            occ.desc,
            occ.binding,
            occ.size,
            occ.visibility,
        );
        let input_id = self.add_instance(outcome.id, occ.value, occ.fragment_ref);

        if outcome.overridden || self.module.symbol_db.get(outcome.id).out_symbol.is_none() {
            self.refresh_output_instance(outcome.id, &occ, outcome.old);
        }
        input_id
    }

    /// Merges one symbol occurrence from a shared object. Section symbols,
    /// locals, and symbols invisible outside the shared object are skipped;
    /// protected visibility is demoted to default because the definition is
    /// not ours to bind directly.
    pub fn add_symbol_from_dyn_obj(&mut self, occ: SymbolOccurrence) -> Option<SymbolInstanceId> {
        if occ.sym_type == SymbolType::Section || occ.binding == Binding::Local {
            return None;
        }
        if matches!(occ.visibility, Visibility::Hidden | Visibility::Internal) {
            return None;
        }
        let visibility = if occ.visibility == Visibility::Protected {
            Visibility::Default
        } else {
            occ.visibility
        };

        let outcome = self.module.symbol_db.resolve(
            occ.name,
            SymbolSource::Dynamic,
            occ.sym_type,
            occ.desc,
            occ.binding,
            occ.size,
            visibility,
        );
        let input_id = self.add_instance(outcome.id, occ.value, None);

        // A dynamic occurrence never creates an output instance, but it may
        // have tightened visibility enough to demote an existing one.
        if let Some(out) = self.module.symbol_db.get(outcome.id).out_symbol {
            if should_force_local(self.module.symbol_db.get(outcome.id), self.args.output_kind) {
                self.module.symbol_table.force_local(out);
            }
        }
        Some(input_id)
    }

    /// Defines a symbol unconditionally: if the name is known, its identity
    /// is re-stamped with the given attributes regardless of what it held.
    pub fn define_symbol_forcefully(&mut self, occ: SymbolOccurrence) -> SymbolInstanceId {
        match self.module.symbol_db.find_info(occ.name) {
            None => self.add_symbol_from_object(occ),
            Some(id) => {
                let old = self.module.symbol_db.get(id).snapshot();
                self.module.symbol_db.stamp(
                    id,
                    SymbolSource::Regular,
                    occ.sym_type,
                    occ.desc,
                    occ.binding,
                    occ.size,
                    occ.visibility,
                );
                self.refresh_output_instance(id, &occ, Some(old))
            }
        }
    }

    /// Defines a symbol only if it is currently an undefined reference or
    /// came from a shared object. Returns `None` when a regular definition
    /// already owns the name, or when the name was never referenced.
    pub fn define_symbol_as_referenced(&mut self, occ: SymbolOccurrence) -> Option<SymbolInstanceId> {
        let id = self.module.symbol_db.find_info(occ.name)?;
        let info = self.module.symbol_db.get(id);
        if !info.is_undefined() && !info.is_dynamic() {
            return None;
        }
        let old = info.snapshot();
        self.module.symbol_db.stamp(
            id,
            SymbolSource::Regular,
            occ.sym_type,
            occ.desc,
            occ.binding,
            occ.size,
            occ.visibility,
        );
        Some(self.refresh_output_instance(id, &occ, Some(old)))
    }

    /// Forceful definition that goes through override resolution instead of
    /// stamping, so a stronger existing definition still wins.
    pub fn define_and_resolve_symbol_forcefully(
        &mut self,
        occ: SymbolOccurrence,
    ) -> SymbolInstanceId {
        self.add_symbol_from_object(occ)
    }

    /// Resolving variant of [`Self::define_symbol_as_referenced`].
    pub fn define_and_resolve_symbol_as_referenced(
        &mut self,
        occ: SymbolOccurrence,
    ) -> Option<SymbolInstanceId> {
        let id = self.module.symbol_db.find_info(occ.name)?;
        let info = self.module.symbol_db.get(id);
        if !info.is_undefined() && !info.is_dynamic() {
            return None;
        }
        Some(self.add_symbol_from_object(occ))
    }

    fn add_instance(
        &mut self,
        identity: SymbolId,
        value: u64,
        fragment_ref: Option<FragmentRef>,
    ) -> SymbolInstanceId {
        let mut instance = SymbolInstance::new(identity);
        instance.value = value;
        instance.fragment_ref = fragment_ref;
        self.module.add_symbol_instance(instance)
    }

    /// Creates the identity's single output instance if it doesn't exist,
    /// points it at this occurrence, and re-sorts its symbol-table category
    /// if its forced-local status changed.
    fn refresh_output_instance(
        &mut self,
        id: SymbolId,
        occ: &SymbolOccurrence,
        old: Option<IdentitySnapshot>,
    ) -> SymbolInstanceId {
        let (out_id, created) = match self.module.symbol_db.get(id).out_symbol {
            Some(out) => (out, false),
            None => {
                let out = self.module.add_symbol_instance(SymbolInstance::new(id));
                self.module.symbol_db.get_mut(id).out_symbol = Some(out);
                (out, true)
            }
        };

        {
            let instance = self.module.symbol_mut(out_id);
            instance.value = occ.value;
            instance.fragment_ref = occ.fragment_ref;
        }

        if occ.sym_type != SymbolType::Section {
            let info = self.module.symbol_db.get(id);
            let now_forced = should_force_local(info, self.args.output_kind);
            if created {
                if now_forced {
                    self.module.symbol_table.force_local(out_id);
                } else {
                    self.module.symbol_table.add(out_id, info.binding);
                }
            } else {
                let was_forced = old.is_some_and(|old| {
                    should_force_local_attrs(
                        old.binding,
                        old.visibility,
                        old.desc,
                        self.args.output_kind,
                    )
                });
                self.module.symbol_table.arrange(out_id, was_forced, now_forced);
            }
        }
        out_id
    }

    /// Assigns final values to all output symbols from post-layout section
    /// addresses, then lets the backend finish target-dependent ones.
    pub fn finalize_symbols(&mut self) -> Result {
        let ids: Vec<SymbolInstanceId> = self.module.symbol_table.emission_order().collect();
        for id in ids {
            let mut instance = *self.module.symbol(id);
            let identity = self.module.symbol_db.get(instance.identity);
            if identity.is_absolute() || identity.sym_type == SymbolType::File {
                instance.value = 0;
            } else if identity.sym_type == SymbolType::ThreadLocal {
                self.backend.finalize_tls_symbol(&mut instance, &*self.module)?;
            } else if let Some(target) = instance.fragment_ref {
                let section = self.module.output_section_of(target.fragment).ok_or_else(|| {
                    crate::error!(
                        "Symbol `{}` references a fragment outside any output section",
                        String::from_utf8_lossy(identity.name())
                    )
                })?;
                instance.value = self.module.section(section).address
                    + self.module.fragment_output_offset(target);
            }
            *self.module.symbol_mut(id) = instance;
        }
        self.backend.finalize_symbols(self.module, self.args)
    }

    // ----- section routing -----

    /// Resolves the output section an input section lands in, creating it
    /// (and registering a merge rule when its kind calls for one) on first
    /// sight. Flags and alignment accumulate across contributing inputs.
    pub fn get_or_create_output_section(
        &mut self,
        input_name: &str,
        kind: SectionKind,
        sh_type: u32,
        flags: SectionFlags,
        alignment: u64,
    ) -> OutputSectionId {
        let output_name = self.name_map.map_section_name(input_name).to_owned();
        if let Some(id) = self.rules.matched_section(&output_name) {
            let section = self.module.section_mut(id);
            section.flags |= flags;
            section.alignment = section.alignment.max(alignment.max(1));
            return id;
        }

        let section =
            OutputSection::new(output_name.clone(), kind, sh_type, flags).with_alignment(alignment);
        let id = self.module.add_section(section);
        if kind.registers_merge_rule(self.args.output_kind) {
            self.rules.append(output_name, id);
        }
        id
    }

    pub fn get_or_create_section_data(&mut self, section: OutputSectionId) -> SectionDataId {
        match self.module.section(section).data {
            Some(data) => data,
            None => self.module.add_section_data(section),
        }
    }

    /// Merges one input section: routes it to an output section, appends its
    /// content as a fragment, and registers the input range with the layout
    /// collaborator. Returns `None` for kinds that contribute nothing
    /// (discarded sections, raw relocation sections, synthesized kinds).
    pub fn merge_input_section(
        &mut self,
        input_name: &str,
        record: &SectionRecord,
    ) -> Result<Option<FragmentId>> {
        match record.kind {
            SectionKind::Null
            | SectionKind::Ignore
            | SectionKind::Group
            | SectionKind::MetaData
            | SectionKind::NamePool => return Ok(None),
            // Raw relocation sections are consumed by the relocation-reading
            // phase, not merged as bytes.
            SectionKind::Relocation => return Ok(None),
            _ => {}
        }

        let section = self.get_or_create_output_section(
            &record.name,
            record.kind,
            record.sh_type,
            record.flags,
            record.alignment,
        );
        let data = self.get_or_create_section_data(section);

        let fragment = if record.kind == SectionKind::Bss {
            self.module.add_fragment(Fragment::fill(record.size, 0))
        } else {
            crate::debug_assert_bail!(
                record.size == record.bytes.len() as u64,
                "Section `{}` size disagrees with its content",
                record.name
            );
            self.module
                .add_fragment(Fragment::region(record.bytes.clone()))
        };
        self.module.append_fragment(data, fragment, record.alignment.max(1));
        self.layout_engine.add_input_range(data, input_name);
        Ok(Some(fragment))
    }

    /// Relocation storage for a target section. In a normal link the records
    /// live in the module-level table; for relocatable output they are
    /// additionally owned by a relocation-kind output section, since the
    /// records survive into the image.
    pub fn get_or_create_reloc_data(&mut self, target_section: OutputSectionId) -> RelocDataId {
        if let Some(id) = self.module.section(target_section).reloc_data {
            return id;
        }
        let id = self.module.add_reloc_data(target_section);
        self.module.section_mut(target_section).reloc_data = Some(id);
        if self.args.is_relocatable() {
            let name = format!(".rela{}", self.module.section(target_section).name);
            let reloc_section = self.get_or_create_output_section(
                &name,
                SectionKind::Relocation,
                object::elf::SHT_RELA,
                SectionFlags::INFO_LINK,
                self.backend.bit_class().byte_width() as u64,
            );
            self.module.section_mut(reloc_section).reloc_data = Some(id);
        }
        id
    }

    // ----- relocation lifecycle -----

    /// Creates a relocation record and hands it to the backend for scanning.
    /// Returns `false` without recording anything when the referenced symbol
    /// is an unresolved section symbol with no location: such relocations
    /// target discarded input sections and patching them would touch freed
    /// data.
    pub fn add_relocation(
        &mut self,
        r_type: u32,
        input_symbol: SymbolInstanceId,
        target_ref: FragmentRef,
        addend: i64,
    ) -> Result<bool> {
        let instance = *self.module.symbol(input_symbol);
        let identity = self.module.symbol_db.get(instance.identity);
        if identity.sym_type == SymbolType::Section
            && identity.is_undefined()
            && instance.fragment_ref.is_none()
        {
            return Ok(false);
        }

        let target_section = self
            .module
            .output_section_of(target_ref.fragment)
            .ok_or_else(|| {
                crate::error!("Relocation targets a fragment outside any output section")
            })?;

        let reloc = self
            .backend
            .produce_relocation(r_type, instance.identity, target_ref, addend);
        let reloc_data = self.get_or_create_reloc_data(target_section);
        self.module.reloc_data_mut(reloc_data).relocations.push(reloc);

        if self.args.is_relocatable() {
            self.backend
                .partial_scan_relocation(reloc, input_symbol, self.module, self.args, target_section)?;
        } else {
            self.backend
                .scan_relocation(reloc, input_symbol, self.module, self.args, target_section)?;
        }
        Ok(true)
    }

    /// Computes every relocation's resulting value. Pure arithmetic; nothing
    /// is written to the image. Skipped entirely for relocatable output,
    /// where records are emitted unresolved.
    pub fn apply_relocations(&mut self) -> Result {
        if self.args.is_relocatable() {
            return Ok(());
        }

        let mut reloc_data = self.module.take_reloc_data();
        for data in &mut reloc_data {
            for reloc in &mut data.relocations {
                self.backend.apply_relocation(reloc, &*self.module, self.args)?;
            }
        }
        self.module.restore_reloc_data(reloc_data);

        let mut islands = std::mem::take(&mut self.module.islands);
        for island in &mut islands {
            for reloc in &mut island.relocations {
                self.backend.apply_relocation(reloc, &*self.module, self.args)?;
            }
        }
        self.module.islands = islands;
        Ok(())
    }

    /// Writes every computed relocation value into the output image, walking
    /// the module-level relocation table plus branch islands. Relocatable
    /// output writes nothing: the records stay pending in their relocation
    /// sections and the patched slots keep the bytes the inputs carried.
    pub fn sync_relocation_result(&self, output: &mut Output) -> Result {
        if self.args.is_relocatable() {
            return Ok(());
        }

        for index in 0..self.module.num_reloc_data() {
            let data = self.module.reloc_data(RelocDataId::from_usize(index));
            for reloc in &data.relocations {
                self.write_relocation_result(reloc, data.section, output)?;
            }
        }
        for island in &self.module.islands {
            for reloc in &island.relocations {
                let section = self
                    .module
                    .output_section_of(reloc.target_ref.fragment)
                    .ok_or_else(|| crate::error!("Branch island stub was never placed"))?;
                self.write_relocation_result(reloc, section, output)?;
            }
        }
        Ok(())
    }

    fn write_relocation_result(
        &self,
        reloc: &Relocation,
        target_section: OutputSectionId,
        output: &mut Output,
    ) -> Result {
        let section = self.module.section(target_section);
        if !section.kind.has_file_content() {
            return Ok(());
        }
        let offset = section.file_offset + self.module.fragment_output_offset(reloc.target_ref);
        let bit_class = self.backend.bit_class();
        let region = output.request_region(offset, bit_class.byte_width() as u64)?;
        write_relocation_value(reloc.value(), bit_class, self.backend.is_little_endian(), region);
        Ok(())
    }

    // ----- phase pass-throughs -----

    pub fn pre_layout(&mut self) -> Result {
        self.backend.pre_layout(self.module, self.args)
    }

    pub fn layout(&mut self) -> Result {
        self.layout_engine.layout(self.module, &*self.backend, self.args)
    }

    pub fn post_process(&mut self, output: &mut Output) -> Result {
        self.backend.post_process(&*self.module, output)
    }

    /// Copies every section's fragment bytes into the image at its post-
    /// layout file offset. BSS-like sections occupy no file bytes.
    pub fn emit_sections(&self, output: &mut Output) -> Result {
        for section_id in self.module.section_ids() {
            let section = self.module.section(section_id);
            if !section.kind.has_file_content() {
                continue;
            }
            let Some(data_id) = section.data else {
                continue;
            };
            let base = section.file_offset;
            for &fragment_id in &self.module.section_data(data_id).fragments {
                let fragment = self.module.fragment(fragment_id);
                let at = base + fragment.offset;
                match &fragment.kind {
                    FragmentKind::Region(bytes) | FragmentKind::Stub(bytes) => {
                        output
                            .request_region(at, bytes.len() as u64)?
                            .copy_from_slice(bytes);
                    }
                    FragmentKind::Alignment { size, fill } => {
                        output.request_region(at, *size)?.fill(*fill);
                    }
                    FragmentKind::Fill { size, value } => {
                        output.request_region(at, *size)?.fill(*value);
                    }
                    FragmentKind::Null => {}
                }
            }
        }
        Ok(())
    }
}
