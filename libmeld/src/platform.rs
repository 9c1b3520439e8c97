//! The contract between the core and a target architecture backend. The core
//! depends only on this trait; each architecture is a concrete implementation
//! selected when the session is set up.

use crate::args::Args;
use crate::error::Result;
use crate::file_writer::Output;
use crate::fragment::FragmentRef;
use crate::module::Module;
use crate::output_sections::OutputSectionId;
use crate::relocation::Relocation;
use crate::symbol::SymbolInstance;
use crate::symbol::SymbolInstanceId;
use crate::symbol_db::SymbolId;

/// Width of the target's address arithmetic, which also fixes the byte width
/// of synced relocation results.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BitClass {
    B32,
    B64,
}

impl BitClass {
    pub fn byte_width(self) -> usize {
        match self {
            BitClass::B32 => 4,
            BitClass::B64 => 8,
        }
    }
}

pub trait TargetBackend {
    fn bit_class(&self) -> BitClass;

    fn is_little_endian(&self) -> bool;

    /// Creates a relocation record. The default encoding suits most targets;
    /// backends with unusual addend handling can override.
    fn produce_relocation(
        &self,
        r_type: u32,
        symbol: SymbolId,
        location: FragmentRef,
        addend: i64,
    ) -> Relocation {
        Relocation::new(r_type, symbol, location, addend)
    }

    /// Inspects a freshly created relocation in a final-link mode. May
    /// reserve GOT/PLT entries or synthesize dynamic relocations. The
    /// current input is available as `module.current_input`.
    fn scan_relocation(
        &mut self,
        reloc: Relocation,
        input_symbol: SymbolInstanceId,
        module: &mut Module,
        args: &Args,
        target_section: OutputSectionId,
    ) -> Result;

    /// Scan path for relocatable-object output, where final addresses don't
    /// exist yet.
    fn partial_scan_relocation(
        &mut self,
        reloc: Relocation,
        input_symbol: SymbolInstanceId,
        module: &mut Module,
        args: &Args,
        target_section: OutputSectionId,
    ) -> Result;

    /// Computes the relocation's resulting value. Pure arithmetic over the
    /// post-layout state; must not write to the output image.
    fn apply_relocation(&self, reloc: &mut Relocation, module: &Module, args: &Args) -> Result;

    /// Assigns the final value of a thread-local symbol.
    fn finalize_tls_symbol(&self, symbol: &mut SymbolInstance, module: &Module) -> Result;

    /// Finalizes target-dependent symbols after the generic pass.
    fn finalize_symbols(&mut self, module: &mut Module, args: &Args) -> Result {
        let _ = (module, args);
        Ok(())
    }

    /// Runs after all inputs are seen and before layout: the place to turn
    /// table reservations into final section sizes.
    fn pre_layout(&mut self, module: &mut Module, args: &Args) -> Result {
        let _ = (module, args);
        Ok(())
    }

    /// Runs after sync: the place to emit architecture-owned table contents
    /// into the output image.
    fn post_process(&mut self, module: &Module, output: &mut Output) -> Result {
        let _ = (module, output);
        Ok(())
    }
}
