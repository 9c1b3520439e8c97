//! Branch islands: backend-synthesized trampolines inserted to satisfy
//! out-of-range branches. An island owns its stub fragment plus the
//! relocations that patch the stub itself; apply and sync traverse these
//! after the relocations that came from inputs.

use crate::fragment::FragmentId;
use crate::fragment::FragmentRef;
use crate::relocation::Relocation;
use crate::symbol_db::SymbolId;

/// A fixup within a stub, expressed relative to the stub's own bytes.
#[derive(Debug, Clone, Copy)]
pub struct Fixup {
    pub offset: u64,
    pub addend: i64,
    pub r_type: u32,
}

#[derive(Debug)]
pub struct BranchIsland {
    /// The symbol the island trampolines to.
    pub symbol: SymbolId,
    /// The stub fragment, already appended to a text section.
    pub fragment: FragmentId,
    pub relocations: Vec<Relocation>,
}

impl BranchIsland {
    pub fn new(symbol: SymbolId, fragment: FragmentId) -> BranchIsland {
        BranchIsland {
            symbol,
            fragment,
            relocations: Vec::new(),
        }
    }

    /// Materializes a fixup as a relocation against the island's stub bytes.
    pub fn add_fixup(&mut self, fixup: Fixup) {
        self.relocations.push(Relocation::new(
            fixup.r_type,
            self.symbol,
            FragmentRef::new(self.fragment, fixup.offset),
            fixup.addend,
        ));
    }
}
