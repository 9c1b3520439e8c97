//! Symbol instances and the output symbol table.
//!
//! An instance is one concrete occurrence of a symbol. Input-side instances
//! are created per occurrence; each identity that is visible in the output
//! symbol table has exactly one output-side instance. Forcing a symbol local
//! moves its output instance between emission categories without touching its
//! identity.

use crate::fragment::FragmentRef;
use crate::symbol_db::Binding;
use crate::symbol_db::SymbolId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SymbolInstanceId(u32);

impl SymbolInstanceId {
    pub(crate) fn from_usize(value: usize) -> SymbolInstanceId {
        SymbolInstanceId(u32::try_from(value).expect("Symbol instance store overflowed u32"))
    }

    pub fn as_usize(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SymbolInstance {
    pub identity: SymbolId,
    /// Address after layout; before that, the input-side value.
    pub value: u64,
    pub fragment_ref: Option<FragmentRef>,
}

impl SymbolInstance {
    pub fn new(identity: SymbolId) -> SymbolInstance {
        SymbolInstance {
            identity,
            value: 0,
            fragment_ref: None,
        }
    }
}

/// Output symbol table, partitioned into emission categories. Locals (both
/// natural and forced) are emitted before globals, which fixes the ELF
/// `sh_info` boundary.
#[derive(Debug, Default)]
pub struct SymbolTable {
    locals: Vec<SymbolInstanceId>,
    forced_locals: Vec<SymbolInstanceId>,
    globals: Vec<SymbolInstanceId>,
}

impl SymbolTable {
    /// Places a new output instance in the category its binding implies.
    pub fn add(&mut self, id: SymbolInstanceId, binding: Binding) {
        if binding == Binding::Local {
            self.locals.push(id);
        } else {
            self.globals.push(id);
        }
    }

    /// Demotes an instance to the forced-local category. Idempotent.
    pub fn force_local(&mut self, id: SymbolInstanceId) {
        if self.forced_locals.contains(&id) {
            return;
        }
        self.remove(id);
        self.forced_locals.push(id);
    }

    /// Re-sorts an instance after an override changed its forced-local
    /// status. A no-op when the status didn't change.
    pub fn arrange(&mut self, id: SymbolInstanceId, was_forced: bool, now_forced: bool) {
        if was_forced == now_forced {
            return;
        }
        self.remove(id);
        if now_forced {
            self.forced_locals.push(id);
        } else {
            self.globals.push(id);
        }
    }

    fn remove(&mut self, id: SymbolInstanceId) {
        for category in [&mut self.locals, &mut self.forced_locals, &mut self.globals] {
            if let Some(pos) = category.iter().position(|&s| s == id) {
                category.remove(pos);
                return;
            }
        }
    }

    pub fn num_locals(&self) -> usize {
        self.locals.len() + self.forced_locals.len()
    }

    pub fn num_globals(&self) -> usize {
        self.globals.len()
    }

    pub fn contains(&self, id: SymbolInstanceId) -> bool {
        [&self.locals, &self.forced_locals, &self.globals]
            .iter()
            .any(|category| category.contains(&id))
    }

    pub fn is_forced_local(&self, id: SymbolInstanceId) -> bool {
        self.forced_locals.contains(&id)
    }

    /// All output instances in emission order: locals, forced locals, then
    /// globals.
    pub fn emission_order(&self) -> impl Iterator<Item = SymbolInstanceId> + '_ {
        self.locals
            .iter()
            .chain(self.forced_locals.iter())
            .chain(self.globals.iter())
            .copied()
    }
}
