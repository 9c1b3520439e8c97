//! The name pool: one canonical identity per distinct non-local symbol name,
//! plus the override algorithm that decides which occurrence wins when the
//! same name arrives from multiple inputs.
//!
//! Local symbols never go through resolution. Each local occurrence gets a
//! private identity that is allocated in the same store but never indexed by
//! name, so it can't alias anything.

use crate::args::OutputKind;
use crate::error::warning;
use crate::symbol::SymbolInstanceId;
use hashbrown::HashMap;

/// Identifies a `SymbolIdentity` within the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SymbolId(u32);

impl SymbolId {
    pub(crate) fn from_usize(value: usize) -> SymbolId {
        SymbolId(u32::try_from(value).expect("Symbol pool overflowed u32"))
    }

    pub fn as_usize(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolType {
    NoType,
    Object,
    Func,
    Section,
    File,
    ThreadLocal,
    IndirectFunc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolDesc {
    Undefined,
    Defined,
    Common,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Binding {
    Global,
    Weak,
    Local,
    /// Absolute symbols don't move during layout. Treated as strong
    /// definitions by the resolver.
    Absolute,
}

/// Ordered by restrictiveness: overriding always keeps the most restrictive
/// of the old and new visibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Visibility {
    Default,
    Protected,
    Hidden,
    Internal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolSource {
    Regular,
    /// The occurrence came from a shared object.
    Dynamic,
}

/// One canonical named symbol across all inputs.
#[derive(Debug)]
pub struct SymbolIdentity {
    name: Box<[u8]>,
    pub sym_type: SymbolType,
    pub desc: SymbolDesc,
    pub binding: Binding,
    pub visibility: Visibility,
    pub source: SymbolSource,
    pub size: u64,
    /// The single output-visible instance, if one has been created.
    pub out_symbol: Option<SymbolInstanceId>,
}

impl SymbolIdentity {
    pub fn name(&self) -> &[u8] {
        &self.name
    }

    pub fn is_undefined(&self) -> bool {
        self.desc == SymbolDesc::Undefined
    }

    pub fn is_defined(&self) -> bool {
        self.desc == SymbolDesc::Defined
    }

    pub fn is_common(&self) -> bool {
        self.desc == SymbolDesc::Common
    }

    pub fn is_dynamic(&self) -> bool {
        self.source == SymbolSource::Dynamic
    }

    pub fn is_global(&self) -> bool {
        self.binding == Binding::Global
    }

    pub fn is_weak(&self) -> bool {
        self.binding == Binding::Weak
    }

    pub fn is_local(&self) -> bool {
        self.binding == Binding::Local
    }

    pub fn is_absolute(&self) -> bool {
        self.binding == Binding::Absolute
    }

    pub(crate) fn snapshot(&self) -> IdentitySnapshot {
        IdentitySnapshot {
            sym_type: self.sym_type,
            desc: self.desc,
            binding: self.binding,
            visibility: self.visibility,
            source: self.source,
            size: self.size,
        }
    }
}

/// Copy of an identity's attributes taken before an override, used to decide
/// whether the output instance needs to move between symbol-table categories.
#[derive(Debug, Clone, Copy)]
pub struct IdentitySnapshot {
    pub sym_type: SymbolType,
    pub desc: SymbolDesc,
    pub binding: Binding,
    pub visibility: Visibility,
    pub source: SymbolSource,
    pub size: u64,
}

/// Result of resolving one occurrence against the pool.
#[derive(Debug, Clone, Copy)]
pub struct ResolveOutcome {
    pub id: SymbolId,
    /// Whether an identity with this name already existed.
    pub existed: bool,
    /// Whether this occurrence superseded the previously chosen one.
    pub overridden: bool,
    /// The identity's attributes before this occurrence was merged in.
    pub old: Option<IdentitySnapshot>,
}

#[derive(Default)]
pub struct SymbolDb {
    identities: Vec<SymbolIdentity>,
    by_name: HashMap<Box<[u8]>, SymbolId>,
}

/// Precedence of an occurrence in the override lattice: a strong definition
/// beats a weak definition beats a common symbol beats an undefined
/// reference.
fn strength(desc: SymbolDesc, binding: Binding) -> u8 {
    match desc {
        SymbolDesc::Undefined => 0,
        SymbolDesc::Common => 1,
        SymbolDesc::Defined => {
            if binding == Binding::Weak {
                2
            } else {
                3
            }
        }
    }
}

impl SymbolDb {
    pub fn new() -> SymbolDb {
        SymbolDb::default()
    }

    pub fn get(&self, id: SymbolId) -> &SymbolIdentity {
        &self.identities[id.as_usize()]
    }

    pub fn get_mut(&mut self, id: SymbolId) -> &mut SymbolIdentity {
        &mut self.identities[id.as_usize()]
    }

    pub fn num_identities(&self) -> usize {
        self.identities.len()
    }

    fn alloc(
        &mut self,
        name: &[u8],
        source: SymbolSource,
        sym_type: SymbolType,
        desc: SymbolDesc,
        binding: Binding,
        size: u64,
        visibility: Visibility,
    ) -> SymbolId {
        let id = SymbolId::from_usize(self.identities.len());
        self.identities.push(SymbolIdentity {
            name: name.into(),
            sym_type,
            desc,
            binding,
            visibility,
            source,
            size,
            out_symbol: None,
        });
        id
    }

    /// Creates a private identity for a local symbol. The identity is never
    /// entered into the name index, so it can't be found by `resolve` or
    /// `find_info` and never merges with another occurrence.
    pub fn create_local(
        &mut self,
        name: &[u8],
        sym_type: SymbolType,
        desc: SymbolDesc,
        size: u64,
        visibility: Visibility,
    ) -> SymbolId {
        self.alloc(
            name,
            SymbolSource::Regular,
            sym_type,
            desc,
            Binding::Local,
            size,
            visibility,
        )
    }

    /// Pure lookup by name. Never creates or mutates.
    pub fn find_info(&self, name: &[u8]) -> Option<SymbolId> {
        self.by_name.get(name).copied()
    }

    /// Merges one non-local occurrence into the pool, creating the identity
    /// if the name is new and otherwise running the override algorithm.
    pub fn resolve(
        &mut self,
        name: &[u8],
        source: SymbolSource,
        sym_type: SymbolType,
        desc: SymbolDesc,
        binding: Binding,
        size: u64,
        visibility: Visibility,
    ) -> ResolveOutcome {
        debug_assert!(
            binding != Binding::Local,
            "Local symbols must use create_local"
        );

        if let Some(&id) = self.by_name.get(name) {
            let old = self.get(id).snapshot();
            let overridden =
                self.merge_occurrence(id, source, sym_type, desc, binding, size, visibility);
            ResolveOutcome {
                id,
                existed: true,
                overridden,
                old: Some(old),
            }
        } else {
            let id = self.alloc(name, source, sym_type, desc, binding, size, visibility);
            self.by_name.insert(name.into(), id);
            ResolveOutcome {
                id,
                existed: false,
                overridden: true,
                old: None,
            }
        }
    }

    /// The override algorithm. Returns whether the new occurrence supersedes
    /// the previously chosen one. Mutates the identity in place either way:
    /// visibility is always tightened to the most restrictive of old and new.
    fn merge_occurrence(
        &mut self,
        id: SymbolId,
        source: SymbolSource,
        sym_type: SymbolType,
        desc: SymbolDesc,
        binding: Binding,
        size: u64,
        visibility: Visibility,
    ) -> bool {
        let info = &mut self.identities[id.as_usize()];
        let old_strength = strength(info.desc, info.binding);
        let new_strength = strength(desc, binding);

        let overridden = if source == SymbolSource::Dynamic
            && info.source == SymbolSource::Regular
            && !info.is_undefined()
        {
            // A shared-object definition never overrides anything a regular
            // object has already provided; it may only satisfy an undefined
            // reference.
            false
        } else if info.source == SymbolSource::Dynamic
            && source == SymbolSource::Regular
            && new_strength > 0
        {
            // A regular occurrence takes the symbol back from a shared
            // object.
            true
        } else if new_strength > old_strength {
            true
        } else if new_strength == old_strength {
            match desc {
                SymbolDesc::Defined if binding != Binding::Weak => {
                    // Two strong definitions from regular objects conflict.
                    // Keep the first-seen definition and continue.
                    if info.source == SymbolSource::Regular && source == SymbolSource::Regular {
                        warning(format!(
                            "multiple definition of `{}'",
                            String::from_utf8_lossy(&info.name)
                        ));
                    }
                    false
                }
                SymbolDesc::Common => {
                    // Commons merge: keep the largest requested size.
                    info.size = info.size.max(size);
                    false
                }
                SymbolDesc::Undefined => {
                    // A strong reference upgrades a weak one, but there is no
                    // definition to supersede.
                    if info.binding == Binding::Weak && binding == Binding::Global {
                        info.binding = Binding::Global;
                    }
                    false
                }
                _ => false,
            }
        } else {
            false
        };

        if overridden {
            info.sym_type = sym_type;
            info.desc = desc;
            info.binding = binding;
            info.source = source;
            info.size = size;
        }
        info.visibility = info.visibility.max(visibility);

        overridden
    }

    /// Stamps new attributes onto an identity unconditionally, for the
    /// forceful-definition entry points.
    pub(crate) fn stamp(
        &mut self,
        id: SymbolId,
        source: SymbolSource,
        sym_type: SymbolType,
        desc: SymbolDesc,
        binding: Binding,
        size: u64,
        visibility: Visibility,
    ) {
        let info = &mut self.identities[id.as_usize()];
        info.source = source;
        info.sym_type = sym_type;
        info.desc = desc;
        info.binding = binding;
        info.size = size;
        info.visibility = visibility;
    }
}

/// Whether an output instance for this identity belongs in the forced-local
/// category of the output symbol table. True iff the output is not
/// relocatable, the visibility is hidden or internal, the binding is global
/// or weak and the symbol is defined or common.
pub fn should_force_local(info: &SymbolIdentity, output_kind: OutputKind) -> bool {
    should_force_local_attrs(
        info.binding,
        info.visibility,
        info.desc,
        output_kind,
    )
}

pub(crate) fn should_force_local_attrs(
    binding: Binding,
    visibility: Visibility,
    desc: SymbolDesc,
    output_kind: OutputKind,
) -> bool {
    !output_kind.is_relocatable()
        && matches!(visibility, Visibility::Hidden | Visibility::Internal)
        && matches!(binding, Binding::Global | Binding::Weak)
        && matches!(desc, SymbolDesc::Defined | SymbolDesc::Common)
}
