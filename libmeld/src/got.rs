//! Global Offset Table allocator.
//!
//! Entry counts must be known before entry positions can be assigned, so the
//! table runs a two-phase protocol: inputs reserve entries (counted, deduped
//! per identity within a partition), `finalize_section_size` converts the
//! counts into allocated slots, then scanning/emission consumes entries in
//! exactly the order they were reserved: locals first, then globals, per
//! partition.
//!
//! Targets whose GOT addressing range is limited split the table into
//! multiple partitions; a new partition opens when the running total would
//! overflow the capacity, and the closed partition's counts are recorded.

use crate::error::Result;
use crate::input::InputId;
use crate::output_sections::OutputSectionId;
use crate::platform::BitClass;
use crate::relocation::write_relocation_value;
use crate::symbol_db::SymbolId;
use foldhash::HashMap;
use foldhash::HashSet;
use smallvec::SmallVec;
use smallvec::smallvec;

/// Index of an entry within the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GotEntryId(usize);

impl GotEntryId {
    pub fn as_usize(self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct GotEntry {
    pub content: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GotEntryClass {
    Local,
    Global,
}

/// Reservation counts for one partition of the table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GotPartition {
    pub locals: usize,
    pub globals: usize,
    /// Number of distinct inputs that reserved into this partition.
    pub inputs: usize,
}

impl GotPartition {
    pub fn total(&self) -> usize {
        self.locals + self.globals
    }
}

/// Consumption state for one partition: local and global cursors over the
/// slot ranges the partition was allocated.
#[derive(Debug, Clone, Copy)]
struct PartitionCursor {
    local_next: usize,
    local_end: usize,
    global_next: usize,
    global_end: usize,
}

pub struct GotSection {
    section: OutputSectionId,
    bit_class: BitClass,
    /// Maximum entries per partition, for multipart targets. `None` means a
    /// single unbounded partition.
    partition_capacity: Option<usize>,

    closed: SmallVec<[GotPartition; 1]>,
    current: GotPartition,
    current_input: Option<InputId>,
    /// Global identities reserved by the current input.
    input_globals: HashSet<SymbolId>,
    /// Global identities reserved by earlier inputs within the current
    /// partition. Together with `input_globals` this is the dedup scope.
    merged_globals: HashSet<SymbolId>,

    /// Whether each identity's entry gets a local- or global-flavored
    /// relocation. Recorded exactly once per identity.
    classification: HashMap<SymbolId, GotEntryClass>,

    entries: Vec<GotEntry>,
    cursors: SmallVec<[PartitionCursor; 1]>,
    finalized: bool,
}

impl GotSection {
    pub fn new(section: OutputSectionId, bit_class: BitClass) -> GotSection {
        GotSection::with_partition_capacity(section, bit_class, None)
    }

    pub fn with_partition_capacity(
        section: OutputSectionId,
        bit_class: BitClass,
        partition_capacity: Option<usize>,
    ) -> GotSection {
        GotSection {
            section,
            bit_class,
            partition_capacity,
            closed: SmallVec::new(),
            current: GotPartition::default(),
            current_input: None,
            input_globals: HashSet::default(),
            merged_globals: HashSet::default(),
            classification: HashMap::default(),
            entries: Vec::new(),
            cursors: smallvec![],
            finalized: false,
        }
    }

    pub fn section(&self) -> OutputSectionId {
        self.section
    }

    pub fn entry_size(&self) -> usize {
        self.bit_class.byte_width()
    }

    // ----- reserve phase -----

    pub fn reserve_local_entry(&mut self, input: InputId) {
        debug_assert!(!self.finalized, "Reservation after finalize");
        self.note_input(input);
        self.make_room_for_one();
        self.current.locals += 1;
    }

    /// Reserves a global entry unless `symbol` already holds one in the
    /// current partition.
    pub fn reserve_global_entry(&mut self, input: InputId, symbol: SymbolId) {
        debug_assert!(!self.finalized, "Reservation after finalize");
        self.note_input(input);
        if self.merged_globals.contains(&symbol) || self.input_globals.contains(&symbol) {
            return;
        }
        self.make_room_for_one();
        self.input_globals.insert(symbol);
        self.current.globals += 1;
    }

    fn note_input(&mut self, input: InputId) {
        if self.current_input == Some(input) {
            return;
        }
        self.current_input = Some(input);
        self.current.inputs += 1;
        self.merged_globals.extend(self.input_globals.drain());
    }

    fn make_room_for_one(&mut self) {
        let Some(capacity) = self.partition_capacity else {
            return;
        };
        if self.current.total() == capacity {
            self.close_partition();
        }
    }

    fn close_partition(&mut self) {
        let closed = std::mem::take(&mut self.current);
        self.closed.push(closed);
        self.current = GotPartition {
            locals: 0,
            globals: 0,
            // The input that overflowed continues reserving into the new
            // partition.
            inputs: usize::from(self.current_input.is_some()),
        };
        self.input_globals.clear();
        self.merged_globals.clear();
    }

    // ----- finalize -----

    /// Converts the accumulated reservation counts into allocated slots and
    /// returns the section's final byte size. Must be called exactly once,
    /// after all inputs have been seen.
    pub fn finalize_section_size(&mut self) -> u64 {
        assert!(!self.finalized, "finalize_section_size called twice");
        self.finalized = true;

        let mut base = 0usize;
        for partition in self.closed.iter().chain(std::iter::once(&self.current)) {
            self.cursors.push(PartitionCursor {
                local_next: base,
                local_end: base + partition.locals,
                global_next: base + partition.locals,
                global_end: base + partition.total(),
            });
            base += partition.total();
        }
        self.entries = vec![GotEntry::default(); base];
        (base * self.entry_size()) as u64
    }

    // ----- consume phase -----

    pub fn consume_local(&mut self) -> Result<GotEntryId> {
        debug_assert!(self.finalized, "Consumption before finalize");
        for cursor in &mut self.cursors {
            if cursor.local_next < cursor.local_end {
                let id = GotEntryId(cursor.local_next);
                cursor.local_next += 1;
                return Ok(id);
            }
        }
        crate::bail!("GOT local entries over-consumed");
    }

    pub fn consume_global(&mut self) -> Result<GotEntryId> {
        debug_assert!(self.finalized, "Consumption before finalize");
        for cursor in &mut self.cursors {
            if cursor.global_next < cursor.global_end {
                let id = GotEntryId(cursor.global_next);
                cursor.global_next += 1;
                return Ok(id);
            }
        }
        crate::bail!("GOT global entries over-consumed");
    }

    // ----- classification -----

    pub fn set_local(&mut self, symbol: SymbolId) {
        self.classification.entry(symbol).or_insert(GotEntryClass::Local);
    }

    pub fn set_global(&mut self, symbol: SymbolId) {
        self.classification
            .entry(symbol)
            .or_insert(GotEntryClass::Global);
    }

    pub fn is_local(&self, symbol: SymbolId) -> bool {
        self.classification.get(&symbol) == Some(&GotEntryClass::Local)
    }

    pub fn is_global(&self, symbol: SymbolId) -> bool {
        self.classification.get(&symbol) == Some(&GotEntryClass::Global)
    }

    // ----- observers / emission -----

    pub fn num_entries(&self) -> usize {
        self.entries.len()
    }

    pub fn has_entries(&self) -> bool {
        !self.entries.is_empty()
    }

    /// Reservation totals per partition, closed partitions first.
    pub fn partitions(&self) -> impl Iterator<Item = GotPartition> + '_ {
        self.closed
            .iter()
            .copied()
            .chain(std::iter::once(self.current))
    }

    pub fn entry(&self, id: GotEntryId) -> &GotEntry {
        &self.entries[id.0]
    }

    pub fn entry_mut(&mut self, id: GotEntryId) -> &mut GotEntry {
        &mut self.entries[id.0]
    }

    /// Address of an entry given the section's post-layout address.
    pub fn entry_address(&self, section_address: u64, id: GotEntryId) -> u64 {
        section_address + (id.0 * self.entry_size()) as u64
    }

    /// Writes the table contents into `region`, which must be at least
    /// `num_entries * entry_size` bytes. Honors target endianness.
    pub fn emit(&self, region: &mut [u8], little_endian: bool) -> usize {
        let entry_size = self.entry_size();
        for (index, entry) in self.entries.iter().enumerate() {
            let at = index * entry_size;
            write_relocation_value(
                entry.content,
                self.bit_class,
                little_endian,
                &mut region[at..at + entry_size],
            );
        }
        self.entries.len() * entry_size
    }
}
