//! Contract for the layout collaborator: the engine that assigns addresses
//! and file offsets to output sections. The core registers input ranges as
//! sections are assembled, calls `layout` once between the pre-layout and
//! symbol-finalization phases, and afterwards reads the addresses it stored
//! on each `OutputSection`.

use crate::args::Args;
use crate::error::Result;
use crate::fragment::SectionDataId;
use crate::module::Module;
use crate::platform::TargetBackend;

pub trait LayoutEngine {
    /// Records that `input_name`'s bytes were appended to `data`. Called once
    /// per merged input section, in input order.
    fn add_input_range(&mut self, data: SectionDataId, input_name: &str);

    /// Assigns `address`, `file_offset` and final `size` to every output
    /// section. Section addresses must be zero when the output is
    /// relocatable, so that symbol values become section-relative offsets.
    fn layout(&mut self, module: &mut Module, backend: &dyn TargetBackend, args: &Args) -> Result;
}
