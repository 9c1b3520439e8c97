//! Link-session configuration. All derived booleans (PIC, static link) are
//! computed once when the session is set up and read as plain fields, so the
//! answers can't drift between phases.

use crate::error::Result;
use crate::input::Input;
use crate::input::InputType;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputKind {
    Executable,
    SharedObject,
    /// Produce another linkable object (`-r`) rather than a final image.
    Relocatable,
}

impl OutputKind {
    pub fn is_relocatable(self) -> bool {
        self == OutputKind::Relocatable
    }
}

#[derive(Debug, Clone)]
pub struct Args {
    pub output_kind: OutputKind,
    pub pie: bool,

    /// True once `compute_derived` has seen no shared-object inputs.
    is_static_link: bool,

    /// What the selected target permits for per-input attributes.
    pub attribute_constraint: AttributeConstraint,
}

impl Default for Args {
    fn default() -> Self {
        Args {
            output_kind: OutputKind::Executable,
            pie: false,
            is_static_link: true,
            attribute_constraint: AttributeConstraint::default(),
        }
    }
}

impl Args {
    /// Computes session-derived state from the final input list. Must run
    /// before any phase queries `is_static_link`.
    pub fn compute_derived(&mut self, inputs: &[Input]) {
        self.is_static_link = !inputs
            .iter()
            .any(|input| input.input_type == InputType::DynObj);
    }

    pub fn output_is_pic(&self) -> bool {
        self.output_kind == OutputKind::SharedObject || self.pie
    }

    pub fn is_static_link(&self) -> bool {
        self.is_static_link
    }

    pub fn is_relocatable(&self) -> bool {
        self.output_kind.is_relocatable()
    }
}

/// Which link-time attributes the target supports. Attribute setters validate
/// against this and fail without changing any state.
#[derive(Debug, Clone, Copy)]
pub struct AttributeConstraint {
    pub whole_archive: bool,
    pub as_needed: bool,
    /// True for targets that only support static system linking.
    pub static_system: bool,
}

impl Default for AttributeConstraint {
    fn default() -> Self {
        AttributeConstraint {
            whole_archive: true,
            as_needed: true,
            static_system: false,
        }
    }
}

/// Attributes attached to one input on the link command line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InputAttributes {
    pub whole_archive: bool,
    pub as_needed: bool,
    pub add_needed: bool,
    pub static_link: bool,
}

impl InputAttributes {
    pub fn set_whole_archive(&mut self, constraint: &AttributeConstraint) -> Result {
        crate::ensure!(
            constraint.whole_archive,
            "Target does not support --whole-archive"
        );
        self.whole_archive = true;
        Ok(())
    }

    pub fn set_as_needed(&mut self, constraint: &AttributeConstraint) -> Result {
        crate::ensure!(constraint.as_needed, "Target does not support --as-needed");
        crate::ensure!(
            !constraint.static_system,
            "Can't enable --as-needed on a target which does not support dynamic linking"
        );
        crate::ensure!(!self.static_link, "Can't mix --static with --as-needed");
        self.as_needed = true;
        Ok(())
    }

    pub fn set_static(&mut self, _constraint: &AttributeConstraint) -> Result {
        crate::ensure!(!self.as_needed, "Can't mix --static with --as-needed");
        self.static_link = true;
        Ok(())
    }

    pub fn set_dynamic(&mut self, constraint: &AttributeConstraint) -> Result {
        crate::ensure!(
            !constraint.static_system,
            "Target does not support --Bdynamic"
        );
        self.static_link = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attribute_failure_leaves_state_untouched() {
        let constraint = AttributeConstraint {
            whole_archive: false,
            as_needed: true,
            static_system: false,
        };
        let mut attrs = InputAttributes::default();
        assert!(attrs.set_whole_archive(&constraint).is_err());
        assert_eq!(attrs, InputAttributes::default());
    }

    #[test]
    fn as_needed_rejected_on_static_only_target() {
        let constraint = AttributeConstraint {
            whole_archive: true,
            as_needed: true,
            static_system: true,
        };
        let mut attrs = InputAttributes::default();
        assert!(attrs.set_as_needed(&constraint).is_err());
        assert!(attrs.set_dynamic(&constraint).is_err());
    }

    #[test]
    fn static_conflicts_with_as_needed() {
        let constraint = AttributeConstraint::default();
        let mut attrs = InputAttributes::default();
        attrs.set_as_needed(&constraint).unwrap();
        assert!(attrs.set_static(&constraint).is_err());
    }
}
