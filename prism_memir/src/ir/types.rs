//! Stamps: result-type descriptors for memory-layer nodes.
//!
//! A stamp only describes the *shape* of a value (bit width, reference-ness)
//! and the non-value tokens the graph threads through nodes (control,
//! memory, frame state). Stamps are requested by kind through the
//! constructors below; nothing in this crate infers or narrows them.

use std::fmt;

// =============================================================================
// Value Kind
// =============================================================================

/// Semantic kind of a value stored in, or swapped at, a memory location.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ValueKind {
    Boolean = 0,
    Byte = 1,
    Short = 2,
    Char = 3,
    Int = 4,
    Long = 5,
    Float = 6,
    Double = 7,
    /// Heap reference.
    Object = 8,
    Void = 9,
}

impl ValueKind {
    /// The kind used when the value lives on the operand stack.
    ///
    /// Sub-word integers widen to `Int`; everything else is unchanged.
    #[inline]
    pub const fn stack_kind(self) -> ValueKind {
        match self {
            ValueKind::Boolean | ValueKind::Byte | ValueKind::Short | ValueKind::Char => {
                ValueKind::Int
            }
            other => other,
        }
    }

    /// Width in bits of the value in memory. References are pointer-sized.
    #[inline]
    pub const fn bits(self) -> u8 {
        match self {
            ValueKind::Boolean | ValueKind::Byte => 8,
            ValueKind::Short | ValueKind::Char => 16,
            ValueKind::Int | ValueKind::Float => 32,
            ValueKind::Long | ValueKind::Double | ValueKind::Object => 64,
            ValueKind::Void => 0,
        }
    }

    #[inline]
    pub const fn is_reference(self) -> bool {
        matches!(self, ValueKind::Object)
    }

    pub const fn name(self) -> &'static str {
        match self {
            ValueKind::Boolean => "boolean",
            ValueKind::Byte => "byte",
            ValueKind::Short => "short",
            ValueKind::Char => "char",
            ValueKind::Int => "int",
            ValueKind::Long => "long",
            ValueKind::Float => "float",
            ValueKind::Double => "double",
            ValueKind::Object => "object",
            ValueKind::Void => "void",
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// =============================================================================
// Stamp
// =============================================================================

/// Result-type descriptor of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stamp {
    /// No value (stores, barriers, guards).
    Void,
    /// Integer of the given width.
    Integer { bits: u8 },
    /// Floating point of the given width.
    Float { bits: u8 },
    /// Heap reference; `non_null` once proven.
    Object { non_null: bool },
    /// Computed address (base + offset).
    Address,
    /// Control token.
    Control,
    /// Deoptimization frame state.
    State,
    /// Invalid stamp; compatible with nothing.
    Illegal,
}

impl Stamp {
    /// Stamp for a value of `kind`, in its memory width.
    pub const fn for_kind(kind: ValueKind) -> Stamp {
        match kind {
            ValueKind::Boolean
            | ValueKind::Byte
            | ValueKind::Short
            | ValueKind::Char
            | ValueKind::Int
            | ValueKind::Long => Stamp::Integer { bits: kind.bits() },
            ValueKind::Float | ValueKind::Double => Stamp::Float { bits: kind.bits() },
            ValueKind::Object => Stamp::Object { non_null: false },
            ValueKind::Void => Stamp::Void,
        }
    }

    #[inline]
    pub const fn void() -> Stamp {
        Stamp::Void
    }

    /// Result stamp of a compare-and-swap: boolean widened to the stack kind.
    #[inline]
    pub const fn boolean_result() -> Stamp {
        Stamp::for_kind(ValueKind::Boolean.stack_kind())
    }

    #[inline]
    pub const fn object_non_null() -> Stamp {
        Stamp::Object { non_null: true }
    }

    /// Whether two stamps describe values that may flow into the same slot.
    ///
    /// Integers and floats must agree on width. Nullness is ignored for
    /// references. `Illegal` is compatible with nothing, including itself.
    pub const fn is_compatible(self, other: Stamp) -> bool {
        match (self, other) {
            (Stamp::Integer { bits: a }, Stamp::Integer { bits: b }) => a == b,
            (Stamp::Float { bits: a }, Stamp::Float { bits: b }) => a == b,
            (Stamp::Object { .. }, Stamp::Object { .. }) => true,
            (Stamp::Void, Stamp::Void)
            | (Stamp::Address, Stamp::Address)
            | (Stamp::Control, Stamp::Control)
            | (Stamp::State, Stamp::State) => true,
            _ => false,
        }
    }

    /// Whether this stamp describes a data value.
    #[inline]
    pub const fn is_value(self) -> bool {
        matches!(
            self,
            Stamp::Integer { .. } | Stamp::Float { .. } | Stamp::Object { .. }
        )
    }

    #[inline]
    pub const fn is_object(self) -> bool {
        matches!(self, Stamp::Object { .. })
    }
}

impl fmt::Display for Stamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stamp::Void => f.write_str("void"),
            Stamp::Integer { bits } => write!(f, "i{bits}"),
            Stamp::Float { bits } => write!(f, "f{bits}"),
            Stamp::Object { non_null: true } => f.write_str("object!"),
            Stamp::Object { non_null: false } => f.write_str("object"),
            Stamp::Address => f.write_str("address"),
            Stamp::Control => f.write_str("control"),
            Stamp::State => f.write_str("state"),
            Stamp::Illegal => f.write_str("illegal"),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stack_kind_widens_subword_integers() {
        assert_eq!(ValueKind::Boolean.stack_kind(), ValueKind::Int);
        assert_eq!(ValueKind::Char.stack_kind(), ValueKind::Int);
        assert_eq!(ValueKind::Long.stack_kind(), ValueKind::Long);
        assert_eq!(ValueKind::Object.stack_kind(), ValueKind::Object);
    }

    #[test]
    fn test_boolean_result_is_int32() {
        assert_eq!(Stamp::boolean_result(), Stamp::Integer { bits: 32 });
    }

    #[test]
    fn test_compatibility() {
        let int = Stamp::for_kind(ValueKind::Int);
        let long = Stamp::for_kind(ValueKind::Long);
        let obj = Stamp::for_kind(ValueKind::Object);

        assert!(int.is_compatible(int));
        assert!(!int.is_compatible(long));
        assert!(!long.is_compatible(obj));
        assert!(obj.is_compatible(Stamp::object_non_null()));
        assert!(!Stamp::Float { bits: 64 }.is_compatible(long));
        assert!(!Stamp::Illegal.is_compatible(Stamp::Illegal));
    }

    #[test]
    fn test_display() {
        assert_eq!(Stamp::for_kind(ValueKind::Long).to_string(), "i64");
        assert_eq!(Stamp::object_non_null().to_string(), "object!");
        assert_eq!(ValueKind::Double.to_string(), "double");
    }
}
