//! Location identities: the abstract memory partitions accesses are tagged with.
//!
//! Every memory node names the location category it reads or kills. Two
//! accesses may only be reordered when their identities are provably
//! disjoint; the crate does no aliasing math of its own beyond the identity
//! comparison in [`IdentityAliasOracle`], and a real alias analysis plugs in
//! through [`AliasOracle`].
//!
//! Identities are interned per compilation in a [`LocationUniverse`] owned by
//! the graph, and nodes refer to them through [`LocationId`].

use std::fmt;

use rustc_hash::FxHashMap;

use super::arena::{Arena, Id};
use super::types::ValueKind;

/// Handle to an interned location identity.
pub type LocationId = Id<LocationIdentity>;

// =============================================================================
// Location Identity
// =============================================================================

/// An abstract memory location category.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LocationIdentity {
    /// Overlaps every other location.
    Any,
    /// Memory of a freshly allocated object that is not yet published.
    Init,
    /// A declared field.
    Field {
        holder: Box<str>,
        name: Box<str>,
        kind: ValueKind,
        immutable: bool,
    },
    /// All elements of arrays with the given element kind.
    ArrayElement { kind: ValueKind },
    /// A runtime-internal location such as an object header word.
    Named { name: Box<str>, immutable: bool },
}

impl LocationIdentity {
    #[inline]
    pub fn is_any(&self) -> bool {
        matches!(self, LocationIdentity::Any)
    }

    #[inline]
    pub fn is_init(&self) -> bool {
        matches!(self, LocationIdentity::Init)
    }

    /// A single location is anything except `Any`.
    #[inline]
    pub fn is_single(&self) -> bool {
        !self.is_any()
    }

    /// Immutable locations are never written after initialization.
    pub fn is_immutable(&self) -> bool {
        match self {
            LocationIdentity::Field { immutable, .. } | LocationIdentity::Named { immutable, .. } => {
                *immutable
            }
            _ => false,
        }
    }

    /// Copy with the mutability attribute cleared. Two declarations of one
    /// field differ at most in mutability and share this key.
    fn intern_key(&self) -> LocationIdentity {
        let mut key = self.clone();
        if let LocationIdentity::Field { immutable, .. } | LocationIdentity::Named { immutable, .. } =
            &mut key
        {
            *immutable = false;
        }
        key
    }

    /// The value layout expected at this location, if it has one.
    pub fn value_kind(&self) -> Option<ValueKind> {
        match self {
            LocationIdentity::Field { kind, .. } | LocationIdentity::ArrayElement { kind } => {
                Some(*kind)
            }
            _ => None,
        }
    }
}

impl fmt::Display for LocationIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LocationIdentity::Any => f.write_str("ANY_LOCATION"),
            LocationIdentity::Init => f.write_str("INIT_LOCATION"),
            LocationIdentity::Field { holder, name, .. } => write!(f, "{holder}.{name}"),
            LocationIdentity::ArrayElement { kind } => write!(f, "{kind}[]"),
            LocationIdentity::Named { name, .. } => f.write_str(name),
        }
    }
}

// =============================================================================
// Location Universe
// =============================================================================

/// Interning table of the location identities used by one compilation.
///
/// Interning the same identity twice returns the same [`LocationId`], so id
/// equality is identity equality. Mutability is not part of the identity: a
/// field declared both final and non-final is one location, and it is only
/// immutable if every declaration says so.
#[derive(Debug, Clone)]
pub struct LocationUniverse {
    identities: Arena<LocationIdentity>,
    interned: FxHashMap<LocationIdentity, LocationId>,
}

impl LocationUniverse {
    const ANY: LocationId = Id::new(0);
    const INIT: LocationId = Id::new(1);

    pub fn new() -> Self {
        let mut universe = LocationUniverse {
            identities: Arena::with_capacity(16),
            interned: FxHashMap::default(),
        };
        let any = universe.intern(LocationIdentity::Any);
        let init = universe.intern(LocationIdentity::Init);
        debug_assert_eq!(any, Self::ANY);
        debug_assert_eq!(init, Self::INIT);
        universe
    }

    /// The distinguished overlap-with-everything identity.
    #[inline]
    pub const fn any(&self) -> LocationId {
        Self::ANY
    }

    #[inline]
    pub const fn init(&self) -> LocationId {
        Self::INIT
    }

    pub fn intern(&mut self, identity: LocationIdentity) -> LocationId {
        let key = identity.intern_key();
        if let Some(id) = self.interned.get(&key).copied() {
            let existing = &mut self.identities[id];
            if existing.is_immutable() != identity.is_immutable() {
                tracing::warn!(location = %existing, "conflicting mutability, treating as mutable");
                *existing = key;
            }
            return id;
        }
        let id = self.identities.alloc(identity);
        self.interned.insert(key, id);
        id
    }

    pub fn field(&mut self, holder: &str, name: &str, kind: ValueKind) -> LocationId {
        self.intern(LocationIdentity::Field {
            holder: holder.into(),
            name: name.into(),
            kind,
            immutable: false,
        })
    }

    pub fn final_field(&mut self, holder: &str, name: &str, kind: ValueKind) -> LocationId {
        self.intern(LocationIdentity::Field {
            holder: holder.into(),
            name: name.into(),
            kind,
            immutable: true,
        })
    }

    pub fn array_element(&mut self, kind: ValueKind) -> LocationId {
        self.intern(LocationIdentity::ArrayElement { kind })
    }

    pub fn named(&mut self, name: &str, immutable: bool) -> LocationId {
        self.intern(LocationIdentity::Named {
            name: name.into(),
            immutable,
        })
    }

    #[inline]
    pub fn get(&self, id: LocationId) -> Option<&LocationIdentity> {
        self.identities.get(id)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.identities.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }

    /// Render an id for diagnostics, tolerating foreign ids.
    pub fn describe(&self, id: LocationId) -> String {
        match self.get(id) {
            Some(identity) => identity.to_string(),
            None => format!("<unknown location {id}>"),
        }
    }
}

impl Default for LocationUniverse {
    fn default() -> Self {
        Self::new()
    }
}

impl std::ops::Index<LocationId> for LocationUniverse {
    type Output = LocationIdentity;

    fn index(&self, id: LocationId) -> &Self::Output {
        &self.identities[id]
    }
}

// =============================================================================
// Alias Queries
// =============================================================================

/// Result of comparing two location identities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AliasRelation {
    /// Provably the same location.
    Same,
    /// Provably disjoint.
    Disjoint,
    /// Relationship unknown; must be treated as overlapping.
    Unknown,
}

impl AliasRelation {
    /// Only provably disjoint locations may be reordered.
    #[inline]
    pub const fn permits_reorder(self) -> bool {
        matches!(self, AliasRelation::Disjoint)
    }

    #[inline]
    pub const fn may_overlap(self) -> bool {
        !self.permits_reorder()
    }
}

/// Disjointness query over location identities.
///
/// Implemented by the external alias analysis. Implementations must be
/// conservative: when in doubt, answer [`AliasRelation::Unknown`].
pub trait AliasOracle {
    fn relation(&self, universe: &LocationUniverse, a: LocationId, b: LocationId) -> AliasRelation;

    fn can_reorder(&self, universe: &LocationUniverse, a: LocationId, b: LocationId) -> bool {
        self.relation(universe, a, b).permits_reorder()
    }
}

/// Identity-based oracle: distinct concrete identities are disjoint, `Any`
/// overlaps everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityAliasOracle;

impl AliasOracle for IdentityAliasOracle {
    fn relation(&self, universe: &LocationUniverse, a: LocationId, b: LocationId) -> AliasRelation {
        let (Some(left), Some(right)) = (universe.get(a), universe.get(b)) else {
            return AliasRelation::Unknown;
        };
        if left.is_any() || right.is_any() {
            AliasRelation::Unknown
        } else if a == b {
            AliasRelation::Same
        } else {
            AliasRelation::Disjoint
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
    fn test_interning_is_identity() {
        let mut universe = LocationUniverse::new();
        let a = universe.field("Point", "x", ValueKind::Int);
        let b = universe.field("Point", "x", ValueKind::Int);
        let c = universe.field("Point", "y", ValueKind::Int);

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(universe.len(), 4); // any, init, x, y
    }

    #[test]
    fn test_any_is_preinterned() {
        let mut universe = LocationUniverse::new();
        let any = universe.any();
        assert!(universe[any].is_any());
        assert_eq!(universe.intern(LocationIdentity::Any), any);
        assert!(universe[universe.init()].is_init());
    }

    #[test]
    fn test_value_kind_and_immutability() {
        let mut universe = LocationUniverse::new();
        let hub = universe.final_field("Object", "hub", ValueKind::Object);
        let elems = universe.array_element(ValueKind::Long);

        assert!(universe[hub].is_immutable());
        assert_eq!(universe[hub].value_kind(), Some(ValueKind::Object));
        assert!(!universe[elems].is_immutable());
        assert_eq!(universe[elems].value_kind(), Some(ValueKind::Long));
        assert_eq!(universe[universe.any()].value_kind(), None);
    }

    #[test]
    fn test_mutability_is_not_identity() {
        let mut universe = LocationUniverse::new();
        let declared = universe.final_field("Node", "next", ValueKind::Object);
        assert!(universe[declared].is_immutable());

        let redeclared = universe.field("Node", "next", ValueKind::Object);
        assert_eq!(declared, redeclared);
        assert!(!universe[declared].is_immutable());
        assert_eq!(universe.final_field("Node", "next", ValueKind::Object), declared);
        assert!(!universe[declared].is_immutable());
        assert_eq!(universe.len(), 3);

        assert_eq!(
            IdentityAliasOracle.relation(&universe, declared, redeclared),
            AliasRelation::Same
        );
        let header = universe.named("header", false);
        assert_eq!(universe.named("header", true), header);
    }

    #[test]
    fn test_identity_oracle() {
        let mut universe = LocationUniverse::new();
        let x = universe.field("Point", "x", ValueKind::Int);
        let y = universe.field("Point", "y", ValueKind::Int);
        let any = universe.any();
        let oracle = IdentityAliasOracle;

        assert_eq!(oracle.relation(&universe, x, y), AliasRelation::Disjoint);
        assert_eq!(oracle.relation(&universe, x, x), AliasRelation::Same);
        assert_eq!(oracle.relation(&universe, x, any), AliasRelation::Unknown);
        assert_eq!(oracle.relation(&universe, any, any), AliasRelation::Unknown);

        assert!(oracle.can_reorder(&universe, x, y));
        assert!(!oracle.can_reorder(&universe, x, x));
        assert!(!oracle.can_reorder(&universe, y, any));
    }

    #[test]
    fn test_foreign_id_is_unknown() {
        let mut universe = LocationUniverse::new();
        let x = universe.field("Point", "x", ValueKind::Int);
        let foreign = LocationId::new(99);

        assert_eq!(
            IdentityAliasOracle.relation(&universe, x, foreign),
            AliasRelation::Unknown
        );
        assert!(universe.describe(foreign).contains("unknown"));
    }

    #[test]
    fn test_display() {
        let mut universe = LocationUniverse::new();
        let x = universe.field("Point", "x", ValueKind::Int);
        let arr = universe.array_element(ValueKind::Object);
        assert_eq!(universe.describe(x), "Point.x");
        assert_eq!(universe.describe(arr), "object[]");
        assert_eq!(universe.describe(universe.any()), "ANY_LOCATION");
    }
}
