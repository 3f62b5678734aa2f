//! Consistency violations raised by graph construction and mutation.
//!
//! Every error here signals a bug in the pass that triggered it, never bad
//! input from the program being compiled. The driver is expected to abandon
//! the compilation on the first one; nothing is retried.

use thiserror::Error;

use super::node::{InputType, NodeId, NodeState};
use super::types::Stamp;

/// The graph invariant a [`GraphError`] violates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Invariant {
    /// Every input edge is mirrored in the target's usage set.
    EdgeSymmetry,
    /// Only alive nodes are mutated or linked to.
    Aliveness,
    /// Inputs stay within the declared slot layout.
    InputArity,
    /// Mandatory slots are never empty.
    MandatoryInput,
    /// Targets allow the input type of the slot they occupy.
    UsageType,
    /// Compare-and-swap operands have compatible stamps.
    StampCompatibility,
    /// Address and value match the location's layout.
    AccessLayout,
    /// The node has the kind the operation requires.
    NodeKind,
    /// Replaced or deleted nodes keep no usages.
    NoDanglingUsages,
}

impl std::fmt::Display for Invariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Invariant::EdgeSymmetry => "edge symmetry",
            Invariant::Aliveness => "aliveness",
            Invariant::InputArity => "input arity",
            Invariant::MandatoryInput => "mandatory input",
            Invariant::UsageType => "usage type",
            Invariant::StampCompatibility => "stamp compatibility",
            Invariant::AccessLayout => "access layout",
            Invariant::NodeKind => "node kind",
            Invariant::NoDanglingUsages => "no dangling usages",
        };
        f.write_str(name)
    }
}

/// A compiler-internal consistency violation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    #[error("node {0} does not belong to this graph")]
    UnknownNode(NodeId),

    #[error("node {node} is not alive ({state:?})")]
    NotAlive { node: NodeId, state: NodeState },

    #[error("node {node} is {state:?}, expected {expected:?}")]
    InvalidState {
        node: NodeId,
        state: NodeState,
        expected: NodeState,
    },

    #[error("{kind} {node} has no input slot {slot}")]
    ArityViolation {
        node: NodeId,
        kind: &'static str,
        slot: usize,
    },

    #[error("mandatory input `{slot}` of {kind} {node} cannot be empty")]
    MandatoryInputMissing {
        node: NodeId,
        kind: &'static str,
        slot: &'static str,
    },

    #[error("{input_kind} {input} cannot be used as a {input_type:?} input of {node}")]
    DisallowedUsage {
        node: NodeId,
        input: NodeId,
        input_kind: &'static str,
        input_type: InputType,
    },

    #[error("compare-and-swap operands are incompatible: expected is {expected}, new value is {new_value}")]
    IncompatibleStamps { expected: Stamp, new_value: Stamp },

    #[error("{what} {node} with stamp {stamp} does not fit location {location}")]
    AccessLayout {
        node: NodeId,
        what: &'static str,
        stamp: Stamp,
        location: String,
    },

    #[error("expected {expected} at {node}, found {found}")]
    UnexpectedKind {
        node: NodeId,
        expected: &'static str,
        found: &'static str,
    },

    #[error("{node} still has {count} usage(s) after it was replaced")]
    DanglingUsages { node: NodeId, count: usize },

    #[error("edge {user} -> {input} is not mirrored in the usage set")]
    AsymmetricEdge { user: NodeId, input: NodeId },

    #[error("lowering {node} left {input_type:?} usages without a replacement")]
    MissingReplacement { node: NodeId, input_type: InputType },
}

impl GraphError {
    /// The invariant this error reports.
    pub fn invariant(&self) -> Invariant {
        match self {
            GraphError::UnknownNode(_)
            | GraphError::NotAlive { .. }
            | GraphError::InvalidState { .. } => Invariant::Aliveness,
            GraphError::ArityViolation { .. } => Invariant::InputArity,
            GraphError::MandatoryInputMissing { .. } => Invariant::MandatoryInput,
            GraphError::DisallowedUsage { .. } => Invariant::UsageType,
            GraphError::IncompatibleStamps { .. } => Invariant::StampCompatibility,
            GraphError::AccessLayout { .. } => Invariant::AccessLayout,
            GraphError::UnexpectedKind { .. } => Invariant::NodeKind,
            GraphError::DanglingUsages { .. } | GraphError::MissingReplacement { .. } => {
                Invariant::NoDanglingUsages
            }
            GraphError::AsymmetricEdge { .. } => Invariant::EdgeSymmetry,
        }
    }

    /// The offending node, when one is known.
    pub fn node(&self) -> Option<NodeId> {
        match self {
            GraphError::UnknownNode(node)
            | GraphError::NotAlive { node, .. }
            | GraphError::InvalidState { node, .. }
            | GraphError::ArityViolation { node, .. }
            | GraphError::MandatoryInputMissing { node, .. }
            | GraphError::DisallowedUsage { node, .. }
            | GraphError::AccessLayout { node, .. }
            | GraphError::UnexpectedKind { node, .. }
            | GraphError::DanglingUsages { node, .. }
            | GraphError::MissingReplacement { node, .. } => Some(*node),
            GraphError::AsymmetricEdge { user, .. } => Some(*user),
            GraphError::IncompatibleStamps { .. } => None,
        }
    }
}

/// Result of graph operations.
pub type GraphResult<T> = Result<T, GraphError>;

/// Log a violation where it is raised and hand it back for `?`.
pub(crate) fn violation(err: GraphError) -> GraphError {
    tracing::error!(invariant = %err.invariant(), node = ?err.node(), "{err}");
    err
}
