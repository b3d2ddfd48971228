//! Core types for the loomstate reactive store.
//!
//! This module defines the fundamental identifiers used throughout the
//! dependency graph: node identities, node kinds, and storage keys. These are
//! the core domain concepts that define what a graph node *is*.
//!
//! # Key Types
//!
//! - [`NodeKind`]: Identifies the seven kinds of graph-node declarations
//! - [`NodeId`]: Store-local identity of a registered declaration
//! - [`StorageKey`]: Identity of one mutable storage (declaration + argument)
//!
//! Declarations are created freely at module-definition time; a [`NodeId`] is
//! only assigned once a declaration is first used with a concrete store. Two
//! stores in one process assign identities independently, so engine instances
//! stay isolated in tests.
//!
//! # Examples
//!
//! ```rust
//! use loomstate::types::NodeKind;
//!
//! let kind = NodeKind::Query;
//! assert_eq!(kind.to_string(), "Query");
//! ```

use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// Erased value slot shared between storages, effects, and notifications.
///
/// Every state value, query result, and event payload moves through the
/// engine in this form; the typed surface downcasts at the boundary.
pub(crate) type Value = Arc<dyn Any + Send + Sync>;

/// Identifies the kind of a graph-node declaration.
///
/// Used in diagnostics, error messages, and rendered storage keys so misuse
/// is attributable to a concrete declaration without step-through debugging.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum NodeKind {
    /// A writable value cell with a compare function.
    State,
    /// A derived value recomputed from tracked reads.
    Query,
    /// A pub/sub channel, optionally with a computed payload.
    Event,
    /// A synchronous composite-effect producer.
    Command,
    /// A long-lived asynchronous command pipeline.
    CommandStream,
    /// An externally injected value with a declared default.
    Extern,
    /// A bundle of related declarations with private storage.
    Domain,
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::State => write!(f, "State"),
            Self::Query => write!(f, "Query"),
            Self::Event => write!(f, "Event"),
            Self::Command => write!(f, "Command"),
            Self::CommandStream => write!(f, "CommandStream"),
            Self::Extern => write!(f, "Extern"),
            Self::Domain => write!(f, "Domain"),
        }
    }
}

/// Store-local identity of a registered declaration.
///
/// Minted by the owning store's monotonic generator the first time a
/// declaration is resolved there. Identities are deterministic within a
/// process run and are never reused while the store is alive.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) u64);

impl NodeId {
    /// The store's own domain; declarations created outside any user domain
    /// are owned here.
    pub(crate) const DEFAULT_DOMAIN: NodeId = NodeId(0);
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Monotonic [`NodeId`] generator owned by one store.
///
/// Explicit state rather than a process-wide counter: multiple engine
/// instances in one process or test run remain independent.
#[derive(Debug)]
pub(crate) struct IdGen {
    next: u64,
}

impl IdGen {
    pub(crate) fn new() -> Self {
        // 0 is reserved for the default domain.
        Self { next: 1 }
    }

    pub(crate) fn mint(&mut self) -> NodeId {
        let id = NodeId(self.next);
        self.next += 1;
        id
    }
}

/// Identity of one mutable storage: a declaration plus its canonicalized
/// argument.
///
/// Two instances built from structurally equal arguments canonicalize to the
/// same JSON text and therefore resolve to the same storage.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct StorageKey {
    pub(crate) node: NodeId,
    pub(crate) arg: Arc<str>,
}

impl StorageKey {
    pub(crate) fn new(node: NodeId, arg: Arc<str>) -> Self {
        Self { node, arg }
    }
}

impl fmt::Display for StorageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.node, self.arg)
    }
}

/// Reference to an upstream storage a query read during its last
/// recomputation.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub(crate) enum SourceRef {
    State(StorageKey),
    Query(StorageKey),
}

