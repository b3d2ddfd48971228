//! Error types for store operations.
//!
//! The store distinguishes two failure classes. Recoverable conditions on the
//! public surface (operating on a destroyed store, arguments that cannot be
//! keyed, handles from another store) are reported as [`StoreError`].
//! Contract violations inside node implementations (dependency cycles,
//! re-entrant store access from a closure) panic with a message naming the
//! offending declaration, since there is no caller positioned to recover.
//!
//! Panics raised by user-supplied closures (query bodies, command bodies,
//! compare functions) are never swallowed: they propagate synchronously to
//! the caller of the triggering operation, and effects already applied stay
//! committed.

use miette::Diagnostic;
use thiserror::Error;

use crate::types::NodeKind;

/// Errors surfaced by the public store operations.
#[derive(Debug, Error, Diagnostic)]
pub enum StoreError {
    /// The store has been torn down with [`crate::store::Store::destroy`].
    #[error("store `{store}` has been destroyed")]
    #[diagnostic(
        code(loomstate::store::destroyed),
        help("Operations on a destroyed store are rejected. Create a new store instead.")
    )]
    Destroyed {
        /// Diagnostic name of the store.
        store: String,
    },

    /// A declaration created inside another store's domain was used here.
    #[error("{kind} `{name}` was declared inside a different store's domain")]
    #[diagnostic(
        code(loomstate::store::foreign_declaration),
        help("Domain-declared nodes are bound to the store that ran the domain setup. Resolve the domain through this store to obtain its own declarations.")
    )]
    ForeignDeclaration {
        /// Kind of the offending declaration.
        kind: NodeKind,
        /// Declared name of the offending declaration.
        name: String,
    },

    /// An instance argument could not be canonicalized into a storage key.
    #[error("{kind} `{name}` argument is not serializable: {message}")]
    #[diagnostic(
        code(loomstate::store::arg_key),
        help("Keyed state/query arguments must serialize with serde_json so structurally equal arguments share one storage.")
    )]
    ArgKey {
        /// Kind of the offending declaration.
        kind: NodeKind,
        /// Declared name of the offending declaration.
        name: String,
        /// Rendered serde_json error.
        message: String,
    },
}
