//! Graph-node declarations for the loomstate store.
//!
//! A declaration describes one node of the dependency graph: a [`StateDef`],
//! [`QueryDef`], [`EventDef`], [`CommandDef`], [`StreamDef`], [`ExternDef`],
//! or [`DomainDef`]. Declarations are immutable, cheaply cloneable handles
//! created once at module-definition time (or inside a domain's setup
//! closure) and shared for the life of the process. The mutable runtime
//! record backing a declaration for one argument (its *storage*) lives
//! inside a [`crate::store::Store`] and is created lazily on first access.
//!
//! Declarations are turned into *instances* before use: `def.with(arg)` pairs
//! the declaration with a concrete argument, and `def.item()` is the
//! argument-less fast path returning a memoized, referentially stable
//! instance so repeated lookups skip argument canonicalization.
//!
//! # Examples
//!
//! ```rust
//! use loomstate::nodes::{CommandDef, StateDef};
//!
//! let count: StateDef<(), i32> = StateDef::new("count", |_| 0);
//! let incre = CommandDef::new("incre", {
//!     let count = count.clone();
//!     move |ctx, _: &()| {
//!         let current = ctx.get(&count.item());
//!         count.item().set(current + 1)
//!     }
//! });
//!
//! // Nullary instances are memoized: both handles share one storage key.
//! assert!(count.item().ptr_eq(&count.item()));
//! # let _ = incre;
//! ```

pub mod command;
pub mod domain;
pub mod event;
pub mod externs;
pub mod output;
pub mod query;
pub mod state;
pub mod stream;

pub use command::{CommandDef, CommandItem};
pub use domain::DomainDef;
pub use event::{EventDef, EventItem};
pub use externs::{ExternBinding, ExternDef};
pub use output::CommandOutput;
pub use query::{QueryDef, QueryItem};
pub use state::{StateDef, StateItem};
pub use stream::{StreamDef, StreamItem};

use std::any::Any;
use std::fmt;
use std::sync::{Arc, OnceLock};

use futures_util::stream::BoxStream;
use serde::Serialize;
use uuid::Uuid;

use crate::store::ctx::{ReadCtx, StreamCtx};
use crate::types::{NodeId, NodeKind, Value};

// ============================================================================
// Declaration metadata
// ============================================================================

/// Ownership stamp applied when a declaration is created through a domain
/// setup context. Unstamped declarations are owned by the resolving store's
/// default domain.
#[derive(Clone, Copy, Debug)]
pub(crate) struct DeclOwner {
    pub(crate) store: Uuid,
    pub(crate) domain: NodeId,
}

/// Metadata shared by every declaration kind.
#[derive(Debug)]
pub(crate) struct DeclMeta {
    pub(crate) kind: NodeKind,
    pub(crate) name: String,
    pub(crate) owner: OnceLock<DeclOwner>,
}

impl DeclMeta {
    pub(crate) fn new(kind: NodeKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            owner: OnceLock::new(),
        }
    }

    /// Kind plus backticked name, the form used in every diagnostic.
    pub(crate) fn describe(&self) -> String {
        format!("{} `{}`", self.kind, self.name)
    }
}

// ============================================================================
// Instance arguments
// ============================================================================

/// A typed argument in erased form, canonicalized for storage keying.
///
/// The canonical text is produced through `serde_json::Value` so map-typed
/// arguments serialize with sorted keys; structurally equal arguments always
/// canonicalize identically.
#[derive(Clone)]
pub(crate) struct ArgValue {
    pub(crate) any: Value,
    pub(crate) canonical: Result<Arc<str>, String>,
}

impl ArgValue {
    pub(crate) fn keyed<A>(arg: A) -> Self
    where
        A: Serialize + Send + Sync + 'static,
    {
        let canonical = match serde_json::to_value(&arg) {
            Ok(value) => Ok(Arc::<str>::from(value.to_string().as_str())),
            Err(err) => Err(err.to_string()),
        };
        Self {
            any: Arc::new(arg),
            canonical,
        }
    }

    pub(crate) fn nullary() -> Self {
        Self {
            any: Arc::new(()),
            canonical: Ok(Arc::from("null")),
        }
    }
}

impl fmt::Debug for ArgValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.canonical {
            Ok(text) => write!(f, "ArgValue({text})"),
            Err(err) => write!(f, "ArgValue(<unkeyable: {err}>)"),
        }
    }
}

// ============================================================================
// Erased declaration views
// ============================================================================
//
// Storages hold declarations in erased form so invalidation and teardown can
// recompute and compare without the concrete argument/value types in scope.
// The typed surface downcasts exactly once, at the public boundary.

pub(crate) trait ErasedState: Send + Sync {
    fn meta(&self) -> &DeclMeta;
    fn init(&self, arg: &dyn Any) -> Value;
    fn compare(&self, prev: &dyn Any, next: &dyn Any) -> bool;
}

pub(crate) trait ErasedQuery: Send + Sync {
    fn meta(&self) -> &DeclMeta;
    fn eval(&self, ctx: &mut ReadCtx<'_>, arg: &dyn Any) -> Value;
    fn compare(&self, prev: &dyn Any, next: &dyn Any) -> bool;
}

pub(crate) trait ErasedEvent: Send + Sync {
    fn meta(&self) -> &DeclMeta;
    fn payload(&self, ctx: &mut ReadCtx<'_>, arg: &Value) -> Value;
}

pub(crate) trait ErasedCommand: Send + Sync {
    fn meta(&self) -> &DeclMeta;
    fn run(&self, ctx: &mut ReadCtx<'_>, arg: &dyn Any) -> CommandOutput;
}

/// A started pipeline: the erased input sender plus the output side feeding
/// the dispatcher.
pub(crate) struct OpenedStream {
    pub(crate) sender: Box<dyn Any + Send + Sync>,
    pub(crate) output: BoxStream<'static, CommandOutput>,
}

pub(crate) trait ErasedStream: Send + Sync {
    fn meta(&self) -> &DeclMeta;
    fn open(&self, ctx: &mut StreamCtx<'_>) -> OpenedStream;
    fn push(&self, sender: &dyn Any, arg: &dyn Any);
}

// ============================================================================
// Payload traits
// ============================================================================

/// Instances that can be read through [`crate::store::Store::query`] and a
/// tracking context's `get`: state and query instances.
pub trait ReadPayload {
    /// The value produced by reading this instance.
    type Value: Clone + Send + Sync + 'static;

    #[doc(hidden)]
    fn read_ref(&self) -> ReadRef;
}

/// Erased view of a readable instance. Opaque; constructed only by the
/// in-crate [`ReadPayload`] implementations.
pub struct ReadRef(pub(crate) ReadSource);

pub(crate) enum ReadSource {
    State {
        decl: Arc<dyn ErasedState>,
        arg: ArgValue,
    },
    Query {
        decl: Arc<dyn ErasedQuery>,
        arg: ArgValue,
    },
}

impl ReadRef {
    pub(crate) fn meta(&self) -> &DeclMeta {
        match &self.0 {
            ReadSource::State { decl, .. } => decl.meta(),
            ReadSource::Query { decl, .. } => decl.meta(),
        }
    }

    pub(crate) fn arg(&self) -> &ArgValue {
        match &self.0 {
            ReadSource::State { arg, .. } | ReadSource::Query { arg, .. } => arg,
        }
    }
}

/// Instances that can be handed to [`crate::store::Store::send_command`]:
/// command and command-stream instances.
pub trait DispatchPayload {
    #[doc(hidden)]
    fn dispatch_ref(&self) -> DispatchRef;
}

/// Erased view of a dispatchable instance. Opaque; constructed only by the
/// in-crate [`DispatchPayload`] implementations.
pub struct DispatchRef(pub(crate) DispatchTarget);

pub(crate) enum DispatchTarget {
    Command {
        decl: Arc<dyn ErasedCommand>,
        arg: Value,
    },
    Stream {
        decl: Arc<dyn ErasedStream>,
        arg: Value,
    },
}
