//! # Loomstate: Reactive Application-State Runtime
//!
//! Loomstate is a dependency-tracked graph of derived values that recomputes
//! incrementally when inputs change, dispatches composite side-effecting
//! commands, bridges to asynchronous pipelines, and reclaims unused graph
//! nodes by reference counting.
//!
//! ## Core Concepts
//!
//! - **State**: Writable value cells with compare-suppressed writes
//! - **Queries**: Pull-evaluated derived values with tracked, dynamic
//!   dependencies
//! - **Events**: Pub/sub channels, optionally with computed payloads
//! - **Commands**: Synchronous bodies returning ordered effect trees
//! - **Command streams**: Long-lived async pipelines feeding the dispatcher
//! - **Domains**: Bundles of declarations with private, ref-counted storage
//!
//! ## Quick Start
//!
//! ### A counter
//!
//! ```
//! use loomstate::{CommandDef, StateDef, Store};
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
//! let store = Store::new();
//! store.send_command(&incre.item())?;
//! store.send_command(&incre.item())?;
//! assert_eq!(store.query(&count.item())?, 2);
//! # Ok::<(), loomstate::StoreError>(())
//! ```
//!
//! ### Subscribing to derived values
//!
//! Queries recompute only along the actually-changed subgraph, and each
//! subscriber hears at most once per settled cascade:
//!
//! ```
//! use std::sync::{Arc, Mutex};
//!
//! use loomstate::{CommandDef, QueryDef, StateDef, Store};
//!
//! let count: StateDef<(), i32> = StateDef::new("count", |_| 0);
//! let doubled = QueryDef::new("doubled", {
//!     let count = count.clone();
//!     move |ctx, _: &()| ctx.get(&count.item()) * 2
//! });
//! let set = CommandDef::new("set", {
//!     let count = count.clone();
//!     move |_ctx, value: &i32| count.item().set(*value)
//! });
//!
//! let store = Store::new();
//! let seen = Arc::new(Mutex::new(Vec::new()));
//! let sub = store.subscribe_query(&doubled.item(), {
//!     let seen = Arc::clone(&seen);
//!     move |value: &i32| seen.lock().unwrap().push(*value)
//! })?;
//!
//! store.send_command(&set.with(5))?;
//! assert_eq!(*seen.lock().unwrap(), vec![10]);
//! sub.unsubscribe();
//! # Ok::<(), loomstate::StoreError>(())
//! ```
//!
//! ## Execution Model
//!
//! The core is single-threaded, synchronous, and run-to-completion: each
//! public operation locks the store, drives its invalidation cascade and
//! garbage collection to a fixed point, and delivers notifications only
//! after releasing the lock. Asynchronous behavior exists solely at the
//! boundary: command pipelines are driven by tokio tasks whose outputs
//! re-enter the store like fresh external calls.
//!
//! ## Module Guide
//!
//! - [`nodes`] - Declarations: state, query, event, command, stream, extern,
//!   domain
//! - [`store`] - The store, its public operations, and the node contexts
//! - [`errors`] - The public error type
//! - [`types`] - Identifiers shared across the graph
//! - [`telemetry`] - Opt-in tracing setup for hosts

pub mod errors;
pub mod nodes;
pub mod store;
pub mod telemetry;
pub mod types;

pub use errors::StoreError;
pub use nodes::{
    CommandDef, CommandItem, CommandOutput, DispatchPayload, DomainDef, EventDef, EventItem,
    ExternBinding, ExternDef, QueryDef, QueryItem, ReadPayload, StateDef, StateItem, StreamDef,
    StreamItem,
};
pub use store::{DomainCtx, ReadCtx, Store, StoreOptions, StreamCtx, Subscription};
