//! Extern declarations: externally injected values.
//!
//! An [`ExternDef`] names a value the host application injects at store
//! construction time ([`ExternDef::bind`] produces the binding handed to
//! [`crate::store::StoreOptions::with_extern`]). Reading an unbound extern
//! is expected absence, not an error: the declared default is returned.
//! Tests substitute externs by binding a different value into their store.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use super::DeclMeta;
use crate::types::{NodeKind, Value};

/// Declaration of an injected value with a default.
///
/// # Examples
///
/// ```rust
/// use loomstate::nodes::ExternDef;
///
/// let page_size: ExternDef<usize> = ExternDef::new("page_size", 25);
/// let binding = page_size.bind(100);
/// # let _ = binding;
/// ```
pub struct ExternDef<T> {
    pub(crate) inner: Arc<ExternInner<T>>,
}

pub(crate) struct ExternInner<T> {
    pub(crate) meta: DeclMeta,
    pub(crate) default: T,
}

impl<T> Clone for ExternDef<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> fmt::Debug for ExternDef<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ExternDef({})", self.inner.meta.name)
    }
}

impl<T> ExternDef<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Declare an extern with its default value.
    pub fn new(name: impl Into<String>, default: T) -> Self {
        Self {
            inner: Arc::new(ExternInner {
                meta: DeclMeta::new(NodeKind::Extern, name),
                default,
            }),
        }
    }

    /// The declared name, used in diagnostics.
    pub fn name(&self) -> &str {
        &self.inner.meta.name
    }

    /// Bind a concrete value for injection into one store.
    pub fn bind(&self, value: T) -> ExternBinding {
        ExternBinding {
            key: self.key(),
            keep: Arc::clone(&self.inner) as Arc<dyn Any + Send + Sync>,
            value: Arc::new(value),
        }
    }

    /// The declared default, returned when no binding matches.
    pub(crate) fn default_value(&self) -> T {
        self.inner.default.clone()
    }

    /// Allocation identity of the declaration; bindings are matched by it.
    pub(crate) fn key(&self) -> usize {
        Arc::as_ptr(&self.inner) as *const () as usize
    }
}

/// A concrete value bound to an extern declaration for one store.
pub struct ExternBinding {
    pub(crate) key: usize,
    // Holds the declaration alive so the identity key cannot be reused.
    pub(crate) keep: Arc<dyn Any + Send + Sync>,
    pub(crate) value: Value,
}

impl fmt::Debug for ExternBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ExternBinding(@{:#x})", self.key)
    }
}
