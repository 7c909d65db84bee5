//! Allow-list of element types a client may ask the server to construct.
//!
//! The client names the type in its `bind` request. Only names registered
//! here can be instantiated; nothing else in the process is reachable from
//! a client-supplied class name.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::element::{Element, Resolvable};
use crate::protocol::{Data, CLASS_KEY};

type Constructor = Arc<dyn Fn(String, Data) -> Arc<dyn Element> + Send + Sync>;

/// Maps type names to element constructors.
///
/// Built with [`Resolver::allow`] and then shared read-only via
/// [`Resolver::freeze`].
#[derive(Clone, Default)]
pub struct Resolver {
    allowed: HashMap<String, Constructor>,
}

impl Resolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allow clients to bind elements of type `T` by its [`Resolvable::CLASS`].
    pub fn allow<T: Resolvable>(self) -> Self {
        self.allow_as(T::CLASS, |id, data| Arc::new(T::construct(id, data)))
    }

    /// Allow `class` with an explicit constructor.
    pub fn allow_as<F>(mut self, class: impl Into<String>, constructor: F) -> Self
    where
        F: Fn(String, Data) -> Arc<dyn Element> + Send + Sync + 'static,
    {
        self.allowed.insert(class.into(), Arc::new(constructor));
        self
    }

    /// Finish registration. The returned resolver cannot be extended.
    pub fn freeze(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn is_allowed(&self, class: &str) -> bool {
        self.allowed.contains_key(class)
    }

    /// Registered type names, sorted.
    pub fn classes(&self) -> Vec<&str> {
        let mut classes: Vec<&str> = self.allowed.keys().map(String::as_str).collect();
        classes.sort_unstable();
        classes
    }

    /// Construct the element named by `data["class"]`, if it is allowed.
    pub fn resolve(&self, id: &str, data: Data) -> Option<Arc<dyn Element>> {
        let class = data.get(CLASS_KEY)?.as_str()?;
        let constructor = self.allowed.get(class)?.clone();
        Some(constructor(id.to_string(), data))
    }
}

impl fmt::Debug for Resolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolver")
            .field("allowed", &self.classes())
            .finish()
    }
}
