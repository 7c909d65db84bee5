//! Core element model, resolver, page session and wire protocol for Live.

pub mod config;
pub mod connection;
pub mod element;
pub mod error;
pub mod markup;
pub mod page;
pub mod protocol;
pub mod resolver;
pub mod task;
pub mod view;

pub use element::{mount, unique_id, Binding, Element, ElementBase, Event, Resolvable};
pub use error::{LiveError, Result};
pub use page::{Page, PageHandle, PageState, Reply};
pub use protocol::{ClientMessage, Command, Data, Options};
pub use resolver::Resolver;
pub use view::{Form, View};
