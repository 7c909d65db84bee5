//! Server-side elements bound to client DOM nodes.
//!
//! An element owns an [`ElementBase`] (id, data, page binding) and implements
//! [`Element`] for its behaviour. Every mutation helper funnels through
//! [`Element::enqueue`], which fails with [`LiveError::NotBound`] once the
//! element has been closed.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use serde_json::Value;
use uuid::Uuid;

use crate::error::{LiveError, Result};
use crate::page::{PageHandle, Reply};
use crate::protocol::{Command, Data, CLASS_KEY};

/// Generate a random element id.
pub fn unique_id() -> String {
    Uuid::new_v4().to_string()
}

/// Derive the id of a child element mounted inside `parent`.
pub fn mount(parent: &str, child: &str) -> String {
    format!("{parent}:{child}")
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Identity, data and page binding shared by every element.
#[derive(Debug)]
pub struct ElementBase {
    id: String,
    data: RwLock<Data>,
    page: Arc<Mutex<Option<PageHandle>>>,
}

impl ElementBase {
    /// Create the base for an element of type `class`. The `class` entry of
    /// `data` is only filled in when the caller did not supply one.
    pub fn new(id: impl Into<String>, class: &str, mut data: Data) -> Self {
        data.entry(CLASS_KEY)
            .or_insert_with(|| Value::String(class.to_string()));

        Self {
            id: id.into(),
            data: RwLock::new(data),
            page: Arc::new(Mutex::new(None)),
        }
    }

    /// Create a base with a generated id and no extra data.
    pub fn anonymous(class: &str) -> Self {
        Self::new(unique_id(), class, Data::new())
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Snapshot of the element's data.
    pub fn data(&self) -> Data {
        self.data
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.data
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    pub fn set(&self, key: impl Into<String>, value: impl Into<Value>) {
        self.data
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.into(), value.into());
    }

    /// Record the owning page, replacing any previous binding.
    pub fn bind(&self, page: PageHandle) {
        *lock(&self.page) = Some(page);
    }

    /// Clear the binding, returning the page it pointed at.
    pub fn unbind(&self) -> Option<PageHandle> {
        lock(&self.page).take()
    }

    pub fn page(&self) -> Option<PageHandle> {
        lock(&self.page).clone()
    }

    pub fn is_bound(&self) -> bool {
        lock(&self.page).is_some()
    }

    pub fn enqueue(&self, command: Command) -> Result<()> {
        let page = self.page().ok_or_else(|| LiveError::NotBound {
            id: self.id.clone(),
        })?;
        page.enqueue(command)
    }

    /// A handle on this element's binding that background tasks can own.
    pub fn binding(&self) -> Binding {
        Binding {
            id: self.id.clone(),
            page: self.page.clone(),
        }
    }
}

/// Shared view of an element's page binding.
///
/// Every clone sees the element being rebound or closed, so a task holding
/// one gets [`LiveError::NotBound`] once its element has been released.
#[derive(Debug, Clone)]
pub struct Binding {
    id: String,
    page: Arc<Mutex<Option<PageHandle>>>,
}

impl Binding {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn is_bound(&self) -> bool {
        lock(&self.page).is_some()
    }

    pub fn enqueue(&self, command: Command) -> Result<()> {
        let page = lock(&self.page).clone().ok_or_else(|| LiveError::NotBound {
            id: self.id.clone(),
        })?;
        page.enqueue(command)
    }
}

/// A client-originated event payload.
///
/// The payload is kept exactly as received; the accessors read the fields
/// the browser client fills in (`type`, `detail`, `formData`).
#[derive(Debug, Clone, PartialEq)]
pub struct Event(Value);

impl Event {
    pub fn new(payload: Value) -> Self {
        Self(payload)
    }

    pub fn payload(&self) -> &Value {
        &self.0
    }

    pub fn into_payload(self) -> Value {
        self.0
    }

    /// The DOM event type, e.g. `click` or `submit`.
    pub fn kind(&self) -> Option<&str> {
        self.0.get("type").and_then(Value::as_str)
    }

    pub fn detail(&self) -> Option<&Value> {
        self.0.get("detail").filter(|detail| !detail.is_null())
    }

    /// Submitted form fields as `(name, value)` pairs, in form order.
    pub fn form_data(&self) -> Vec<(String, String)> {
        let Some(entries) = self.0.get("formData").and_then(Value::as_array) else {
            return Vec::new();
        };

        entries
            .iter()
            .filter_map(|entry| {
                let pair = entry.as_array()?;
                let name = pair.first()?.as_str()?;
                let value = match pair.get(1)? {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                Some((name.to_string(), value))
            })
            .collect()
    }
}

/// A bindable piece of server-side UI.
///
/// Implementors hold an [`ElementBase`] and override the hooks they need.
/// Elements that own background work (timers, refresh loops) must stop it in
/// [`Element::close`]; anything that keeps running afterwards will get
/// [`LiveError::NotBound`] from every mutation helper.
pub trait Element: Send + Sync + 'static {
    fn base(&self) -> &ElementBase;

    fn id(&self) -> &str {
        self.base().id()
    }

    fn data(&self) -> Data {
        self.base().data()
    }

    /// Called when the element is placed into a page's element table.
    fn bind(&self, page: PageHandle) {
        self.base().bind(page);
    }

    /// Called when the element is released. Overrides must call the base
    /// implementation (or `self.base().unbind()`).
    fn close(&self) -> Result<()> {
        self.base().unbind();
        Ok(())
    }

    /// Handle an event forwarded from the client.
    fn handle(&self, event: Event) -> Result<()> {
        let _ = event;
        Ok(())
    }

    fn is_bound(&self) -> bool {
        self.base().is_bound()
    }

    /// Push a command onto the owning page's outgoing queue.
    fn enqueue(&self, command: Command) -> Result<()> {
        self.base().enqueue(command)
    }

    /// Replace the contents of this element's node.
    fn update(&self, html: &str) -> Result<()> {
        self.enqueue(Command::update(self.id(), html))
    }

    fn replace(&self, selector: &str, html: &str) -> Result<()> {
        self.enqueue(Command::replace(selector, html))
    }

    fn prepend(&self, selector: &str, html: &str) -> Result<()> {
        self.enqueue(Command::prepend(selector, html))
    }

    fn append(&self, selector: &str, html: &str) -> Result<()> {
        self.enqueue(Command::append(selector, html))
    }

    fn remove(&self, selector: &str) -> Result<()> {
        self.enqueue(Command::remove(selector))
    }

    fn dispatch_event(&self, selector: &str, event_type: &str) -> Result<()> {
        self.enqueue(Command::dispatch_event(selector, event_type))
    }

    /// Run `code` on the client in the context of this element's node.
    fn script(&self, code: &str) -> Result<()> {
        self.enqueue(Command::script(self.id(), code))
    }

    /// Allocate a reply token on the owning page.
    ///
    /// Pass [`Reply::token`] to [`Command::with_reply`] and await
    /// [`Reply::wait`] to learn when the client has applied the command.
    fn request_reply(&self) -> Result<Reply> {
        let page = self.base().page().ok_or_else(|| LiveError::NotBound {
            id: self.id().to_string(),
        })?;
        Ok(page.request_reply())
    }

    /// JavaScript for an inline handler that forwards the DOM event here.
    fn forward_event(&self, detail: Option<&Value>) -> String {
        forward_call("forwardEvent", self.id(), detail)
    }

    /// Like [`Element::forward_event`], also sending the enclosing form's fields.
    fn forward_form_event(&self, detail: Option<&Value>) -> String {
        forward_call("forwardFormEvent", self.id(), detail)
    }
}

fn forward_call(function: &str, id: &str, detail: Option<&Value>) -> String {
    let id = Value::String(id.to_string());
    match detail {
        Some(detail) => format!("live.{function}({id}, event, {detail})"),
        None => format!("live.{function}({id}, event)"),
    }
}

/// An element type the [`Resolver`](crate::resolver::Resolver) can construct
/// from a client `bind` request.
pub trait Resolvable: Element + Sized {
    /// Type name carried in the client's `data-class` attribute.
    const CLASS: &'static str;

    fn construct(id: String, data: Data) -> Self;
}
