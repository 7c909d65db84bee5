//! Per-connection session: element table, outgoing queue and the
//! reader / writer / keep-alive loops.
//!
//! A [`Page`] moves through `Idle -> Running -> Closed`. [`Page::run`] drives
//! the connection until the client goes away, the transport fails or the
//! page is cancelled, then shuts down in a fixed order: keep-alive first,
//! then every bound element is closed, then the writer drains and stops.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use futures::{Sink, SinkExt, Stream, StreamExt};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::connection::Frame;
use crate::element::{lock, Element, Event};
use crate::error::{LiveError, Result};
use crate::protocol::{ClientMessage, Command, Data};
use crate::resolver::Resolver;

/// Smallest keep-alive period; shorter intervals are clamped to this.
pub const MIN_KEEP_ALIVE: Duration = Duration::from_millis(1);

/// Lifecycle of a [`Page`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageState {
    Idle,
    Running,
    Closed,
}

impl PageState {
    fn as_str(self) -> &'static str {
        match self {
            PageState::Idle => "idle",
            PageState::Running => "running",
            PageState::Closed => "closed",
        }
    }
}

impl fmt::Display for PageState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An item on the outgoing queue.
#[derive(Debug, Clone, PartialEq)]
enum Outgoing {
    Command(Command),
    Ping,
}

struct Shared {
    id: String,
    outgoing: mpsc::UnboundedSender<Outgoing>,
    /// Set whenever an application command is enqueued; cleared by keep-alive.
    activity: AtomicBool,
    replies: Mutex<HashMap<String, oneshot::Sender<Vec<Value>>>>,
    next_reply: AtomicU64,
}

/// Cheap, cloneable reference to a page held by its bound elements.
///
/// This is the producer side of the outgoing queue; any thread may enqueue.
#[derive(Clone)]
pub struct PageHandle {
    shared: Arc<Shared>,
}

impl PageHandle {
    pub fn id(&self) -> &str {
        &self.shared.id
    }

    /// Append a command to the outgoing queue.
    pub fn enqueue(&self, command: Command) -> Result<()> {
        self.shared.activity.store(true, Ordering::SeqCst);
        self.shared
            .outgoing
            .send(Outgoing::Command(command))
            .map_err(|_| LiveError::PageClosed)
    }

    /// Allocate a reply token. The returned [`Reply`] resolves when the
    /// client answers `["reply", token, ...values]`.
    pub fn request_reply(&self) -> Reply {
        let n = self.shared.next_reply.fetch_add(1, Ordering::SeqCst);
        let token = format!("{}:{n}", self.shared.id);
        let (tx, rx) = oneshot::channel();
        lock(&self.shared.replies).insert(token.clone(), tx);
        Reply {
            token,
            receiver: rx,
            page: Arc::downgrade(&self.shared),
        }
    }

    /// True if both handles refer to the same page.
    pub fn same_page(&self, other: &PageHandle) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    fn ping(&self) -> Result<()> {
        self.shared
            .outgoing
            .send(Outgoing::Ping)
            .map_err(|_| LiveError::PageClosed)
    }

    fn take_activity(&self) -> bool {
        self.shared.activity.swap(false, Ordering::SeqCst)
    }

    fn resolve_reply(&self, token: &str, values: Vec<Value>) -> bool {
        match lock(&self.shared.replies).remove(token) {
            // The waiter may have given up; that still counts as delivered.
            Some(tx) => {
                let _ = tx.send(values);
                true
            }
            None => false,
        }
    }

    fn abandon_replies(&self) {
        lock(&self.shared.replies).clear();
    }

    #[cfg(test)]
    fn pending_replies(&self) -> usize {
        lock(&self.shared.replies).len()
    }
}

impl fmt::Debug for PageHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PageHandle")
            .field("id", &self.shared.id)
            .finish()
    }
}

/// A pending acknowledgement from the client.
///
/// Dropping a `Reply` forgets its token; a late answer is then ignored.
#[derive(Debug)]
pub struct Reply {
    token: String,
    receiver: oneshot::Receiver<Vec<Value>>,
    page: Weak<Shared>,
}

impl Reply {
    pub fn token(&self) -> &str {
        &self.token
    }

    /// Wait for the client's reply values. Fails with
    /// [`LiveError::PageClosed`] if the page closes first.
    pub async fn wait(mut self) -> Result<Vec<Value>> {
        (&mut self.receiver).await.map_err(|_| LiveError::PageClosed)
    }
}

impl Drop for Reply {
    fn drop(&mut self) {
        if let Some(shared) = self.page.upgrade() {
            lock(&shared.replies).remove(&self.token);
        }
    }
}

/// The live session for one client connection.
pub struct Page {
    handle: PageHandle,
    resolver: Arc<Resolver>,
    elements: Mutex<HashMap<String, Arc<dyn Element>>>,
    attached: Mutex<HashMap<String, Arc<dyn Element>>>,
    receiver: Mutex<Option<mpsc::UnboundedReceiver<Outgoing>>>,
    state: Mutex<PageState>,
    cancel: CancellationToken,
}

impl Page {
    pub fn new(resolver: Arc<Resolver>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let shared = Shared {
            id: Uuid::new_v4().to_string(),
            outgoing: tx,
            activity: AtomicBool::new(false),
            replies: Mutex::new(HashMap::new()),
            next_reply: AtomicU64::new(1),
        };

        Self {
            handle: PageHandle {
                shared: Arc::new(shared),
            },
            resolver,
            elements: Mutex::new(HashMap::new()),
            attached: Mutex::new(HashMap::new()),
            receiver: Mutex::new(Some(rx)),
            state: Mutex::new(PageState::Idle),
            cancel: CancellationToken::new(),
        }
    }

    pub fn id(&self) -> &str {
        self.handle.id()
    }

    pub fn page_handle(&self) -> PageHandle {
        self.handle.clone()
    }

    pub fn state(&self) -> PageState {
        *lock(&self.state)
    }

    pub fn resolver(&self) -> &Arc<Resolver> {
        &self.resolver
    }

    /// Token that stops [`Page::run`] when cancelled.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Ask a running page to shut down.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Currently bound element for `id`.
    pub fn element(&self, id: &str) -> Option<Arc<dyn Element>> {
        lock(&self.elements).get(id).cloned()
    }

    /// Ids of all bound elements, sorted.
    pub fn bound_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = lock(&self.elements).keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Place `element` in the element table and bind it to this page.
    ///
    /// An element previously bound under the same id is closed, unless it
    /// is attached or is the same instance.
    pub fn bind(&self, element: Arc<dyn Element>) -> Result<()> {
        let id = element.id().to_string();
        let previous = {
            let mut elements = lock(&self.elements);
            // Checked under the table lock so a concurrent close always
            // sweeps what was inserted here.
            if self.state() == PageState::Closed {
                return Err(LiveError::PageClosed);
            }
            let previous = elements.insert(id.clone(), element.clone());
            element.bind(self.handle.clone());
            previous
        };
        debug!(page_id = %self.id(), element_id = %id, "Bound element");

        if let Some(previous) = previous {
            if !same_element(&previous, &element) && !self.is_attached(&previous) {
                self.close_element(&id, &previous);
            }
        }

        Ok(())
    }

    /// Remove `id` from the element table. Attached elements, and elements
    /// since bound to another page, are released without being closed.
    /// Returns false if nothing was bound under `id`.
    pub fn unbind(&self, id: &str) -> bool {
        let Some(element) = lock(&self.elements).remove(id) else {
            return false;
        };

        if self.is_attached(&element) {
            debug!(page_id = %self.id(), element_id = %id, "Released attached element");
        } else {
            self.close_element(id, &element);
        }
        true
    }

    /// Register a long-lived element that [`Page::resolve`] returns instead
    /// of constructing a new one.
    pub fn attach(&self, element: Arc<dyn Element>) {
        let id = element.id().to_string();
        lock(&self.attached).insert(id, element);
    }

    /// Deregister and close an attached element. Returns false if `element`
    /// was not attached to this page.
    pub fn detach(&self, element: &dyn Element) -> Result<bool> {
        let id = element.id().to_string();
        let removed = {
            let mut attached = lock(&self.attached);
            match attached.get(&id) {
                Some(existing) if same_instance(existing.as_ref(), element) => attached.remove(&id),
                _ => None,
            }
        };

        let Some(removed) = removed else {
            return Ok(false);
        };

        {
            let mut elements = lock(&self.elements);
            if elements
                .get(&id)
                .is_some_and(|bound| same_element(bound, &removed))
            {
                elements.remove(&id);
            }
        }

        removed.close()?;
        Ok(true)
    }

    /// The attached element for `id`, or a new one from the resolver.
    pub fn resolve(&self, id: &str, data: Data) -> Option<Arc<dyn Element>> {
        if let Some(element) = lock(&self.attached).get(id) {
            return Some(element.clone());
        }
        self.resolver.resolve(id, data)
    }

    /// Deliver a client event to the element bound to `id`.
    ///
    /// Events for unknown ids are dropped: the client may still have events
    /// in flight for an element it just unbound.
    pub fn handle(&self, id: &str, event: Value) -> Result<()> {
        let Some(element) = self.element(id) else {
            debug!(page_id = %self.id(), element_id = %id, "Dropping event for unbound element");
            return Ok(());
        };
        element.handle(Event::new(event))
    }

    /// Enqueue a command directly on this page.
    pub fn enqueue(&self, command: Command) -> Result<()> {
        self.handle.enqueue(command)
    }

    /// Decode and dispatch one inbound text message. Malformed messages and
    /// element failures are logged; neither ends the session.
    pub fn process_message(&self, text: &str) {
        let message = match ClientMessage::decode(text) {
            Ok(message) => message,
            Err(e) => {
                warn!(page_id = %self.id(), %e, "Ignoring invalid message");
                return;
            }
        };

        if let Err(e) = self.dispatch(message) {
            warn!(page_id = %self.id(), %e, "Message handling failed");
        }
    }

    /// Dispatch a decoded client message.
    pub fn dispatch(&self, message: ClientMessage) -> Result<()> {
        match message {
            ClientMessage::Bind { id, data } => match self.resolve(&id, data) {
                Some(element) => self.bind(element),
                None => {
                    warn!(page_id = %self.id(), element_id = %id, "Could not resolve element");
                    self.enqueue(Command::error(id, "Could not resolve element!"))
                }
            },
            ClientMessage::Unbind { id } => {
                if self.unbind(&id) {
                    Ok(())
                } else {
                    warn!(page_id = %self.id(), element_id = %id, "Could not unbind element");
                    self.enqueue(Command::error(id, "Could not unbind element!"))
                }
            }
            ClientMessage::Event { id, event } => self.handle(&id, event),
            ClientMessage::Reply { token, values } => {
                if !self.handle.resolve_reply(&token, values) {
                    debug!(page_id = %self.id(), %token, "Reply for unknown token");
                }
                Ok(())
            }
        }
    }

    /// Close every bound element and stop the page. Idempotent.
    ///
    /// A failing element is logged and the sweep continues. Elements that
    /// have been bound to another page in the meantime are left open.
    pub fn close(&self) {
        {
            let mut state = lock(&self.state);
            if *state == PageState::Closed {
                return;
            }
            *state = PageState::Closed;
        }

        let elements: Vec<(String, Arc<dyn Element>)> = lock(&self.elements).drain().collect();
        for (id, element) in &elements {
            self.close_element(id, element);
        }

        self.handle.abandon_replies();
        self.cancel.cancel();
        debug!(page_id = %self.id(), closed = elements.len(), "Page closed");
    }

    /// Run the session over `connection` until it ends.
    ///
    /// `keep_alive` enables the ping loop; intervals below
    /// [`MIN_KEEP_ALIVE`] are clamped. Returns the first transport error,
    /// if any. A page can only be run once.
    pub async fn run<C, E>(&self, connection: C, keep_alive: Option<Duration>) -> Result<()>
    where
        C: Stream<Item = std::result::Result<Frame, E>> + Sink<Frame, Error = E> + Send + 'static,
        E: std::error::Error + Send + Sync + 'static,
    {
        self.start()?;
        let receiver = lock(&self.receiver).take().ok_or(LiveError::InvalidState {
            expected: PageState::Idle.as_str(),
            actual: PageState::Running.as_str(),
        })?;

        info!(page_id = %self.id(), "Page running");

        let (sink, mut stream) = connection.split::<Frame>();

        let writer_stop = CancellationToken::new();
        let writer = tokio::spawn(write_loop(
            sink,
            receiver,
            writer_stop.clone(),
            self.cancel.clone(),
            self.id().to_string(),
        ));

        let keep_alive_stop = self.cancel.child_token();
        let keep_alive = keep_alive.map(|interval| {
            tokio::spawn(keep_alive_loop(
                self.handle.clone(),
                interval.max(MIN_KEEP_ALIVE),
                keep_alive_stop.clone(),
            ))
        });

        let read_result = loop {
            let next = tokio::select! {
                _ = self.cancel.cancelled() => None,
                next = stream.next() => Some(next),
            };

            match next {
                None => break Ok(()),
                Some(None) | Some(Some(Ok(Frame::Close))) => {
                    debug!(page_id = %self.id(), "Connection closed by peer");
                    break Ok(());
                }
                Some(Some(Ok(Frame::Text(text)))) => {
                    trace!(page_id = %self.id(), message = %text, "Read message");
                    self.process_message(&text);
                }
                Some(Some(Ok(Frame::Ping(_) | Frame::Pong(_)))) => {}
                Some(Some(Err(e))) => {
                    warn!(page_id = %self.id(), %e, "Read failed");
                    break Err(LiveError::transport(e));
                }
            }
        };

        keep_alive_stop.cancel();
        if let Some(task) = keep_alive {
            let _ = task.await;
        }

        self.close();

        writer_stop.cancel();
        let write_result = match writer.await {
            Ok(result) => result,
            Err(e) => Err(LiveError::transport(e)),
        };

        info!(page_id = %self.id(), "Page stopped");
        read_result.and(write_result)
    }

    fn start(&self) -> Result<()> {
        let mut state = lock(&self.state);
        if *state != PageState::Idle {
            return Err(LiveError::InvalidState {
                expected: PageState::Idle.as_str(),
                actual: state.as_str(),
            });
        }
        *state = PageState::Running;
        Ok(())
    }

    fn is_attached(&self, element: &Arc<dyn Element>) -> bool {
        lock(&self.attached)
            .get(element.id())
            .is_some_and(|attached| same_element(attached, element))
    }

    /// True unless `element` is currently bound to a different page.
    fn owns(&self, element: &Arc<dyn Element>) -> bool {
        element
            .base()
            .page()
            .is_none_or(|page| page.same_page(&self.handle))
    }

    fn close_element(&self, id: &str, element: &Arc<dyn Element>) {
        if !self.owns(element) {
            debug!(page_id = %self.id(), element_id = %id, "Element moved to another page");
            return;
        }
        if let Err(e) = element.close() {
            warn!(page_id = %self.id(), element_id = %id, %e, "Element close failed");
        }
    }
}

impl Drop for Page {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for Page {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Page")
            .field("id", &self.id())
            .field("state", &self.state())
            .field("elements", &self.bound_ids())
            .finish()
    }
}

fn same_instance(a: &dyn Element, b: &dyn Element) -> bool {
    std::ptr::addr_eq(a, b)
}

fn same_element(a: &Arc<dyn Element>, b: &Arc<dyn Element>) -> bool {
    same_instance(a.as_ref(), b.as_ref())
}

/// Drain the outgoing queue into the sink, flushing whenever the queue runs
/// dry. On stop, whatever is already queued is written before returning.
async fn write_loop<S>(
    mut sink: S,
    mut receiver: mpsc::UnboundedReceiver<Outgoing>,
    stop: CancellationToken,
    page_cancel: CancellationToken,
    page_id: String,
) -> Result<()>
where
    S: Sink<Frame> + Unpin,
    S::Error: std::error::Error + Send + Sync + 'static,
{
    let result = async {
        loop {
            let next = tokio::select! {
                _ = stop.cancelled() => break,
                next = receiver.recv() => next,
            };
            let Some(outgoing) = next else { break };

            write_one(&mut sink, outgoing, &page_id).await?;
            if receiver.is_empty() {
                sink.flush().await.map_err(LiveError::transport)?;
            }
        }

        while let Ok(outgoing) = receiver.try_recv() {
            write_one(&mut sink, outgoing, &page_id).await?;
        }
        sink.flush().await.map_err(LiveError::transport)
    }
    .await;

    if let Err(e) = &result {
        warn!(page_id = %page_id, %e, "Write failed, stopping page");
        page_cancel.cancel();
    }

    let _ = sink.close().await;
    result
}

async fn write_one<S>(sink: &mut S, outgoing: Outgoing, page_id: &str) -> Result<()>
where
    S: Sink<Frame> + Unpin,
    S::Error: std::error::Error + Send + Sync + 'static,
{
    let frame = match outgoing {
        Outgoing::Command(command) => match command.encode() {
            Ok(text) => {
                trace!(page_id = %page_id, verb = command.verb(), "Sending message");
                Frame::Text(text)
            }
            Err(e) => {
                warn!(page_id = %page_id, verb = command.verb(), %e, "Dropping unencodable command");
                return Ok(());
            }
        },
        Outgoing::Ping => Frame::Ping(Vec::new()),
    };
    sink.feed(frame).await.map_err(LiveError::transport)
}

/// Enqueue a ping for every interval in which no command was enqueued.
async fn keep_alive_loop(handle: PageHandle, interval: Duration, stop: CancellationToken) {
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    handle.take_activity();

    loop {
        tokio::select! {
            _ = stop.cancelled() => break,
            _ = ticker.tick() => {
                if !handle.take_activity() && handle.ping().is_err() {
                    break;
                }
            }
        }
    }
}
