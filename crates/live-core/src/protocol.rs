//! Live wire protocol.
//!
//! Every message is a JSON array whose first element is a verb tag, followed
//! by positional arguments:
//!
//! ```text
//! client -> server   ["bind", id, data] | ["unbind", id] | ["event", id, payload] | ["reply", token, ...values]
//! server -> client   ["update", id, html, options] | ["replace", selector, html, options] | ...
//! ```
//!
//! Inbound text is decoded into a [`ClientMessage`] before dispatch; outbound
//! updates are built as [`Command`]s and encoded by the page's writer.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::{LiveError, Result};

/// Element attributes, as carried by `data-*` attributes on the client.
///
/// Insertion order is preserved so rendered markup is stable.
pub type Data = serde_json::Map<String, Value>;

/// The key in [`Data`] naming the element's registered type.
pub const CLASS_KEY: &str = "class";

/// A message sent by the client.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    /// Bind client element `id` to a server-side element.
    Bind { id: String, data: Data },
    /// Release element `id`.
    Unbind { id: String },
    /// A DOM event forwarded to the element bound to `id`.
    Event { id: String, event: Value },
    /// Acknowledgement of a command that requested a reply.
    Reply { token: String, values: Vec<Value> },
}

impl ClientMessage {
    /// Decode a single text frame.
    pub fn decode(text: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(text)?;
        Self::from_value(value)
    }

    pub fn from_value(value: Value) -> Result<Self> {
        let Value::Array(items) = value else {
            return Err(LiveError::Protocol("message must be an array".into()));
        };

        let mut items = items.into_iter();
        let verb = match items.next() {
            Some(Value::String(verb)) => verb,
            _ => return Err(LiveError::Protocol("missing verb".into())),
        };

        match verb.as_str() {
            "bind" => {
                let id = expect_id(items.next(), &verb)?;
                let data = match items.next() {
                    Some(Value::Object(data)) => data,
                    None | Some(Value::Null) => Data::new(),
                    Some(other) => {
                        return Err(LiveError::Protocol(format!(
                            "bind data must be an object, got {other}"
                        )));
                    }
                };
                Ok(Self::Bind { id, data })
            }
            "unbind" => Ok(Self::Unbind {
                id: expect_id(items.next(), &verb)?,
            }),
            "event" => {
                let id = expect_id(items.next(), &verb)?;
                let event = items.next().unwrap_or(Value::Null);
                Ok(Self::Event { id, event })
            }
            "reply" => {
                let token = match items.next() {
                    Some(Value::String(token)) => token,
                    Some(Value::Number(token)) => token.to_string(),
                    _ => return Err(LiveError::Protocol("reply requires a token".into())),
                };
                Ok(Self::Reply {
                    token,
                    values: items.collect(),
                })
            }
            other => Err(LiveError::Protocol(format!("unknown verb: {other}"))),
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            Self::Bind { id, data } => json!(["bind", id, data]),
            Self::Unbind { id } => json!(["unbind", id]),
            Self::Event { id, event } => json!(["event", id, event]),
            Self::Reply { token, values } => {
                let mut items = vec![json!("reply"), json!(token)];
                items.extend(values.iter().cloned());
                Value::Array(items)
            }
        }
    }

    pub fn encode(&self) -> String {
        self.to_value().to_string()
    }
}

fn expect_id(value: Option<Value>, verb: &str) -> Result<String> {
    match value {
        Some(Value::String(id)) if !id.is_empty() => Ok(id),
        _ => Err(LiveError::Protocol(format!("{verb} requires an element id"))),
    }
}

/// Per-command options forwarded verbatim to the client.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Options {
    /// When set, the client answers with `["reply", token]` once the
    /// command has been applied to the DOM.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply: Option<String>,

    #[serde(flatten)]
    pub extra: Data,
}

impl Options {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_reply(mut self, token: impl Into<String>) -> Self {
        self.reply = Some(token.into());
        self
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }
}

/// An update command pushed from the server to the client.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Replace the entire contents of node `id`.
    Update { id: String, html: String, options: Options },
    /// Morph every node matching `selector`.
    Replace { selector: String, html: String, options: Options },
    Prepend { selector: String, html: String, options: Options },
    Append { selector: String, html: String, options: Options },
    Remove { selector: String, options: Options },
    /// Fire a custom DOM event on matching nodes.
    DispatchEvent { selector: String, event_type: String, options: Options },
    /// Run `code` in the context of node `id`.
    Script { id: String, code: String, options: Options },
    /// Informational: a bind or unbind for `id` could not be honoured.
    Error { id: String, message: String },
}

impl Command {
    pub fn update(id: impl Into<String>, html: impl Into<String>) -> Self {
        Self::Update {
            id: id.into(),
            html: html.into(),
            options: Options::default(),
        }
    }

    pub fn replace(selector: impl Into<String>, html: impl Into<String>) -> Self {
        Self::Replace {
            selector: selector.into(),
            html: html.into(),
            options: Options::default(),
        }
    }

    pub fn prepend(selector: impl Into<String>, html: impl Into<String>) -> Self {
        Self::Prepend {
            selector: selector.into(),
            html: html.into(),
            options: Options::default(),
        }
    }

    pub fn append(selector: impl Into<String>, html: impl Into<String>) -> Self {
        Self::Append {
            selector: selector.into(),
            html: html.into(),
            options: Options::default(),
        }
    }

    pub fn remove(selector: impl Into<String>) -> Self {
        Self::Remove {
            selector: selector.into(),
            options: Options::default(),
        }
    }

    pub fn dispatch_event(selector: impl Into<String>, event_type: impl Into<String>) -> Self {
        Self::DispatchEvent {
            selector: selector.into(),
            event_type: event_type.into(),
            options: Options::default(),
        }
    }

    pub fn script(id: impl Into<String>, code: impl Into<String>) -> Self {
        Self::Script {
            id: id.into(),
            code: code.into(),
            options: Options::default(),
        }
    }

    pub fn error(id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Error {
            id: id.into(),
            message: message.into(),
        }
    }

    /// The verb tag written as the first array element.
    pub fn verb(&self) -> &'static str {
        match self {
            Self::Update { .. } => "update",
            Self::Replace { .. } => "replace",
            Self::Prepend { .. } => "prepend",
            Self::Append { .. } => "append",
            Self::Remove { .. } => "remove",
            Self::DispatchEvent { .. } => "dispatchEvent",
            Self::Script { .. } => "script",
            Self::Error { .. } => "error",
        }
    }

    pub fn options(&self) -> Option<&Options> {
        match self {
            Self::Update { options, .. }
            | Self::Replace { options, .. }
            | Self::Prepend { options, .. }
            | Self::Append { options, .. }
            | Self::Remove { options, .. }
            | Self::DispatchEvent { options, .. }
            | Self::Script { options, .. } => Some(options),
            Self::Error { .. } => None,
        }
    }

    fn options_mut(&mut self) -> Option<&mut Options> {
        match self {
            Self::Update { options, .. }
            | Self::Replace { options, .. }
            | Self::Prepend { options, .. }
            | Self::Append { options, .. }
            | Self::Remove { options, .. }
            | Self::DispatchEvent { options, .. }
            | Self::Script { options, .. } => Some(options),
            Self::Error { .. } => None,
        }
    }

    /// Replace the command's options. No-op for `error`, which has none.
    pub fn with_options(mut self, new: Options) -> Self {
        if let Some(options) = self.options_mut() {
            *options = new;
        }
        self
    }

    /// Ask the client to acknowledge this command with `token`.
    pub fn with_reply(mut self, token: impl Into<String>) -> Self {
        if let Some(options) = self.options_mut() {
            options.reply = Some(token.into());
        }
        self
    }

    pub fn to_value(&self) -> Value {
        match self {
            Self::Update { id, html, options } => json!([self.verb(), id, html, options]),
            Self::Replace {
                selector,
                html,
                options,
            }
            | Self::Prepend {
                selector,
                html,
                options,
            }
            | Self::Append {
                selector,
                html,
                options,
            } => json!([self.verb(), selector, html, options]),
            Self::Remove { selector, options } => json!([self.verb(), selector, options]),
            Self::DispatchEvent {
                selector,
                event_type,
                options,
            } => json!([self.verb(), selector, event_type, options]),
            Self::Script { id, code, options } => json!([self.verb(), id, code, options]),
            Self::Error { id, message } => json!([self.verb(), id, message]),
        }
    }

    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.to_value())?)
    }
}
