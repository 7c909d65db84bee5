//! Minimal HTML fragment builder with attribute and text escaping.
//!
//! Views render into a [`Builder`]; anything richer (templates, components)
//! can produce a string and hand it over with [`Builder::raw`].

use std::fmt::Write as _;

use serde_json::Value;

use crate::protocol::Data;

/// Escape text for use in HTML content or a double-quoted attribute.
pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(ch),
        }
    }
    out
}

/// Render a fragment with a fresh builder.
pub fn fragment(content: impl FnOnce(&mut Builder)) -> String {
    let mut builder = Builder::new();
    content(&mut builder);
    builder.into_string()
}

/// Text form of a data value as it appears in a `data-*` attribute.
pub fn attribute_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Attribute name for a dataset key: `intervalMs` becomes `data-interval-ms`,
/// the inverse of the browser's `dataset` mapping.
pub fn data_attribute(key: &str) -> String {
    let mut name = String::with_capacity(key.len() + 8);
    name.push_str("data-");
    for ch in key.chars() {
        if ch.is_ascii_uppercase() {
            name.push('-');
            name.push(ch.to_ascii_lowercase());
        } else {
            name.push(ch);
        }
    }
    name
}

#[derive(Debug, Default)]
pub struct Builder {
    output: String,
}

impl Builder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Write `<name attrs>content</name>`.
    pub fn tag<I, K, V>(&mut self, name: &str, attributes: I, content: impl FnOnce(&mut Builder))
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        self.open(name, attributes);
        content(self);
        let _ = write!(self.output, "</{name}>");
    }

    /// Write a void element such as `<img>` or `<input>`.
    pub fn void_tag<I, K, V>(&mut self, name: &str, attributes: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        self.open(name, attributes);
    }

    /// Write the container for a live element: `id`, `class="live"` and
    /// one `data-*` attribute per data entry.
    pub fn live_tag(
        &mut self,
        name: &str,
        id: &str,
        data: &Data,
        content: impl FnOnce(&mut Builder),
    ) {
        let mut attributes: Vec<(String, String)> = vec![
            ("id".into(), id.to_string()),
            ("class".into(), "live".into()),
        ];
        attributes.extend(
            data.iter()
                .map(|(key, value)| (data_attribute(key), attribute_value(value))),
        );
        self.tag(name, attributes, content);
    }

    pub fn text(&mut self, text: impl std::fmt::Display) {
        self.output.push_str(&escape(&text.to_string()));
    }

    /// Append pre-rendered markup without escaping.
    pub fn raw(&mut self, html: &str) {
        self.output.push_str(html);
    }

    pub fn into_string(self) -> String {
        self.output
    }

    fn open<I, K, V>(&mut self, name: &str, attributes: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        self.output.push('<');
        self.output.push_str(name);
        for (key, value) in attributes {
            let _ = write!(
                self.output,
                " {}=\"{}\"",
                key.as_ref(),
                escape(value.as_ref())
            );
        }
        self.output.push('>');
    }
}
