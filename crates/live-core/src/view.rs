//! Elements that render their own markup.

use serde_json::Value;

use crate::element::{Element, Event};
use crate::error::Result;
use crate::markup::{attribute_value, data_attribute, fragment, Builder};
use crate::protocol::{Command, Data, Options, CLASS_KEY};

/// Data key holding the fields of the last form submission.
pub const FORM_KEY: &str = "form";

/// An [`Element`] that can render its current state as markup.
///
/// [`View::to_html`] wraps [`View::render`] in a container carrying the
/// element's id, the `live` class and its data as `data-*` attributes, so
/// the client can re-bind the node after it has been replaced.
pub trait View: Element {
    /// Render the inner content. Defaults to the type name.
    fn render(&self, builder: &mut Builder) {
        let class = self
            .base()
            .get(CLASS_KEY)
            .map(|value| attribute_value(&value))
            .unwrap_or_default();
        builder.text(class);
    }

    /// Container element name.
    fn tag_name(&self) -> &str {
        "div"
    }

    fn to_html(&self) -> String {
        let data = self.data();
        fragment(|builder| {
            builder.live_tag(self.tag_name(), self.id(), &data, |builder| {
                self.render(builder)
            })
        })
    }

    /// Re-render and push the result to the client.
    fn refresh(&self) -> Result<()> {
        self.update(&self.to_html())
    }

    fn refresh_with(&self, options: Options) -> Result<()> {
        self.enqueue(Command::update(self.id(), self.to_html()).with_options(options))
    }
}

/// A [`View`] rendered as a `<form>` whose submissions are forwarded to
/// the element.
///
/// Implementors route [`View::to_html`] to [`Form::form_html`] and call
/// [`Form::submit`] from [`Element::handle`].
pub trait Form: View {
    /// `<form method="post">` container with the live attributes and an
    /// `onsubmit` handler that sends the form's fields.
    fn form_html(&self) -> String {
        let data = self.data();
        let mut attributes: Vec<(String, String)> = vec![
            ("method".into(), "post".into()),
            ("id".into(), self.id().to_string()),
            ("class".into(), "live".into()),
            ("onsubmit".into(), self.forward_form_event(None)),
        ];
        attributes.extend(
            data.iter()
                .map(|(key, value)| (data_attribute(key), attribute_value(value))),
        );

        fragment(|builder| builder.tag("form", attributes, |builder| self.render(builder)))
    }

    /// Store the event's form fields under [`FORM_KEY`], replacing the
    /// previous submission.
    fn submit(&self, event: &Event) -> Result<()> {
        let fields: Data = event
            .form_data()
            .into_iter()
            .map(|(name, value)| (name, Value::String(value)))
            .collect();
        self.base().set(FORM_KEY, Value::Object(fields));
        Ok(())
    }

    /// Fields of the last submission; empty before the first one.
    fn submitted(&self) -> Data {
        match self.base().get(FORM_KEY) {
            Some(Value::Object(fields)) => fields,
            _ => Data::new(),
        }
    }
}
