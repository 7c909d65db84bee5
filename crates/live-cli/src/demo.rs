//! Demo elements served by `live serve`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::Local;
use tracing::{debug, warn};

use live_core::markup::{fragment, Builder};
use live_core::task::TaskSlot;
use live_core::{
    Command, Data, Element, ElementBase, Event, Form, PageHandle, Resolvable, Resolver, Result,
    View,
};

/// Every demo element the resolver may construct.
pub fn resolver() -> Resolver {
    Resolver::new()
        .allow::<ClickCounter>()
        .allow::<Clock>()
        .allow::<Greeter>()
}

/// Parse a numeric data value; the browser sends dataset entries as strings.
fn data_u64(data: &Data, key: &str) -> Option<u64> {
    match data.get(key)? {
        serde_json::Value::Number(n) => n.as_u64(),
        serde_json::Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

/// A button that counts its clicks.
pub struct ClickCounter {
    base: ElementBase,
    count: AtomicU64,
}

impl Element for ClickCounter {
    fn base(&self) -> &ElementBase {
        &self.base
    }

    fn handle(&self, event: Event) -> Result<()> {
        if event.kind() != Some("click") {
            return Ok(());
        }

        let count = self.count.fetch_add(1, Ordering::SeqCst) + 1;
        self.base.set("count", count);
        self.refresh()
    }
}

impl View for ClickCounter {
    fn render(&self, builder: &mut Builder) {
        let count = self.count.load(Ordering::SeqCst);
        builder.tag("button", [("onclick", self.forward_event(None))], |b| {
            b.text(format!("Clicked {count} times"))
        });
    }
}

impl Resolvable for ClickCounter {
    const CLASS: &'static str = "ClickCounter";

    fn construct(id: String, data: Data) -> Self {
        let count = data_u64(&data, "count").unwrap_or(0);
        Self {
            base: ElementBase::new(id, Self::CLASS, data),
            count: AtomicU64::new(count),
        }
    }
}

/// Shows the server time, refreshed on a timer while bound.
pub struct Clock {
    base: ElementBase,
    interval: Duration,
    ticker: TaskSlot,
}

const DEFAULT_CLOCK_INTERVAL_MS: u64 = 1000;

fn render_clock(id: &str, data: &Data) -> String {
    let now = Local::now();
    fragment(|builder| {
        builder.live_tag("div", id, data, |b| {
            b.tag("time", [("datetime", now.to_rfc3339())], |b| {
                b.text(now.format("%H:%M:%S"))
            });
        })
    })
}

impl Element for Clock {
    fn base(&self) -> &ElementBase {
        &self.base
    }

    /// Starts the ticker on the current Tokio runtime. Outside a runtime
    /// the clock is bound but does not tick.
    fn bind(&self, page: PageHandle) {
        self.base.bind(page);

        let binding = self.base.binding();
        let data = self.data();
        let interval = self.interval;
        let started = self.ticker.spawn(move |stop| async move {
            let id = binding.id().to_string();
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = stop.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = binding.enqueue(Command::update(&id, render_clock(&id, &data))) {
                            debug!(element_id = %id, %e, "Clock orphaned");
                            break;
                        }
                    }
                }
            }
            debug!(element_id = %id, "Clock stopped");
        });

        if !started {
            warn!(element_id = %self.id(), "Clock bound without a runtime");
        }
    }

    fn close(&self) -> Result<()> {
        self.ticker.stop();
        self.base.unbind();
        Ok(())
    }
}

impl View for Clock {
    fn to_html(&self) -> String {
        render_clock(self.id(), &self.data())
    }
}

impl Resolvable for Clock {
    const CLASS: &'static str = "Clock";

    fn construct(id: String, data: Data) -> Self {
        let interval_ms = data_u64(&data, "intervalMs")
            .unwrap_or(DEFAULT_CLOCK_INTERVAL_MS)
            .max(1);
        Self {
            base: ElementBase::new(id, Self::CLASS, data),
            interval: Duration::from_millis(interval_ms),
            ticker: TaskSlot::new(),
        }
    }
}

/// Asks for a name and greets whoever submitted it.
pub struct Greeter {
    base: ElementBase,
}

impl Element for Greeter {
    fn base(&self) -> &ElementBase {
        &self.base
    }

    fn handle(&self, event: Event) -> Result<()> {
        if event.kind() != Some("submit") {
            return Ok(());
        }
        self.submit(&event)?;
        self.refresh()
    }
}

impl View for Greeter {
    fn render(&self, builder: &mut Builder) {
        builder.void_tag("input", [("name", "name"), ("placeholder", "Your name")]);
        builder.tag("button", [("type", "submit")], |b| b.text("Greet"));

        if let Some(name) = self.submitted().get("name").and_then(|v| v.as_str()) {
            builder.tag("p", [("class", "greeting")], |b| {
                b.text(format!("Hello, {name}!"))
            });
        }
    }

    fn to_html(&self) -> String {
        self.form_html()
    }
}

impl Form for Greeter {}

impl Resolvable for Greeter {
    const CLASS: &'static str = "Greeter";

    fn construct(id: String, data: Data) -> Self {
        Self {
            base: ElementBase::new(id, Self::CLASS, data),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use live_core::connection::local;
    use live_core::Page;

    use super::*;

    fn data(pairs: &[(&str, serde_json::Value)]) -> Data {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_resolver_allows_demo_elements() {
        let resolver = resolver();
        assert_eq!(resolver.classes(), vec!["ClickCounter", "Clock", "Greeter"]);
    }

    #[test]
    fn test_counter_starts_from_data() {
        let counter = ClickCounter::construct("c".into(), data(&[("count", json!("41"))]));
        assert_eq!(counter.count.load(Ordering::SeqCst), 41);
        assert!(counter.to_html().contains("Clicked 41 times"));
        assert!(counter.to_html().contains(r#"onclick="live.forwardEvent(&quot;c&quot;, event)""#));
    }

    #[tokio::test]
    async fn test_counter_click_refreshes() {
        let page = Arc::new(Page::new(resolver().freeze()));
        let (conn, mut peer) = local();
        let running = page.clone();
        let task = tokio::spawn(async move { running.run(conn, None).await });

        peer.send_text(r#"["bind","c",{"class":"ClickCounter"}]"#);
        peer.send_text(r#"["event","c",{"type":"mouseover"}]"#);
        peer.send_text(r#"["event","c",{"type":"click"}]"#);

        let message: serde_json::Value =
            serde_json::from_str(&peer.recv_text().await.unwrap()).unwrap();
        assert_eq!(message[0], "update");
        assert_eq!(message[1], "c");
        assert!(message[2].as_str().unwrap().contains("Clicked 1 times"));

        peer.hang_up();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_clock_ticks_until_closed() {
        let page = Arc::new(Page::new(resolver().freeze()));
        let (conn, mut peer) = local();
        let running = page.clone();
        let task = tokio::spawn(async move { running.run(conn, None).await });

        peer.send_text(r#"["bind","clock",{"class":"Clock","intervalMs":"5"}]"#);
        for _ in 0..2 {
            let text = peer.recv_text().await.unwrap();
            assert!(text.starts_with(r#"["update","clock","<div id=\"clock\""#));
            assert!(text.contains("<time datetime="));
        }

        page.cancel();
        task.await.unwrap().unwrap();
    }

    #[test]
    fn test_clock_bind_without_runtime() {
        let page = Page::new(resolver().freeze());
        let clock = Arc::new(Clock::construct("clock".into(), Data::new()));
        page.bind(clock.clone()).unwrap();

        assert!(clock.is_bound());
        assert!(!clock.ticker.is_running());
    }

    #[tokio::test]
    async fn test_orphaned_clock_stops_itself() {
        let page = Page::new(resolver().freeze());
        let clock = Arc::new(Clock::construct(
            "clock".into(),
            data(&[("intervalMs", json!(1))]),
        ));
        page.bind(clock.clone()).unwrap();
        assert!(clock.ticker.is_running());

        // Released without close: the next tick hits NotBound and exits.
        clock.base.unbind();
        tokio::time::timeout(Duration::from_secs(2), async {
            while clock.ticker.is_running() {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .expect("ticker kept running after its element was released");
    }

    #[tokio::test]
    async fn test_greeter_submit_refreshes() {
        let page = Arc::new(Page::new(resolver().freeze()));
        let (conn, mut peer) = local();
        let running = page.clone();
        let task = tokio::spawn(async move { running.run(conn, None).await });

        peer.send_text(r#"["bind","hi",{"class":"Greeter"}]"#);
        peer.send_text(r#"["event","hi",{"type":"submit","formData":[["name","<Ada>"]]}]"#);

        let message: serde_json::Value =
            serde_json::from_str(&peer.recv_text().await.unwrap()).unwrap();
        assert_eq!(message[0], "update");
        let html = message[2].as_str().unwrap();
        assert!(html.starts_with(r#"<form method="post" id="hi" class="live""#));
        assert!(html.contains("Hello, &lt;Ada&gt;!"));

        peer.hang_up();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_clock_close_stops_ticker() {
        let page = Page::new(resolver().freeze());
        let clock = Arc::new(Clock::construct("clock".into(), Data::new()));
        page.bind(clock.clone()).unwrap();
        assert!(clock.ticker.is_running());

        clock.close().unwrap();
        assert!(!clock.ticker.is_running());
        assert!(!clock.is_bound());
    }
}
