//! Prometheus metrics recording and endpoint.

use std::sync::OnceLock;

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

static HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the Prometheus metrics recorder. Only the first call installs;
/// later calls return the existing handle.
pub fn install_prometheus_recorder() -> anyhow::Result<PrometheusHandle> {
    if let Some(handle) = HANDLE.get() {
        return Ok(handle.clone());
    }
    let handle = PrometheusBuilder::new().install_recorder()?;
    Ok(HANDLE.get_or_init(|| handle).clone())
}

/// Render the current metrics, if a recorder is installed.
pub fn render() -> Option<String> {
    HANDLE.get().map(PrometheusHandle::render)
}

pub fn record_page_open() {
    metrics::gauge!("live_pages_active").increment(1.0);
    metrics::counter!("live_pages_total").increment(1);
}

pub fn record_page_close() {
    metrics::gauge!("live_pages_active").decrement(1.0);
}

pub fn record_message_in() {
    metrics::counter!("live_messages_total", "direction" => "in").increment(1);
}

pub fn record_message_out() {
    metrics::counter!("live_messages_total", "direction" => "out").increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_install_is_idempotent() {
        let first = install_prometheus_recorder().unwrap();
        let second = install_prometheus_recorder().unwrap();
        record_page_open();
        record_message_in();
        record_message_out();
        record_page_close();
        assert!(first.render().contains("live_pages_total"));
        assert_eq!(first.render(), second.render());
        assert!(render().is_some());
    }
}
