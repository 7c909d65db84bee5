//! Browser client assets served by the gateway.
//!
//! Uses `rust-embed` to bake the `assets/` directory into the binary.
//! In debug mode (`debug-embed` feature), files are read from disk
//! so you can edit JS/CSS and just refresh the browser.

use std::borrow::Cow;

use axum::{
    extract::Path,
    http::{header, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::get,
    Router,
};
use rust_embed::Embed;
use tracing::debug;

#[derive(Embed)]
#[folder = "assets/"]
struct Assets;

/// Build an axum `Router` that serves the embedded client and demo page.
///
/// Register this **after** the live endpoint and `/health` so those routes
/// take priority over the asset catch-all.
pub fn assets_router() -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route("/{*path}", get(static_handler))
}

/// The embedded browser client, `live.js`.
pub fn client_script() -> Option<Cow<'static, [u8]>> {
    Assets::get("live.js").map(|asset| asset.data)
}

/// Names of all embedded files.
pub fn asset_names() -> Vec<String> {
    Assets::iter().map(|name| name.into_owned()).collect()
}

async fn index_handler() -> impl IntoResponse {
    serve_file("index.html")
}

async fn static_handler(Path(path): Path<String>) -> impl IntoResponse {
    serve_file(&path)
}

fn try_serve_file(path: &str) -> Option<Response> {
    let asset = Assets::get(path)?;
    let mime = mime_guess::from_path(path).first_or_octet_stream();
    Some(
        (
            StatusCode::OK,
            [(header::CONTENT_TYPE, mime.as_ref())],
            asset.data.into_owned(),
        )
            .into_response(),
    )
}

fn serve_file(path: &str) -> Response {
    match try_serve_file(path) {
        Some(response) => response,
        None => {
            debug!(%path, "Asset not found");
            (StatusCode::NOT_FOUND, Html("<h1>404</h1>")).into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_script_embedded() {
        let script = client_script().unwrap();
        let text = std::str::from_utf8(&script).unwrap();
        assert!(text.contains("forwardEvent"));
        assert!(text.contains("'reply'"));
        assert!(text.contains("MAX_DELAY = 60000"));
    }

    #[test]
    fn test_client_script_reconnect_guards() {
        let script = client_script().unwrap();
        let text = std::str::from_utf8(&script).unwrap();
        // Binding messages from a lost connection are not replayed.
        assert!(text.contains("type !== 'bind' && type !== 'unbind'"));
        // Hidden pages neither retry nor reconnect for events.
        assert!(text.contains("if (!this.document.hidden) this.connect();"));
        assert_eq!(text.matches("clearTimeout(this.retry)").count(), 2);
    }

    #[test]
    fn test_demo_page_renders_forms() {
        assert_eq!(try_serve_file("index.html").unwrap().status(), StatusCode::OK);
        let asset = Assets::get("index.html").unwrap();
        let html = std::str::from_utf8(&asset.data).unwrap();
        assert!(html.contains(r#"data-class="Greeter""#));
        assert!(html.contains("live.forwardFormEvent(&quot;greeter&quot;, event)"));
    }

    #[test]
    fn test_asset_names() {
        let names = asset_names();
        assert!(names.contains(&"index.html".to_string()));
        assert!(names.contains(&"live.js".to_string()));
    }

    #[test]
    fn test_content_types() {
        let response = try_serve_file("live.js").unwrap();
        let content_type = response.headers()[header::CONTENT_TYPE].to_str().unwrap();
        assert!(content_type.contains("javascript"));

        assert!(try_serve_file("missing.css").is_none());
        assert_eq!(serve_file("missing.css").status(), StatusCode::NOT_FOUND);
    }
}
