use std::sync::Arc;

use axum::extract::State;
use axum::response::{Html, IntoResponse};

use crate::core::errors::ApiError;
use crate::state::AppState;

const INDEX_HTML: &str = include_str!("../../assets/index.html");

pub async fn index(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, ApiError> {
    let settings = state.config.load_settings()?;
    Ok(Html(render_index(&settings.app.title)))
}

fn render_index(title: &str) -> String {
    INDEX_HTML.replace("{{title}}", &escape_html(title))
}

fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn title_is_escaped_into_the_page() {
        let page = render_index("<b>Demo</b> & co");
        assert!(page.contains("&lt;b&gt;Demo&lt;/b&gt; &amp; co"));
        assert!(!page.contains("{{title}}"));
    }
}
