use crate::state::AppState;
use actix_web::http::header::ContentType;
use actix_web::{web, HttpRequest, HttpResponse};

const HOST_PLACEHOLDER: &str = "{{host}}";

/// GET /
/// Informational page pointing at this instance's WebSocket endpoint
pub async fn index(req: HttpRequest, state: web::Data<AppState>) -> HttpResponse {
    let info = req.connection_info();
    let page = render(&state.index_template, info.host());

    HttpResponse::Ok()
        .content_type(ContentType::html())
        .body(page)
}

fn render(template: &str, host: &str) -> String {
    template.replace(HOST_PLACEHOLDER, &escape_html(host))
}

// Host comes straight from the request headers
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
