/// HTTP surface of the relay
pub mod health;
pub mod index;
pub mod online;
pub mod ws;

use actix_web::web;

pub use health::health;
pub use index::index;
pub use online::online;
pub use ws::ws_handler;

/// Mount every route; expects `web::Data<AppState>` on the app
pub fn register_routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/", web::get().to(index))
        .route("/online", web::get().to(online))
        .route("/health", web::get().to(health))
        .route("/ws", web::get().to(ws_handler));
}
