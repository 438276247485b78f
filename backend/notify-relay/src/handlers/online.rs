use crate::state::AppState;
use actix_web::{web, HttpResponse};

/// GET /online
/// JSON array of uids with at least one live session
pub async fn online(state: web::Data<AppState>) -> HttpResponse {
    let uids = state.registry.online_identities().await;
    HttpResponse::Ok().json(uids)
}
