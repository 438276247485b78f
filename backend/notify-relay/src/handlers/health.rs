use crate::broker::BrokerStatus;
use crate::state::AppState;
use actix_web::{web, HttpResponse};
use serde_json::json;

/// GET /health
/// Healthy only while the broker consumer is attached
pub async fn health(state: web::Data<AppState>) -> HttpResponse {
    let status = *state.broker_status.borrow();
    let connections = state.registry.total_connections().await;

    match status {
        BrokerStatus::Connected => HttpResponse::Ok().json(json!({
            "status": "ok",
            "connections": connections,
        })),
        _ => HttpResponse::ServiceUnavailable().json(json!({
            "status": "degraded",
            "broker": format!("{:?}", status).to_lowercase(),
            "connections": connections,
        })),
    }
}
