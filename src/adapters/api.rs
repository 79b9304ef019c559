use actix_web::{HttpResponse, Responder, get, post, web};
use serde::Deserialize;

use crate::app::controller::FillAction;
use crate::app::services::{ControllerHandle, FillCommandHandler, ServiceError};
use crate::domain::sequencer::SequencerError;
use crate::domain::station::StationSet;

#[derive(Clone)]
pub struct ApiState {
    pub fill: ControllerHandle,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FillRequestBody {
    pub stations: StationSet,
    pub capacity_liters: f64,
}

pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(health)
        .service(get_fill_state_endpoint)
        .service(request_fill_endpoint)
        .service(confirm_start_endpoint)
        .service(confirm_valve_endpoint)
        .service(cancel_endpoint)
        .service(stop_endpoint)
        .service(acknowledge_endpoint)
        .service(attach_endpoint)
        .service(detach_endpoint);
}

#[get("/health")]
async fn health() -> impl Responder {
    HttpResponse::Ok().json(serde_json::json!({ "status": "ok" }))
}

#[get("/fill/state")]
async fn get_fill_state_endpoint(state: web::Data<ApiState>) -> impl Responder {
    HttpResponse::Ok().json(state.fill.current_view())
}

#[post("/fill/request")]
async fn request_fill_endpoint(
    state: web::Data<ApiState>,
    body: web::Json<FillRequestBody>,
) -> impl Responder {
    let body = body.into_inner();
    if !body.capacity_liters.is_finite() || body.capacity_liters <= 0.0 {
        return HttpResponse::BadRequest().json(serde_json::json!({
            "error": "capacityLiters must be a positive number"
        }));
    }

    execute(
        &state,
        FillAction::Request {
            stations: body.stations,
            capacity_liters: body.capacity_liters,
        },
    )
    .await
}

#[post("/fill/confirm")]
async fn confirm_start_endpoint(state: web::Data<ApiState>) -> impl Responder {
    execute(&state, FillAction::ConfirmStart).await
}

#[post("/fill/confirm-valve")]
async fn confirm_valve_endpoint(state: web::Data<ApiState>) -> impl Responder {
    execute(&state, FillAction::ConfirmValve).await
}

#[post("/fill/cancel")]
async fn cancel_endpoint(state: web::Data<ApiState>) -> impl Responder {
    execute(&state, FillAction::Cancel).await
}

#[post("/fill/stop")]
async fn stop_endpoint(state: web::Data<ApiState>) -> impl Responder {
    execute(&state, FillAction::Stop).await
}

#[post("/fill/acknowledge")]
async fn acknowledge_endpoint(state: web::Data<ApiState>) -> impl Responder {
    execute(&state, FillAction::Acknowledge).await
}

#[post("/fill/attach")]
async fn attach_endpoint(state: web::Data<ApiState>) -> impl Responder {
    execute(&state, FillAction::Attach).await
}

#[post("/fill/detach")]
async fn detach_endpoint(state: web::Data<ApiState>) -> impl Responder {
    execute(&state, FillAction::Detach).await
}

async fn execute(state: &ApiState, action: FillAction) -> HttpResponse {
    match state.fill.execute(action).await {
        Ok(view) => HttpResponse::Ok().json(view),
        Err(error) => service_error_response(error, state),
    }
}

fn service_error_response(error: ServiceError, state: &ApiState) -> HttpResponse {
    let view = state.fill.current_view();
    match error {
        ServiceError::Rejected(SequencerError::Denied(denial)) => {
            HttpResponse::Conflict().json(serde_json::json!({
                "error": denial.to_string(),
                "denial": denial,
                "state": view,
            }))
        }
        ServiceError::Rejected(error) => HttpResponse::Conflict().json(serde_json::json!({
            "error": error.to_string(),
            "state": view,
        })),
        ServiceError::Remote(error) => HttpResponse::BadGateway().json(serde_json::json!({
            "error": format!("remote authority call failed: {error}"),
            "state": view,
        })),
        ServiceError::Unavailable => {
            HttpResponse::ServiceUnavailable().json(serde_json::json!({
                "error": "fill controller is not running"
            }))
        }
    }
}
