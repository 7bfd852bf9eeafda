use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    routing::{get, patch, post},
    Json, Router,
};
use leadrelay_core::domain::lead::{Lead, LeadId};
use leadrelay_core::errors::ApplicationError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::app::{json_body, ApiResult, AppState};
use crate::intake::{ManualEvent, ManualLead};

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateLeadRequest {
    pub full_name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateStageRequest {
    pub stage: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetaEventRequest {
    pub event_name: Option<String>,
    pub event_id: Option<String>,
    pub user_data: Option<Map<String, Value>>,
    pub custom_data: Option<Map<String, Value>>,
    pub lead_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct DataResponse<T> {
    pub data: T,
}

#[derive(Debug, Serialize)]
pub struct StageResponse {
    pub data: Lead,
    pub meta: Option<Value>,
}

#[derive(Debug, Serialize)]
pub struct MetaEventResponse {
    pub ok: bool,
    pub meta: Value,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/leads", get(list_leads).post(create_lead))
        .route("/leads/{id}", patch(update_stage))
        .route("/events/meta", post(send_meta_event))
        .with_state(state)
}

pub async fn list_leads(State(state): State<AppState>) -> ApiResult<Json<DataResponse<Vec<Lead>>>> {
    let data = state
        .intake
        .store()
        .list_leads()
        .await
        .map_err(|error| state.failure(ApplicationError::Persistence(error.to_string())))?;
    Ok(Json(DataResponse { data }))
}

pub async fn create_lead(
    State(state): State<AppState>,
    payload: Result<Json<CreateLeadRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<DataResponse<Lead>>)> {
    let request = json_body(payload)?;
    let lead = state
        .intake
        .create_manual_lead(ManualLead {
            full_name: request.full_name,
            email: request.email,
            phone: request.phone,
        })
        .await
        .map_err(|error| state.failure(error))?;
    Ok((StatusCode::CREATED, Json(DataResponse { data: lead })))
}

pub async fn update_stage(
    State(state): State<AppState>,
    Path(id): Path<String>,
    payload: Result<Json<UpdateStageRequest>, JsonRejection>,
) -> ApiResult<Json<StageResponse>> {
    let request = json_body(payload)?;
    let change = state
        .intake
        .change_stage(&LeadId(id), request.stage.as_deref())
        .await
        .map_err(|error| state.failure(error))?;
    Ok(Json(StageResponse { data: change.lead, meta: change.meta }))
}

pub async fn send_meta_event(
    State(state): State<AppState>,
    payload: Result<Json<MetaEventRequest>, JsonRejection>,
) -> ApiResult<Json<MetaEventResponse>> {
    let request = json_body(payload)?;
    let meta = state
        .intake
        .send_manual_event(ManualEvent {
            event_name: request.event_name,
            event_id: request.event_id,
            user_data: request.user_data,
            custom_data: request.custom_data,
            lead_id: request.lead_id,
        })
        .await
        .map_err(|error| state.failure(error))?;
    Ok(Json(MetaEventResponse { ok: true, meta }))
}
