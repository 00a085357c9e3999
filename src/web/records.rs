//! REST control plane
//!
//! Authenticated CRUD endpoints that translate JSON payloads into record
//! store calls. Mutating endpoints only accept owner names under the
//! configured SOA domains; the server refuses to manage records for zones
//! it does not own.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::rejection::JsonRejection,
    extract::{ConnectInfo, Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

use super::auth::ApiError;
use crate::db::{Database, NewRecord, StoreError, StoredRecord};
use crate::dns::authority::SoaSet;
use crate::dns::message::{RecordData, RecordKind};

#[derive(Clone)]
pub struct ApiState {
    pub db: Arc<Database>,
    pub soa: Arc<SoaSet>,
    /// Attach internal error detail to responses (development only)
    pub display_tracebacks: bool,
}

/// Body for A record writes
#[derive(Debug, Deserialize)]
pub struct AddressPayload {
    pub address: String,
    #[serde(default)]
    pub ttl: Option<u32>,
}

/// Body for CNAME record writes
#[derive(Debug, Deserialize)]
pub struct AliasPayload {
    pub alias: String,
    #[serde(default)]
    pub ttl: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct ARecordView {
    pub hostname: String,
    pub address: String,
    pub modified: String,
}

#[derive(Debug, Serialize)]
pub struct CnameRecordView {
    pub hostname: String,
    pub alias: String,
    pub modified: String,
}

pub fn records_router(state: ApiState) -> Router {
    Router::new()
        .route("/ip4", get(echo_ip4))
        .route(
            "/hostname/a/:name",
            get(get_a_records).delete(delete_a_records),
        )
        .route("/create/a/:name", post(create_a_record))
        .route("/update/a/:name", put(update_a_record))
        .route("/upsert/a/:name", put(upsert_a_record))
        .route("/hostname/cname/:name", get(get_cname_records))
        .route("/create/cname/:name", post(create_cname_record))
        .with_state(state)
}

/// GET /ip4 - echo the caller's address, used by dynamic-IP clients
async fn echo_ip4(ConnectInfo(addr): ConnectInfo<SocketAddr>) -> impl IntoResponse {
    Json(json!({ "address": addr.ip().to_string() }))
}

/// GET /hostname/a/{name} - list A records; empty list when none exist
async fn get_a_records(
    State(state): State<ApiState>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let records = state
        .db
        .records()
        .get_record_by_hostname(&name, RecordKind::A)
        .await
        .map_err(|e| store_error(&state, e))?;

    let views: Vec<ARecordView> = records
        .iter()
        .filter_map(|r| match &r.data {
            RecordData::A(ip) => Some(ARecordView {
                hostname: r.fqdn.clone(),
                address: ip.to_string(),
                modified: modified_stamp(r),
            }),
            _ => None,
        })
        .collect();

    Ok(Json(views))
}

/// POST /create/a/{name} - always inserts a new row
async fn create_a_record(
    State(state): State<ApiState>,
    Path(name): Path<String>,
    payload: Result<Json<AddressPayload>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(payload) = payload.map_err(bad_json)?;
    ensure_soa_domain(&state, &name)?;
    let record = a_record_from(&payload)?;

    state
        .db
        .records()
        .create_record(&record, &name)
        .await
        .map_err(|e| store_error(&state, e))?;

    info!("created A record {} -> {}", name, payload.address);
    Ok((StatusCode::CREATED, Json(json!({ "success": true }))))
}

/// PUT /update/a/{name} - update existing rows; 404 when none match
async fn update_a_record(
    State(state): State<ApiState>,
    Path(name): Path<String>,
    payload: Result<Json<AddressPayload>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(payload) = payload.map_err(bad_json)?;
    ensure_soa_domain(&state, &name)?;
    let record = a_record_from(&payload)?;

    let modified = state
        .db
        .records()
        .update_record(&record, &name)
        .await
        .map_err(|e| store_error(&state, e))?;

    if modified == 0 {
        return Err(ApiError::not_found("No matching record"));
    }

    info!("updated {} A record(s) for {}", modified, name);
    Ok((
        StatusCode::OK,
        Json(json!({ "success": true, "updated": true })),
    ))
}

/// PUT /upsert/a/{name} - update when present, create otherwise
async fn upsert_a_record(
    State(state): State<ApiState>,
    Path(name): Path<String>,
    payload: Result<Json<AddressPayload>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(payload) = payload.map_err(bad_json)?;
    ensure_soa_domain(&state, &name)?;
    let record = a_record_from(&payload)?;

    let modified = state
        .db
        .records()
        .update_record(&record, &name)
        .await
        .map_err(|e| store_error(&state, e))?;

    if modified > 0 {
        info!("upsert updated {} A record(s) for {}", modified, name);
        return Ok((
            StatusCode::OK,
            Json(json!({ "success": true, "updated": true })),
        ));
    }

    state
        .db
        .records()
        .create_record(&record, &name)
        .await
        .map_err(|e| store_error(&state, e))?;

    info!("upsert created A record {} -> {}", name, payload.address);
    Ok((
        StatusCode::CREATED,
        Json(json!({ "success": true, "created": true })),
    ))
}

/// DELETE /hostname/a/{name} - remove all A rows; 404 when none existed
async fn delete_a_records(
    State(state): State<ApiState>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    ensure_soa_domain(&state, &name)?;

    let deleted = state
        .db
        .records()
        .delete_record_by_hostname(&name, RecordKind::A)
        .await
        .map_err(|e| store_error(&state, e))?;

    let status = if deleted > 0 {
        StatusCode::OK
    } else {
        StatusCode::NOT_FOUND
    };
    info!("deleted {} A record(s) for {}", deleted, name);
    Ok((
        status,
        Json(json!({ "deleted": deleted, "success": deleted > 0 })),
    ))
}

/// GET /hostname/cname/{name} - list CNAME records by owner name
async fn get_cname_records(
    State(state): State<ApiState>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let records = state
        .db
        .records()
        .get_record_by_hostname(&name, RecordKind::CNAME)
        .await
        .map_err(|e| store_error(&state, e))?;

    let views: Vec<CnameRecordView> = records
        .iter()
        .filter_map(|r| match &r.data {
            RecordData::CNAME(alias) => Some(CnameRecordView {
                hostname: r.fqdn.clone(),
                alias: alias.clone(),
                modified: modified_stamp(r),
            }),
            _ => None,
        })
        .collect();

    Ok(Json(views))
}

/// POST /create/cname/{name} - always inserts a new row
async fn create_cname_record(
    State(state): State<ApiState>,
    Path(name): Path<String>,
    payload: Result<Json<AliasPayload>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(payload) = payload.map_err(bad_json)?;
    ensure_soa_domain(&state, &name)?;

    let record = NewRecord::new(
        RecordData::CNAME(payload.alias.clone()),
        payload.ttl.unwrap_or(0),
    );
    state
        .db
        .records()
        .create_record(&record, &name)
        .await
        .map_err(|e| store_error(&state, e))?;

    info!("created CNAME record {} -> {}", name, payload.alias);
    Ok((StatusCode::CREATED, Json(json!({ "success": true }))))
}

/// Mutations only apply to zones the server owns. Names with fewer than two
/// labels are rejected outright.
fn ensure_soa_domain(state: &ApiState, name: &str) -> Result<(), ApiError> {
    let labels = name.split('.').filter(|l| !l.is_empty()).count();
    if labels < 2 || !state.soa.contains_name(name) {
        return Err(ApiError::bad_request("Not a SOA domain"));
    }
    Ok(())
}

fn a_record_from(payload: &AddressPayload) -> Result<NewRecord, ApiError> {
    let address = payload
        .address
        .parse()
        .map_err(|_| ApiError::bad_request("Invalid IPv4 address"))?;
    Ok(NewRecord::new(
        RecordData::A(address),
        payload.ttl.unwrap_or(0),
    ))
}

fn bad_json(rejection: JsonRejection) -> ApiError {
    ApiError::bad_request("Bad JSON Body").with_detail(Some(rejection.to_string()))
}

fn modified_stamp(record: &StoredRecord) -> String {
    record.updated_at.to_rfc3339()
}

fn store_error(state: &ApiState, error: StoreError) -> ApiError {
    let detail = state.display_tracebacks.then(|| error.to_string());
    match error {
        StoreError::InvalidKind(_) | StoreError::InvalidValue(_) => {
            ApiError::bad_request("Invalid Request").with_detail(detail)
        }
        StoreError::Unavailable(_) => {
            ApiError::server_error("Storage Unavailable").with_detail(detail)
        }
        StoreError::Backend(_) => ApiError::server_error("Server Error").with_detail(detail),
    }
}
