//! Lab HTTP handlers

use axum::{
    extract::{Path, Query, State},
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::domain::lab::{CreateLabParams, Lab, LabId, LabStatus, VmSpec};
use crate::{AppState, Error, Result};

/// Create lab request
#[derive(Debug, Deserialize)]
pub struct CreateLabRequest {
    pub name: String,
    #[serde(default = "default_duration_hours")]
    pub duration_hours: i64,
    pub vms: Vec<VmSpec>,
}

fn default_duration_hours() -> i64 {
    2
}

/// Extend lab request
#[derive(Debug, Deserialize)]
pub struct ExtendLabRequest {
    pub hours: i64,
}

/// Lab response
#[derive(Debug, Serialize)]
pub struct LabResponse {
    #[serde(flatten)]
    pub lab: Lab,
    /// Past its expiry time; the lab keeps running regardless
    pub expired: bool,
}

impl From<Lab> for LabResponse {
    fn from(lab: Lab) -> Self {
        let expired = lab.is_expired(Utc::now());
        Self { lab, expired }
    }
}

/// List labs response
#[derive(Debug, Serialize)]
pub struct ListLabsResponse {
    pub labs: Vec<LabResponse>,
    pub total: usize,
}

/// List query parameters
#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub status: Option<String>,
    /// Fetch from the provisioning backend first (default) or serve the local copy
    pub refresh: Option<bool>,
}

/// List labs
pub async fn list_labs(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<ListLabsResponse>> {
    let status_filter = match query.status {
        Some(s) => Some(
            LabStatus::from_str(&s)
                .ok_or_else(|| Error::InvalidArgument(format!("unknown lab status: {}", s)))?,
        ),
        None => None,
    };

    let labs = if query.refresh.unwrap_or(true) {
        state
            .store
            .list_labs()
            .await?
            .into_iter()
            .filter(|lab| status_filter.map_or(true, |s| lab.status == s))
            .collect()
    } else {
        state.store.labs(status_filter).await
    };

    let total = labs.len();
    Ok(Json(ListLabsResponse {
        labs: labs.into_iter().map(LabResponse::from).collect(),
        total,
    }))
}

/// Request a new lab
pub async fn create_lab(
    State(state): State<AppState>,
    Json(req): Json<CreateLabRequest>,
) -> Result<Json<LabResponse>> {
    let params = CreateLabParams {
        name: req.name,
        duration_hours: req.duration_hours,
        vms: req.vms,
    };

    let lab = state.store.create_lab(params).await?;
    Ok(Json(lab.into()))
}

/// Get a lab by ID
pub async fn get_lab(
    State(state): State<AppState>,
    Path(id): Path<LabId>,
) -> Result<Json<LabResponse>> {
    let lab = state.store.get_lab(id).await?;
    Ok(Json(lab.into()))
}

/// Stop a running lab
pub async fn stop_lab(
    State(state): State<AppState>,
    Path(id): Path<LabId>,
) -> Result<Json<LabResponse>> {
    let lab = state.store.stop_lab(id).await?;
    Ok(Json(lab.into()))
}

/// Remove a stopped or failed lab
pub async fn delete_lab(
    State(state): State<AppState>,
    Path(id): Path<LabId>,
) -> Result<Json<LabResponse>> {
    let lab = state.store.delete_lab(id).await?;
    Ok(Json(lab.into()))
}

/// Extend a running lab
pub async fn extend_lab(
    State(state): State<AppState>,
    Path(id): Path<LabId>,
    Json(req): Json<ExtendLabRequest>,
) -> Result<Json<LabResponse>> {
    let lab = state.store.extend_lab(id, req.hours).await?;
    Ok(Json(lab.into()))
}
