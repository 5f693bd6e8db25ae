//! Access detail HTTP handlers

use axum::{
    extract::{Path, State},
    http::header,
    response::{IntoResponse, Redirect},
    Json,
};

use crate::domain::lab::LabId;
use crate::domain::types::LaunchKind;
use crate::service::presenter::{launch_url, AccessView, VmAccessView};
use crate::{AppState, Error, Result};

/// Credentials of a lab, `null` while it has none
pub async fn get_access(
    State(state): State<AppState>,
    Path(id): Path<LabId>,
) -> Result<Json<Option<AccessView>>> {
    let lab = state.store.get_lab(id).await?;
    Ok(Json(AccessView::from_lab(&lab)))
}

/// VPN profile as a file download
pub async fn download_vpn_config(
    State(state): State<AppState>,
    Path(id): Path<LabId>,
) -> Result<impl IntoResponse> {
    let lab = state.store.get_lab(id).await?;
    let vpn = AccessView::from_lab(&lab)
        .and_then(|view| view.vpn)
        .ok_or_else(|| Error::invalid_state("running", lab.status.as_str()))?;

    Ok((
        [
            (header::CONTENT_TYPE, "application/x-openvpn-profile".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", vpn.filename),
            ),
        ],
        vpn.config,
    ))
}

/// Terminal and remote desktop launch actions
pub async fn get_vm_access(
    State(state): State<AppState>,
    Path(id): Path<LabId>,
) -> Result<Json<VmAccessView>> {
    let lab = state.store.get_lab(id).await?;
    Ok(Json(VmAccessView::from_lab(&lab, &state.config.launch_base_url)))
}

async fn launch(state: &AppState, id: LabId, vm: &str, kind: LaunchKind) -> Result<Redirect> {
    let lab = state.store.get_lab(id).await?;
    let url = launch_url(&lab, vm, kind, &state.config.launch_base_url)?;
    Ok(Redirect::to(&url))
}

/// Open a web terminal on a VM
pub async fn launch_terminal(
    State(state): State<AppState>,
    Path((id, vm)): Path<(LabId, String)>,
) -> Result<Redirect> {
    launch(&state, id, &vm, LaunchKind::Terminal).await
}

/// Open a remote desktop session on a VM
pub async fn launch_rdp(
    State(state): State<AppState>,
    Path((id, vm)): Path<(LabId, String)>,
) -> Result<Redirect> {
    launch(&state, id, &vm, LaunchKind::Rdp).await
}
