//! Route handlers.

use axum::{
    Json,
    extract::{Query, State, rejection::JsonRejection, rejection::QueryRejection},
    response::{Html, IntoResponse},
};
use serde::Deserialize;
use serde_json::json;
use std::collections::BTreeMap;
use std::path::Path;

use super::AppState;
use super::error::ApiError;
use super::guard::{Access, resolve_safe_path};
use super::usage::{self, ResourceUsage, RootEnvironment};
use super::validate::validate_content;
use crate::profile::{Profile, ProfileOutcome, apply_profile};
use crate::store::{Setting, SettingKind, SettingValue};

/// Files the UI offers in its editor.
pub const EDITABLE_FILES: [&str; 6] = [
    "target.txt",
    "security_patch.txt",
    "spoof_build_vars",
    "app_config",
    "drm_fix",
    "templates.json",
];

type ApiResult = Result<Json<serde_json::Value>, ApiError>;

fn body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    payload
        .map(|Json(value)| value)
        .map_err(|e| ApiError::Validation(e.body_text()))
}

/// Serve the main HTML page
pub async fn serve_index() -> impl IntoResponse {
    Html(include_str!("index.html"))
}

pub async fn not_found() -> ApiError {
    ApiError::NotFound
}

/// Settings snapshot plus what the UI needs to render its tabs.
pub async fn get_config(State(state): State<AppState>) -> ApiResult {
    let guard = state.shared.lock().await?;
    let settings = guard.store.snapshot()?;
    let keybox_count = guard.keyboxes.enabled_count()?;
    let profiles: Vec<&str> = Profile::ALL.iter().map(|p| p.name()).collect();

    Ok(Json(json!({
        "settings": settings,
        "files": EDITABLE_FILES,
        "keybox_count": keybox_count,
        "profiles": profiles,
    })))
}

#[derive(Debug, Deserialize)]
pub struct SetConfigRequest {
    setting: String,
    value: SettingValue,
}

/// Set one setting.
pub async fn set_config(
    State(state): State<AppState>,
    payload: Result<Json<SetConfigRequest>, JsonRejection>,
) -> ApiResult {
    let request = body(payload)?;
    let setting: Setting = request.setting.parse()?;
    let value = match (setting.kind(), request.value) {
        (SettingKind::Flag, SettingValue::Text(raw)) => SettingValue::parse_for(setting, &raw)?,
        (_, value) => value,
    };
    if let SettingValue::Text(text) = &value {
        validate_content(setting.file_name(), text).map_err(ApiError::Validation)?;
    }

    let guard = state.shared.lock().await?;
    guard.store.set(setting, &value)?;
    tracing::info!(setting = %setting, value = %value, "setting updated");

    Ok(Json(json!({ "setting": setting, "value": guard.store.get(setting)? })))
}

/// The static profile table.
pub async fn get_profiles() -> Json<serde_json::Value> {
    let profiles: Vec<serde_json::Value> = Profile::ALL
        .iter()
        .map(|profile| {
            let settings: BTreeMap<Setting, bool> = profile.entries().into_iter().collect();
            json!({ "name": profile.name(), "settings": settings })
        })
        .collect();
    Json(json!({ "profiles": profiles }))
}

#[derive(Debug, Deserialize)]
pub struct ApplyProfileRequest {
    profile: String,
}

/// Apply a profile directly.
pub async fn apply_profile_handler(
    State(state): State<AppState>,
    payload: Result<Json<ApplyProfileRequest>, JsonRejection>,
) -> ApiResult {
    let request = body(payload)?;
    let guard = state.shared.lock().await?;
    match apply_profile(&guard.store, &request.profile)? {
        ProfileOutcome::Applied(profile) => Ok(Json(json!({
            "applied": profile.name(),
            "settings": guard.store.snapshot()?,
        }))),
        ProfileOutcome::Unknown => Err(ApiError::Validation("unknown profile".to_string())),
    }
}

#[derive(Debug, Deserialize)]
pub struct FileQuery {
    filename: String,
}

fn file_name_of(path: &Path) -> &str {
    path.file_name().and_then(|n| n.to_str()).unwrap_or("")
}

/// Read a file from the config directory.
pub async fn get_file(
    State(state): State<AppState>,
    query: Result<Query<FileQuery>, QueryRejection>,
) -> ApiResult {
    let Query(query) = query.map_err(|e| ApiError::Validation(e.body_text()))?;
    let guard = state.shared.lock().await?;
    let path = resolve_safe_path(&state.base, &query.filename, Access::Read)?;
    let content = guard.store.read_file(&path)?;
    Ok(Json(json!({ "content": content })))
}

#[derive(Debug, Deserialize)]
pub struct SaveFileRequest {
    filename: String,
    content: String,
}

/// Write a file in the config directory.
pub async fn save_file(
    State(state): State<AppState>,
    payload: Result<Json<SaveFileRequest>, JsonRejection>,
) -> ApiResult {
    let request = body(payload)?;
    let guard = state.shared.lock().await?;
    let path = resolve_safe_path(&state.base, &request.filename, Access::Write)?;
    validate_content(file_name_of(&path), &request.content).map_err(ApiError::Validation)?;
    guard.store.write_file(&path, &request.content)?;
    tracing::info!(file = %file_name_of(&path), bytes = request.content.len(), "file saved");
    Ok(Json(json!({ "saved": true })))
}

/// Memory, CPU and feature flags of the running daemon.
pub async fn resource_usage(State(state): State<AppState>) -> ApiResult {
    let (keybox_count, global_mode, rkp_bypass, tee_broken_mode) = {
        let guard = state.shared.lock().await?;
        (
            guard.keyboxes.enabled_count()?,
            guard.store.is_enabled(Setting::GlobalMode)?,
            guard.store.is_enabled(Setting::RkpBypass)?,
            guard.store.is_enabled(Setting::TeeBrokenMode)?,
        )
    };
    let real_cpu = match state.cpu.lock() {
        Ok(mut sampler) => sampler.sample(),
        Err(_) => 0.0,
    };

    let report = ResourceUsage {
        real_ram_kb: usage::resident_memory_kb(),
        real_cpu,
        environment: RootEnvironment::detect(),
        keybox_count,
        app_config_size: usage::app_config_size(&state.base),
        global_mode,
        rkp_bypass,
        tee_broken_mode,
    };
    Ok(Json(
        serde_json::to_value(report).map_err(|e| ApiError::Internal(e.to_string()))?,
    ))
}

/// List every keybox entry.
pub async fn list_keyboxes(State(state): State<AppState>) -> ApiResult {
    let guard = state.shared.lock().await?;
    let entries = guard.keyboxes.list()?;
    let enabled = entries.iter().filter(|e| e.enabled).count();
    Ok(Json(json!({ "keyboxes": entries, "enabled": enabled })))
}

#[derive(Debug, Deserialize)]
pub struct ImportKeyboxRequest {
    filename: String,
    content: String,
}

/// Import a new keybox entry.
pub async fn import_keybox(
    State(state): State<AppState>,
    payload: Result<Json<ImportKeyboxRequest>, JsonRejection>,
) -> ApiResult {
    let request = body(payload)?;
    let mut guard = state.shared.lock().await?;
    let entry = guard.keyboxes.import(&request.filename, &request.content)?;
    Ok(Json(json!({ "keybox": entry })))
}

#[derive(Debug, Deserialize)]
pub struct ToggleKeyboxRequest {
    id: String,
    enabled: bool,
}

/// Enable or disable a keybox entry.
pub async fn toggle_keybox(
    State(state): State<AppState>,
    payload: Result<Json<ToggleKeyboxRequest>, JsonRejection>,
) -> ApiResult {
    let request = body(payload)?;
    let mut guard = state.shared.lock().await?;
    let changed = guard.keyboxes.set_enabled(&request.id, request.enabled)?;
    Ok(Json(json!({
        "id": request.id,
        "enabled": request.enabled,
        "changed": changed,
    })))
}

/// Run a maintenance cycle now.
pub async fn verify_keyboxes(State(state): State<AppState>) -> ApiResult {
    let report = state.maintainer.run_cycle().await?;
    Ok(Json(
        serde_json::to_value(report).map_err(|e| ApiError::Internal(e.to_string()))?,
    ))
}
