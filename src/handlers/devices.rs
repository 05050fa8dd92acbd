use axum::{Json, extract::State, http::HeaderMap};
use serde::{Deserialize, Serialize};
use tower_cookies::Cookies;
use uuid::Uuid;

use crate::error::AppError;
use crate::handlers::token::current_account;
use crate::models::TrustedDevice;
use crate::state::AppState;

/// 信頼済みデバイス一覧ハンドラー
///
/// GET /api/devices
///
/// 最終使用日時の降順で返す（要アクセストークン）。
pub async fn list_devices(
    State(state): State<AppState>,
    cookies: Cookies,
    headers: HeaderMap,
) -> Result<Json<Vec<TrustedDevice>>, AppError> {
    let account = current_account(&state, &cookies, &headers).await?;

    let devices = state.trusted_device_service.list(account.id).await?;

    Ok(Json(devices))
}

// === Revoke ===

#[derive(Debug, Deserialize)]
pub struct RevokeRequest {
    pub device_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct RevokeResponse {
    pub message: String,
}

/// デバイス信頼取り消しハンドラー
///
/// POST /api/devices/revoke
///
/// 存在しないデバイスIDは冪等に成功として扱う。
/// 他アカウントのデバイスを指定した場合のみエラー。
pub async fn revoke_device(
    State(state): State<AppState>,
    cookies: Cookies,
    headers: HeaderMap,
    Json(request): Json<RevokeRequest>,
) -> Result<Json<RevokeResponse>, AppError> {
    let account = current_account(&state, &cookies, &headers).await?;

    state
        .trusted_device_service
        .revoke(account.id, request.device_id)
        .await?;

    Ok(Json(RevokeResponse {
        message: "デバイスの信頼を取り消しました".to_string(),
    }))
}

/// 全デバイス信頼取り消しハンドラー
///
/// POST /api/devices/revoke-all
///
/// 「すべての端末からサインアウト」に相当。
pub async fn revoke_all_devices(
    State(state): State<AppState>,
    cookies: Cookies,
    headers: HeaderMap,
) -> Result<Json<RevokeResponse>, AppError> {
    let account = current_account(&state, &cookies, &headers).await?;

    state.trusted_device_service.revoke_all(account.id).await?;

    Ok(Json(RevokeResponse {
        message: "すべてのデバイスの信頼を取り消しました".to_string(),
    }))
}
