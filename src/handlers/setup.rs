use axum::{Json, extract::State};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;
use crate::services::auth::hash_password;
use crate::state::AppState;

// === Setup Data ===

#[derive(Debug, Deserialize)]
pub struct SetupDataRequest {
    pub setup_token: String,
}

#[derive(Debug, Serialize)]
pub struct SetupDataResponse {
    pub account_id: Uuid,
    pub username: String,
    /// Base32エンコードされたTOTPシークレット（手入力用）
    pub secret: String,
    /// QRコード（data URI）
    pub qr_code: String,
}

/// 管理者初回セットアップデータ取得ハンドラー
///
/// POST /api/setup/data
///
/// セットアップトークンは単一消費: このエンドポイントの呼び出しで
/// 無効化され、2回目の呼び出しは必ず失敗する。
pub async fn setup_data(
    State(state): State<AppState>,
    Json(request): Json<SetupDataRequest>,
) -> Result<Json<SetupDataResponse>, AppError> {
    if request.setup_token.trim().is_empty() {
        return Err(AppError::Validation(
            "セットアップトークンは必須です".to_string(),
        ));
    }

    let payload = state
        .setup_token_store
        .consume(&request.setup_token)
        .ok_or(AppError::SetupTokenInvalidOrExpired)?;

    tracing::info!(account_id = %payload.account_id, "セットアップトークン消費");

    Ok(Json(SetupDataResponse {
        account_id: payload.account_id,
        username: payload.username,
        secret: payload.secret,
        qr_code: format!("data:image/png;base64,{}", payload.qr_code),
    }))
}

// === Complete Setup ===

#[derive(Debug, Deserialize)]
pub struct CompleteSetupRequest {
    pub account_id: Uuid,
    pub new_password: String,
    pub totp_code: String,
}

#[derive(Debug, Serialize)]
pub struct CompleteSetupResponse {
    pub message: String,
    /// 一度だけ返すバックアップコード（再取得不可）
    pub backup_codes: Vec<String>,
}

/// 管理者初回セットアップ完了ハンドラー
///
/// POST /api/setup/complete
///
/// 新パスワードの設定とTOTPコードの確認で初回ログインフローを完了する。
/// 資格情報変更が強制されていないアカウントでは実行できない。
/// パスワード変更を伴うため、全信頼済みデバイスを失効させる。
pub async fn complete_setup(
    State(state): State<AppState>,
    Json(request): Json<CompleteSetupRequest>,
) -> Result<Json<CompleteSetupResponse>, AppError> {
    validate_complete_request(&request)?;

    let account = state
        .account_repo
        .find_by_id(request.account_id)
        .await?
        .ok_or(AppError::SetupTokenInvalidOrExpired)?;

    if !account.requires_credential_change {
        tracing::warn!(account_id = %account.id, "不要なセットアップ完了試行");
        return Err(AppError::SetupTokenInvalidOrExpired);
    }

    let encrypted = account
        .totp_secret_encrypted
        .as_deref()
        .ok_or(AppError::SetupTokenInvalidOrExpired)?;
    let secret = state.totp_service.decrypt_secret(encrypted)?;

    if !state.totp_service.verify_code(&secret, &request.totp_code)? {
        return Err(AppError::TotpInvalid);
    }

    let password_hash = hash_password(&request.new_password)?;
    state
        .account_repo
        .update_password(account.id, &password_hash)
        .await?;

    // セキュリティ不変条件: パスワード変更時は全信頼済みデバイスを失効
    state.trusted_device_service.revoke_all(account.id).await?;

    state.account_repo.enable_totp(account.id).await?;
    state
        .account_repo
        .clear_requires_credential_change(account.id)
        .await?;

    let backup_codes = state.backup_code_service.regenerate(account.id).await?;

    tracing::info!(account_id = %account.id, "管理者初回セットアップ完了");

    Ok(Json(CompleteSetupResponse {
        message: "セットアップが完了しました。新しい資格情報でログインしてください".to_string(),
        backup_codes,
    }))
}

/// セットアップ完了リクエストのバリデーション
fn validate_complete_request(request: &CompleteSetupRequest) -> Result<(), AppError> {
    if request.new_password.len() < 8 {
        return Err(AppError::Validation(
            "パスワードは8文字以上で入力してください".to_string(),
        ));
    }
    if request.totp_code.len() != 6 || !request.totp_code.chars().all(|c| c.is_ascii_digit()) {
        return Err(AppError::Validation(
            "認証コードは6桁の数字で入力してください".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_short_password() {
        let request = CompleteSetupRequest {
            account_id: Uuid::new_v4(),
            new_password: "short".to_string(),
            totp_code: "123456".to_string(),
        };
        assert!(validate_complete_request(&request).is_err());
    }

    #[test]
    fn test_validate_bad_totp_code() {
        let request = CompleteSetupRequest {
            account_id: Uuid::new_v4(),
            new_password: "password123".to_string(),
            totp_code: "12ab56".to_string(),
        };
        assert!(validate_complete_request(&request).is_err());
    }

    #[test]
    fn test_validate_valid_request() {
        let request = CompleteSetupRequest {
            account_id: Uuid::new_v4(),
            new_password: "password123".to_string(),
            totp_code: "123456".to_string(),
        };
        assert!(validate_complete_request(&request).is_ok());
    }
}
