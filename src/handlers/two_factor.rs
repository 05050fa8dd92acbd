use axum::{Json, extract::State, http::HeaderMap};
use serde::{Deserialize, Serialize};
use tower_cookies::Cookies;

use crate::error::AppError;
use crate::handlers::token::current_account;
use crate::models::{Account, AccountStatus};
use crate::services::TotpService;
use crate::services::auth::{DUMMY_HASH, verify_password};
use crate::services::backup_code::is_low_count;
use crate::state::AppState;

// === 2FA Setup ===

#[derive(Debug, Deserialize)]
pub struct SetupRequest {
    pub username_or_email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct SetupResponse {
    pub secret: String,
    pub qr_code: String,
}

/// POST /api/2fa/setup
///
/// 2FA設定を開始（シークレット生成、QRコード返却）。
/// 未ログインでも資格情報の確認を必須とする。
///
/// # Security
/// - シークレット平文はログ出力禁止
pub async fn setup_2fa(
    State(state): State<AppState>,
    Json(request): Json<SetupRequest>,
) -> Result<Json<SetupResponse>, AppError> {
    validate_password(&request.password)?;

    let account = verify_credentials(&state, &request.username_or_email, &request.password).await?;

    if account.totp_enabled {
        return Err(AppError::TotpAlreadyEnabled);
    }

    // シークレット生成（未確認の既存シークレットは上書きして再設定を許可）
    let secret = TotpService::generate_secret();
    let encrypted = state.totp_service.encrypt_secret(&secret)?;
    state.account_repo.set_totp_secret(account.id, &encrypted).await?;

    let qr_code = state
        .totp_service
        .generate_qr_code(&account.email, &secret)?;

    tracing::info!(account_id = %account.id, "2FA設定開始");

    Ok(Json(SetupResponse {
        secret,
        qr_code: format!("data:image/png;base64,{}", qr_code),
    }))
}

// === 2FA Verify (初回有効化) ===

#[derive(Debug, Deserialize)]
pub struct VerifyRequest {
    pub username_or_email: String,
    pub password: String,
    pub code: String,
}

#[derive(Debug, Serialize)]
pub struct VerifyResponse {
    pub enabled: bool,
    /// 有効化時に一度だけ返すバックアップコード（再取得不可）
    pub backup_codes: Vec<String>,
}

/// POST /api/2fa/verify
///
/// 初回コード検証で2FAを有効化し、バックアップコードを発行する。
///
/// # Security
/// - コード・バックアップコード平文はログ出力禁止
pub async fn verify_2fa(
    State(state): State<AppState>,
    Json(request): Json<VerifyRequest>,
) -> Result<Json<VerifyResponse>, AppError> {
    validate_totp_code(&request.code)?;

    let account = verify_credentials(&state, &request.username_or_email, &request.password).await?;

    if account.totp_enabled {
        return Err(AppError::TotpAlreadyEnabled);
    }

    let encrypted = account
        .totp_secret_encrypted
        .as_deref()
        .ok_or(AppError::TotpNotEnabled)?;
    let secret = state.totp_service.decrypt_secret(encrypted)?;

    if !state.totp_service.verify_code(&secret, &request.code)? {
        return Err(AppError::TotpInvalid);
    }

    state.account_repo.enable_totp(account.id).await?;

    // 有効化と同時にバックアップコードを発行（旧コードがあれば破棄）
    let backup_codes = state.backup_code_service.regenerate(account.id).await?;

    tracing::info!(account_id = %account.id, "2FA有効化完了");

    Ok(Json(VerifyResponse {
        enabled: true,
        backup_codes,
    }))
}

// === 2FA Disable ===

#[derive(Debug, Deserialize)]
pub struct DisableRequest {
    pub username_or_email: String,
    pub password: String,
    pub code: String,
}

#[derive(Debug, Serialize)]
pub struct DisableResponse {
    pub disabled: bool,
}

/// POST /api/2fa/disable
///
/// 2FA無効化。パスワードとTOTPコードの両方の確認を必須とし、
/// シークレットとバックアップコードを破棄する。
pub async fn disable_2fa(
    State(state): State<AppState>,
    Json(request): Json<DisableRequest>,
) -> Result<Json<DisableResponse>, AppError> {
    validate_password(&request.password)?;
    validate_totp_code(&request.code)?;

    let account = verify_credentials(&state, &request.username_or_email, &request.password).await?;

    if !account.totp_enabled {
        return Err(AppError::TotpNotEnabled);
    }

    let encrypted = account
        .totp_secret_encrypted
        .as_deref()
        .ok_or(AppError::TotpNotEnabled)?;
    let secret = state.totp_service.decrypt_secret(encrypted)?;

    if !state.totp_service.verify_code(&secret, &request.code)? {
        return Err(AppError::TotpInvalid);
    }

    state.account_repo.disable_totp(account.id).await?;
    state.backup_code_service.invalidate_all(account.id).await?;

    tracing::info!(account_id = %account.id, "2FA無効化完了");

    Ok(Json(DisableResponse { disabled: true }))
}

// === Backup Codes ===

#[derive(Debug, Serialize)]
pub struct RegenerateResponse {
    /// 新しいバックアップコード（一度だけ返す、再取得不可）
    pub backup_codes: Vec<String>,
}

/// POST /api/2fa/backup-codes/regenerate
///
/// 既存コードをすべて無効化して新しいバッチを発行（要アクセストークン）。
pub async fn regenerate_backup_codes(
    State(state): State<AppState>,
    cookies: Cookies,
    headers: HeaderMap,
) -> Result<Json<RegenerateResponse>, AppError> {
    let account = current_account(&state, &cookies, &headers).await?;

    if !account.totp_enabled {
        return Err(AppError::TotpNotEnabled);
    }

    let backup_codes = state.backup_code_service.regenerate(account.id).await?;

    tracing::info!(account_id = %account.id, "バックアップコード再生成");

    Ok(Json(RegenerateResponse { backup_codes }))
}

#[derive(Debug, Serialize)]
pub struct CountResponse {
    pub count: i64,
    /// 残数が少ない（1〜3）場合のみ true。0は使い切りで警告対象外
    pub low: bool,
}

/// GET /api/2fa/backup-codes/count
///
/// 未使用バックアップコードの残数（要アクセストークン）。
pub async fn backup_code_count(
    State(state): State<AppState>,
    cookies: Cookies,
    headers: HeaderMap,
) -> Result<Json<CountResponse>, AppError> {
    let account = current_account(&state, &cookies, &headers).await?;

    if !account.totp_enabled {
        return Err(AppError::TotpNotEnabled);
    }

    let count = state.backup_code_service.available_count(account.id).await?;

    Ok(Json(CountResponse {
        count,
        low: is_low_count(count),
    }))
}

// === Helper Functions ===

/// パスワードバリデーション
fn validate_password(password: &str) -> Result<(), AppError> {
    if password.is_empty() {
        return Err(AppError::Validation("パスワードは必須です".to_string()));
    }
    if password.len() < 8 {
        return Err(AppError::Validation(
            "パスワードは8文字以上で入力してください".to_string(),
        ));
    }
    Ok(())
}

/// TOTPコードバリデーション
fn validate_totp_code(code: &str) -> Result<(), AppError> {
    if code.is_empty() {
        return Err(AppError::Validation("認証コードは必須です".to_string()));
    }
    if code.len() != 6 || !code.chars().all(|c| c.is_ascii_digit()) {
        return Err(AppError::Validation(
            "認証コードは6桁の数字で入力してください".to_string(),
        ));
    }
    Ok(())
}

/// 資格情報を確認してアカウントを返す
///
/// 不在時もダミー検証相当のコストをかけるため verify_password を通す。
pub(crate) async fn verify_credentials(
    state: &AppState,
    username_or_email: &str,
    password: &str,
) -> Result<Account, AppError> {
    let account = match state
        .account_repo
        .find_by_username_or_email(username_or_email)
        .await?
    {
        Some(account) => account,
        None => {
            // タイミング攻撃対策: 不在でもダミー検証を実行
            let _ = verify_password(password, DUMMY_HASH);
            return Err(AppError::IncorrectCredentials);
        }
    };

    if account.status == AccountStatus::Inactive || !account.active {
        return Err(AppError::AccountInactive);
    }
    if account.status == AccountStatus::Pending {
        return Err(AppError::AccountPending);
    }

    if !verify_password(password, &account.password_hash) {
        tracing::warn!(account_id = %account.id, "資格情報確認失敗");
        return Err(AppError::IncorrectCredentials);
    }

    Ok(account)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_empty_password() {
        assert!(validate_password("").is_err());
    }

    #[test]
    fn test_validate_short_password() {
        assert!(validate_password("short").is_err());
    }

    #[test]
    fn test_validate_valid_password() {
        assert!(validate_password("password123").is_ok());
    }

    #[test]
    fn test_validate_empty_code() {
        assert!(validate_totp_code("").is_err());
    }

    #[test]
    fn test_validate_short_code() {
        assert!(validate_totp_code("12345").is_err());
    }

    #[test]
    fn test_validate_non_digit_code() {
        assert!(validate_totp_code("12345a").is_err());
    }

    #[test]
    fn test_validate_valid_code() {
        assert!(validate_totp_code("123456").is_ok());
    }

    #[test]
    fn test_missing_account_dummy_verification() {
        // 不在アカウント分岐で実行するダミー検証はパニックせず必ず false
        assert!(!verify_password("password123", DUMMY_HASH));
        assert!(!verify_password("", DUMMY_HASH));
    }
}
