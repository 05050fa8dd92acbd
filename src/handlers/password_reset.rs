use axum::{Json, extract::State};
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::state::AppState;

// === Forgot Password ===

#[derive(Debug, Deserialize)]
pub struct ForgotPasswordRequest {
    pub email: String,
}

#[derive(Debug, Serialize)]
pub struct ForgotPasswordResponse {
    pub message: String,
}

/// パスワードリセット要求ハンドラー
///
/// POST /api/password/forgot
///
/// # Security
/// - ユーザーの存在有無にかかわらず同じ成功レスポンスを返す（列挙攻撃対策）
pub async fn forgot_password(
    State(state): State<AppState>,
    Json(request): Json<ForgotPasswordRequest>,
) -> Result<Json<ForgotPasswordResponse>, AppError> {
    validate_email(&request.email)?;

    state.recovery_service.request_reset(&request.email).await?;

    // 存在しないメールアドレスでも同じ文面
    Ok(Json(ForgotPasswordResponse {
        message: "登録されているメールアドレスの場合、リカバリーコードを送信しました".to_string(),
    }))
}

// === Reset Password ===

#[derive(Debug, Deserialize)]
pub struct ResetPasswordRequest {
    pub email: String,
    pub recovery_code: String,
    /// TOTPコード（2FA有効アカウントでは必須）
    pub code: Option<String>,
    pub new_password: String,
}

#[derive(Debug, Serialize)]
pub struct ResetPasswordResponse {
    pub message: String,
}

/// パスワードリセット実行ハンドラー
///
/// POST /api/password/reset
///
/// リカバリーコードとTOTPコードを検証してパスワードを更新する。
/// 成功時は全信頼済みデバイスが失効する。
///
/// # Security
/// - リカバリーコード・新パスワードはログ出力禁止
pub async fn reset_password(
    State(state): State<AppState>,
    Json(request): Json<ResetPasswordRequest>,
) -> Result<Json<ResetPasswordResponse>, AppError> {
    validate_email(&request.email)?;
    validate_new_password(&request.new_password)?;

    if request.recovery_code.trim().is_empty() {
        return Err(AppError::Validation(
            "リカバリーコードは必須です".to_string(),
        ));
    }

    state
        .recovery_service
        .reset_password(
            &request.email,
            &request.recovery_code,
            request.code.as_deref(),
            &request.new_password,
        )
        .await?;

    Ok(Json(ResetPasswordResponse {
        message: "パスワードを更新しました。すべてのデバイスで再ログインが必要です".to_string(),
    }))
}

// === Helper Functions ===

/// メールアドレスの簡易バリデーション
fn validate_email(email: &str) -> Result<(), AppError> {
    if email.trim().is_empty() {
        return Err(AppError::Validation("メールアドレスは必須です".to_string()));
    }
    if !email.contains('@') {
        return Err(AppError::Validation(
            "有効なメールアドレスを入力してください".to_string(),
        ));
    }
    Ok(())
}

/// 新パスワードのバリデーション
fn validate_new_password(password: &str) -> Result<(), AppError> {
    if password.len() < 8 {
        return Err(AppError::Validation(
            "パスワードは8文字以上で入力してください".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_empty_email() {
        assert!(validate_email("").is_err());
        assert!(validate_email("   ").is_err());
    }

    #[test]
    fn test_validate_invalid_email() {
        assert!(validate_email("not-an-email").is_err());
    }

    #[test]
    fn test_validate_valid_email() {
        assert!(validate_email("analista@lab.example").is_ok());
    }

    #[test]
    fn test_validate_short_new_password() {
        assert!(validate_new_password("short").is_err());
    }

    #[test]
    fn test_validate_valid_new_password() {
        assert!(validate_new_password("password123").is_ok());
    }
}
