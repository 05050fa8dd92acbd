use axum::{Json, extract::State};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::AccountStatus;
use crate::services::auth::hash_password;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub password: String, // SecretBox不要（Deserialize後すぐハッシュ化）
    pub given_name: String,
    pub family_name: String,
}

#[derive(Debug, Serialize)]
pub struct RegisterResponse {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub status: AccountStatus,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// アカウント登録ハンドラー
///
/// POST /api/register
///
/// 登録直後は status = pending（ロールなし）。
/// 管理者の承認でアクティブ化される。
///
/// # Security
/// - パスワードはログに出力しない
/// - パスワードは即座にハッシュ化
pub async fn register(
    State(state): State<AppState>,
    Json(request): Json<RegisterRequest>,
) -> Result<Json<RegisterResponse>, AppError> {
    validate_register_request(&request)?;

    let password_hash = hash_password(&request.password)?;

    let account = state
        .account_repo
        .create(
            &request.username,
            &request.email,
            &password_hash,
            &request.given_name,
            &request.family_name,
        )
        .await
        .map_err(|e| {
            // UNIQUE制約違反チェック
            if let sqlx::Error::Database(db_err) = &e
                && matches!(
                    db_err.constraint(),
                    Some("accounts_username_key") | Some("accounts_email_key")
                )
            {
                return AppError::UsernameOrEmailTaken;
            }
            AppError::Database(e)
        })?;

    tracing::info!(username = %account.username, "アカウント登録成功（承認待ち）");

    Ok(Json(RegisterResponse {
        id: account.id,
        username: account.username,
        email: account.email,
        status: account.status,
        created_at: account.created_at,
    }))
}

/// 登録リクエストのバリデーション
fn validate_register_request(request: &RegisterRequest) -> Result<(), AppError> {
    if request.username.trim().is_empty() {
        return Err(AppError::Validation("ユーザー名は必須です".to_string()));
    }
    if request.email.trim().is_empty() {
        return Err(AppError::Validation("メールアドレスは必須です".to_string()));
    }
    if !request.email.contains('@') {
        return Err(AppError::Validation(
            "有効なメールアドレスを入力してください".to_string(),
        ));
    }
    if request.password.len() < 8 {
        return Err(AppError::Validation(
            "パスワードは8文字以上で入力してください".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_request() -> RegisterRequest {
        RegisterRequest {
            username: "analista1".to_string(),
            email: "analista1@lab.example".to_string(),
            password: "password123".to_string(),
            given_name: "Ana".to_string(),
            family_name: "García".to_string(),
        }
    }

    #[test]
    fn test_validate_empty_username() {
        let request = RegisterRequest {
            username: "".to_string(),
            ..base_request()
        };
        assert!(validate_register_request(&request).is_err());
    }

    #[test]
    fn test_validate_empty_email() {
        let request = RegisterRequest {
            email: "".to_string(),
            ..base_request()
        };
        assert!(validate_register_request(&request).is_err());
    }

    #[test]
    fn test_validate_invalid_email() {
        let request = RegisterRequest {
            email: "invalid-email".to_string(),
            ..base_request()
        };
        assert!(validate_register_request(&request).is_err());
    }

    #[test]
    fn test_validate_short_password() {
        let request = RegisterRequest {
            password: "short".to_string(),
            ..base_request()
        };
        assert!(validate_register_request(&request).is_err());
    }

    #[test]
    fn test_validate_valid_request() {
        assert!(validate_register_request(&base_request()).is_ok());
    }
}
