use std::net::SocketAddr;

use axum::{
    Json,
    extract::{ConnectInfo, State},
    http::{HeaderMap, StatusCode, header::USER_AGENT},
};
use serde::{Deserialize, Serialize};
use tower_cookies::Cookies;

use crate::error::AppError;
use crate::handlers::token::{ACCESS_TOKEN_COOKIE, REFRESH_TOKEN_COOKIE, token_cookie};
use crate::services::auth::UserSummary;
use crate::services::trusted_device::client_ip;
use crate::services::{LoginAttempt, LoginOutcome};
use crate::state::AppState;

/// ログインリクエスト
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    /// ユーザー名またはメールアドレス
    pub username_or_email: String,
    pub password: String,
    /// TOTPコードまたはバックアップコード（2FA有効ユーザーのみ必須）
    pub code: Option<String>,
    /// クライアント提示のデバイスフィンガープリント
    pub device_fingerprint: Option<String>,
    /// 「このデバイスを信頼する」の要求
    #[serde(default)]
    pub trust_device: bool,
}

/// ログインレスポンス
///
/// 成功時はトークン類、2FA等が必要な場合は該当フラグのみを返す。
#[derive(Debug, Serialize)]
pub struct LoginResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_token_ttl_secs: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token_ttl_secs: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<UserSummary>,
    /// バックアップコードで認証した場合の残数
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backup_codes_remaining: Option<i64>,
    /// バックアップコードの残数が少ない場合の警告文
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requires_2fa: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requires_2fa_setup: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requires_credential_change: Option<bool>,
    /// 管理者初回ログイン時のセットアップトークン
    #[serde(skip_serializing_if = "Option::is_none")]
    pub setup_token: Option<String>,
}

impl LoginResponse {
    fn empty() -> Self {
        Self {
            access_token: None,
            refresh_token: None,
            access_token_ttl_secs: None,
            refresh_token_ttl_secs: None,
            user: None,
            backup_codes_remaining: None,
            warning: None,
            requires_2fa: None,
            requires_2fa_setup: None,
            requires_credential_change: None,
            setup_token: None,
        }
    }
}

/// ログインハンドラー
///
/// POST /api/login
///
/// 認証状態機械は AuthService に委譲し、ここでは業務上の帰結を
/// HTTPステータスとCookieに写すだけ。
pub async fn login(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    cookies: Cookies,
    headers: HeaderMap,
    Json(request): Json<LoginRequest>,
) -> Result<(StatusCode, Json<LoginResponse>), AppError> {
    validate_login_request(&request)?;

    let user_agent = headers
        .get(USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string());
    let ip = client_ip(&headers, Some(peer.ip()));

    let outcome = state
        .auth_service
        .login(LoginAttempt {
            username_or_email: request.username_or_email,
            password: request.password,
            code: request.code,
            device_fingerprint: request.device_fingerprint,
            trust_device: request.trust_device,
            user_agent,
            ip,
        })
        .await?;

    let (status, response) = match outcome {
        LoginOutcome::Success(success) => {
            cookies.add(token_cookie(
                ACCESS_TOKEN_COOKIE,
                success.access_token.clone(),
                success.access_token_ttl_secs,
            ));
            cookies.add(token_cookie(
                REFRESH_TOKEN_COOKIE,
                success.refresh_token.clone(),
                success.refresh_token_ttl_secs,
            ));

            let warning = success.backup_codes_low.then(|| {
                "バックアップコードの残りが少なくなっています。再生成を検討してください"
                    .to_string()
            });

            (
                StatusCode::OK,
                LoginResponse {
                    access_token: Some(success.access_token),
                    refresh_token: Some(success.refresh_token),
                    access_token_ttl_secs: Some(success.access_token_ttl_secs),
                    refresh_token_ttl_secs: Some(success.refresh_token_ttl_secs),
                    user: Some(success.user),
                    backup_codes_remaining: success.backup_codes_remaining,
                    warning,
                    ..LoginResponse::empty()
                },
            )
        }
        LoginOutcome::Requires2fa => (
            StatusCode::FORBIDDEN,
            LoginResponse {
                requires_2fa: Some(true),
                ..LoginResponse::empty()
            },
        ),
        LoginOutcome::Requires2faSetup => (
            StatusCode::FORBIDDEN,
            LoginResponse {
                requires_2fa_setup: Some(true),
                ..LoginResponse::empty()
            },
        ),
        LoginOutcome::RequiresCredentialChange { setup_token } => (
            StatusCode::FORBIDDEN,
            LoginResponse {
                requires_credential_change: Some(true),
                setup_token: Some(setup_token),
                ..LoginResponse::empty()
            },
        ),
    };

    Ok((status, Json(response)))
}

/// ログインリクエストのバリデーション
fn validate_login_request(request: &LoginRequest) -> Result<(), AppError> {
    if request.username_or_email.trim().is_empty() {
        return Err(AppError::Validation(
            "ユーザー名またはメールアドレスは必須です".to_string(),
        ));
    }

    if request.password.is_empty() {
        return Err(AppError::Validation("パスワードは必須です".to_string()));
    }

    // code は TOTP（6桁数字）とバックアップコードの両方を受けるため、
    // ここでは空文字のみ拒否する
    if let Some(code) = &request.code
        && code.trim().is_empty()
    {
        return Err(AppError::Validation("認証コードが空です".to_string()));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_request() -> LoginRequest {
        LoginRequest {
            username_or_email: "analista1".to_string(),
            password: "password123".to_string(),
            code: None,
            device_fingerprint: None,
            trust_device: false,
        }
    }

    #[test]
    fn test_validate_empty_identifier() {
        let request = LoginRequest {
            username_or_email: "  ".to_string(),
            ..base_request()
        };
        assert!(validate_login_request(&request).is_err());
    }

    #[test]
    fn test_validate_empty_password() {
        let request = LoginRequest {
            password: "".to_string(),
            ..base_request()
        };
        assert!(validate_login_request(&request).is_err());
    }

    #[test]
    fn test_validate_empty_code() {
        let request = LoginRequest {
            code: Some("   ".to_string()),
            ..base_request()
        };
        assert!(validate_login_request(&request).is_err());
    }

    #[test]
    fn test_validate_valid_request() {
        assert!(validate_login_request(&base_request()).is_ok());
    }

    #[test]
    fn test_validate_backup_code_accepted() {
        // バックアップコード形式も code として受け付ける
        let request = LoginRequest {
            code: Some("ABCD-EFGH".to_string()),
            ..base_request()
        };
        assert!(validate_login_request(&request).is_ok());
    }
}
