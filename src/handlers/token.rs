use axum::{Json, extract::State, http::HeaderMap};
use serde::Serialize;
use tower_cookies::{Cookie, Cookies, cookie::SameSite};

use crate::error::AppError;
use crate::models::{Account, AccountStatus};
use crate::state::AppState;

/// アクセストークンのCookie名
pub const ACCESS_TOKEN_COOKIE: &str = "accessToken";
/// リフレッシュトークンのCookie名
pub const REFRESH_TOKEN_COOKIE: &str = "refreshToken";

/// httpOnlyトークンCookieを構築
pub(crate) fn token_cookie(
    name: &'static str,
    value: String,
    max_age_secs: i64,
) -> Cookie<'static> {
    Cookie::build((name, value))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .max_age(tower_cookies::cookie::time::Duration::seconds(max_age_secs))
        .build()
}

/// Authorization ヘッダーから Bearer トークンを取り出す
pub(crate) fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|v| v.to_string())
}

/// Cookie優先・Bearerフォールバックでトークンを取り出す
pub(crate) fn extract_token(
    cookies: &Cookies,
    headers: &HeaderMap,
    cookie_name: &str,
) -> Option<String> {
    if let Some(cookie) = cookies.get(cookie_name) {
        return Some(cookie.value().to_string());
    }
    bearer_token(headers)
}

/// アクセストークンからリクエスト主体のアカウントを解決
///
/// ロードしたアカウントが無効化されている場合はトークンが有効でも拒否する。
pub(crate) async fn current_account(
    state: &AppState,
    cookies: &Cookies,
    headers: &HeaderMap,
) -> Result<Account, AppError> {
    let token =
        extract_token(cookies, headers, ACCESS_TOKEN_COOKIE).ok_or(AppError::TokenInvalid)?;
    let claims = state.token_service.decode_access(&token)?;

    let account = state
        .account_repo
        .find_by_id(claims.user_id)
        .await?
        .ok_or(AppError::TokenInvalid)?;

    if account.status != AccountStatus::Active || !account.active {
        return Err(AppError::AccountInactive);
    }

    Ok(account)
}

// === Token Refresh ===

#[derive(Debug, Serialize)]
pub struct RefreshResponse {
    pub access_token: String,
    pub expires_in: i64,
}

/// トークンリフレッシュハンドラー
///
/// POST /api/token/refresh
///
/// リフレッシュトークン（Cookie優先、Bearerフォールバック）を検証し、
/// アカウントの現在のロールで新しいアクセストークンを発行する。
/// アクセストークンを提出された場合は種別不一致として401を返す。
/// リフレッシュトークン自体はローテーションしない（期限まで再利用可）。
pub async fn refresh_token(
    State(state): State<AppState>,
    cookies: Cookies,
    headers: HeaderMap,
) -> Result<Json<RefreshResponse>, AppError> {
    let token =
        extract_token(&cookies, &headers, REFRESH_TOKEN_COOKIE).ok_or(AppError::TokenInvalid)?;
    let claims = state.token_service.decode_refresh(&token)?;

    // アカウントを再取得してロールを取り直す
    let account = state
        .account_repo
        .find_by_id(claims.user_id)
        .await?
        .ok_or(AppError::TokenInvalid)?;

    if account.status != AccountStatus::Active || !account.active {
        return Err(AppError::AccountInactive);
    }

    let access_token = state.token_service.issue_access_token(&account)?;
    let expires_in = state.token_service.access_ttl_secs();

    cookies.add(token_cookie(
        ACCESS_TOKEN_COOKIE,
        access_token.clone(),
        expires_in,
    ));

    tracing::info!(account_id = %account.id, "アクセストークン再発行");

    Ok(Json(RefreshResponse {
        access_token,
        expires_in,
    }))
}

// === Token Validate ===

#[derive(Debug, Serialize)]
pub struct ValidateResponse {
    pub valid: bool,
    pub username: String,
}

/// トークン検証ハンドラー
///
/// GET /api/token/validate
///
/// アクセストークンの署名・構造・有効期限・種別を検証する。
/// 無効な場合は401。
pub async fn validate_token(
    State(state): State<AppState>,
    cookies: Cookies,
    headers: HeaderMap,
) -> Result<Json<ValidateResponse>, AppError> {
    let token =
        extract_token(&cookies, &headers, ACCESS_TOKEN_COOKIE).ok_or(AppError::TokenInvalid)?;
    let claims = state.token_service.decode_access(&token)?;

    Ok(Json(ValidateResponse {
        valid: true,
        username: claims.sub,
    }))
}

// === Logout ===

#[derive(Debug, Serialize)]
pub struct LogoutResponse {
    pub message: String,
}

/// ログアウトハンドラー
///
/// POST /api/logout
///
/// トークンCookieを失効させる。サーバー側の状態は持たないため
/// Cookie削除のみで完結する。
pub async fn logout(cookies: Cookies) -> Json<LogoutResponse> {
    for name in [ACCESS_TOKEN_COOKIE, REFRESH_TOKEN_COOKIE] {
        let mut cookie = Cookie::build((name, ""))
            .path("/")
            .http_only(true)
            .build();
        cookie.set_max_age(tower_cookies::cookie::time::Duration::ZERO);
        cookies.add(cookie);
    }

    Json(LogoutResponse {
        message: "ログアウトしました".to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bearer_token_extraction() {
        let mut headers = HeaderMap::new();
        headers.insert(
            axum::http::header::AUTHORIZATION,
            "Bearer abc.def.ghi".parse().unwrap(),
        );
        assert_eq!(bearer_token(&headers), Some("abc.def.ghi".to_string()));
    }

    #[test]
    fn test_bearer_token_missing_prefix() {
        let mut headers = HeaderMap::new();
        headers.insert(
            axum::http::header::AUTHORIZATION,
            "Basic dXNlcjpwYXNz".parse().unwrap(),
        );
        assert_eq!(bearer_token(&headers), None);
    }

    #[test]
    fn test_bearer_token_absent() {
        let headers = HeaderMap::new();
        assert_eq!(bearer_token(&headers), None);
    }

    #[test]
    fn test_token_cookie_attributes() {
        let cookie = token_cookie(ACCESS_TOKEN_COOKIE, "tok".to_string(), 3600);
        assert_eq!(cookie.name(), "accessToken");
        assert_eq!(cookie.value(), "tok");
        assert_eq!(cookie.http_only(), Some(true));
        assert_eq!(cookie.path(), Some("/"));
    }
}
