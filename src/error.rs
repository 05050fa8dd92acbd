use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("認証エラー: ユーザー名またはパスワードが正しくありません")]
    IncorrectCredentials,

    #[error("アカウントが無効化されています")]
    AccountInactive,

    #[error("アカウントは承認待ちです")]
    AccountPending,

    #[error("アカウントにロールが割り当てられていません")]
    AccountHasNoRole,

    #[error("認証コードが無効です")]
    InvalidAuthenticationCode,

    #[error("トークンが無効です")]
    TokenInvalid,

    #[error("トークンの有効期限が切れています")]
    TokenExpired,

    #[error("トークン種別が一致しません")]
    TokenWrongType,

    #[error("リカバリーコードの有効期限が切れています")]
    RecoveryCodeExpired,

    #[error("リカバリーコードが無効です")]
    RecoveryCodeInvalid,

    #[error("このデバイスを操作する権限がありません")]
    NotAuthorizedForDevice,

    #[error("セットアップトークンが無効または期限切れです")]
    SetupTokenInvalidOrExpired,

    #[error("二要素認証は既に有効です")]
    TotpAlreadyEnabled,

    #[error("二要素認証が有効化されていません")]
    TotpNotEnabled,

    #[error("TOTPコードが無効です")]
    TotpInvalid,

    #[error("このユーザー名またはメールアドレスは既に使用されています")]
    UsernameOrEmailTaken,

    #[error("バリデーションエラー: {0}")]
    Validation(String),

    #[error("データベースエラー")]
    Database(#[from] sqlx::Error),

    #[error("内部エラー")]
    Internal(#[from] anyhow::Error),
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            // ユーザー不在とパスワード不一致は区別しない（列挙攻撃対策）
            Self::IncorrectCredentials => (
                StatusCode::BAD_REQUEST,
                "ユーザー名またはパスワードが正しくありません".to_string(),
            ),
            Self::AccountInactive => (
                StatusCode::UNAUTHORIZED,
                "アカウントが無効化されています".to_string(),
            ),
            Self::AccountPending => (
                StatusCode::BAD_REQUEST,
                "アカウントは管理者の承認待ちです".to_string(),
            ),
            Self::AccountHasNoRole => (
                StatusCode::BAD_REQUEST,
                "アカウントにロールが割り当てられていません".to_string(),
            ),
            Self::InvalidAuthenticationCode => (
                StatusCode::BAD_REQUEST,
                "認証コードが正しくありません".to_string(),
            ),
            Self::TokenInvalid => (
                StatusCode::UNAUTHORIZED,
                "トークンが無効です".to_string(),
            ),
            Self::TokenExpired => (
                StatusCode::UNAUTHORIZED,
                "トークンの有効期限が切れています".to_string(),
            ),
            Self::TokenWrongType => (
                StatusCode::UNAUTHORIZED,
                "トークン種別が一致しません".to_string(),
            ),
            Self::RecoveryCodeExpired => (
                StatusCode::BAD_REQUEST,
                "リカバリーコードの有効期限が切れています".to_string(),
            ),
            Self::RecoveryCodeInvalid => (
                StatusCode::BAD_REQUEST,
                "リカバリーコードが正しくありません".to_string(),
            ),
            Self::NotAuthorizedForDevice => (
                StatusCode::BAD_REQUEST,
                "このデバイスを操作する権限がありません".to_string(),
            ),
            Self::SetupTokenInvalidOrExpired => (
                StatusCode::BAD_REQUEST,
                "セットアップトークンが無効または期限切れです".to_string(),
            ),
            Self::TotpAlreadyEnabled => (
                StatusCode::BAD_REQUEST,
                "二要素認証は既に有効です".to_string(),
            ),
            Self::TotpNotEnabled => (
                StatusCode::BAD_REQUEST,
                "二要素認証が有効化されていません".to_string(),
            ),
            Self::TotpInvalid => (
                StatusCode::BAD_REQUEST,
                "TOTPコードが正しくありません".to_string(),
            ),
            Self::UsernameOrEmailTaken => (
                StatusCode::CONFLICT,
                "このユーザー名またはメールアドレスは既に使用されています".to_string(),
            ),
            Self::Validation(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            Self::Database(e) => {
                tracing::error!(error = ?e, "データベースエラー");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "内部エラーが発生しました".to_string(),
                )
            }
            Self::Internal(e) => {
                tracing::error!(error = ?e, "内部エラー");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "内部エラーが発生しました".to_string(),
                )
            }
        };

        (status, Json(ErrorResponse { error: message })).into_response()
    }
}
