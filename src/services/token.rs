use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::Account;

/// アクセストークンの type クレーム値
pub const TOKEN_TYPE_ACCESS: &str = "access";
/// リフレッシュトークンの type クレーム値
pub const TOKEN_TYPE_REFRESH: &str = "refresh";

/// JWTクレーム
///
/// token_type でアクセストークンとリフレッシュトークンを構造的に区別する。
/// リフレッシュトークンにはロール等のプロフィール情報を載せない。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// サブジェクト（ユーザー名）
    pub sub: String,
    /// アカウントID
    pub user_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub given_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub family_name: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub roles: Vec<String>,
    /// "access" または "refresh"
    pub token_type: String,
    /// 発行日時（UNIX秒）
    pub iat: i64,
    /// 有効期限（UNIX秒）
    pub exp: i64,
}

/// JWT発行・検証サービス（HS256）
#[derive(Clone)]
pub struct TokenService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    access_ttl_secs: i64,
    refresh_ttl_secs: i64,
}

impl TokenService {
    /// 新しい TokenService を作成
    ///
    /// # Arguments
    /// * `secret` - HS256署名キー（32バイト以上を要求）
    pub fn new(
        secret: &str,
        access_ttl_secs: i64,
        refresh_ttl_secs: i64,
    ) -> Result<Self, AppError> {
        if secret.len() < 32 {
            tracing::error!(len = secret.len(), "JWT署名キーが短すぎる");
            return Err(AppError::Internal(anyhow::anyhow!(
                "jwt secret must be at least 32 bytes"
            )));
        }

        Ok(Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            access_ttl_secs,
            refresh_ttl_secs,
        })
    }

    /// アクセストークンを発行（ロール・プロフィール入り、短命）
    pub fn issue_access_token(&self, account: &Account) -> Result<String, AppError> {
        let now = OffsetDateTime::now_utc().unix_timestamp();
        let claims = Claims {
            sub: account.username.clone(),
            user_id: account.id,
            email: Some(account.email.clone()),
            given_name: Some(account.given_name.clone()),
            family_name: Some(account.family_name.clone()),
            roles: account.roles(),
            token_type: TOKEN_TYPE_ACCESS.to_string(),
            iat: now,
            exp: now + self.access_ttl_secs,
        };

        self.sign(&claims)
    }

    /// リフレッシュトークンを発行（最小クレーム、長命）
    pub fn issue_refresh_token(&self, account: &Account) -> Result<String, AppError> {
        let now = OffsetDateTime::now_utc().unix_timestamp();
        let claims = Claims {
            sub: account.username.clone(),
            user_id: account.id,
            email: None,
            given_name: None,
            family_name: None,
            roles: Vec::new(),
            token_type: TOKEN_TYPE_REFRESH.to_string(),
            iat: now,
            exp: now + self.refresh_ttl_secs,
        };

        self.sign(&claims)
    }

    /// トークンをデコードし、署名・構造・有効期限を検証
    pub fn decode(&self, token: &str) -> Result<Claims, AppError> {
        decode::<Claims>(token, &self.decoding_key, &Validation::default())
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => AppError::TokenExpired,
                _ => AppError::TokenInvalid,
            })
    }

    /// アクセストークンとしてデコード（type クレーム不一致は TokenWrongType）
    pub fn decode_access(&self, token: &str) -> Result<Claims, AppError> {
        let claims = self.decode(token)?;
        if claims.token_type != TOKEN_TYPE_ACCESS {
            return Err(AppError::TokenWrongType);
        }
        Ok(claims)
    }

    /// リフレッシュトークンとしてデコード（type クレーム不一致は TokenWrongType）
    pub fn decode_refresh(&self, token: &str) -> Result<Claims, AppError> {
        let claims = self.decode(token)?;
        if claims.token_type != TOKEN_TYPE_REFRESH {
            return Err(AppError::TokenWrongType);
        }
        Ok(claims)
    }

    /// トークンが有効かどうか（不正な入力でもパニック・エラーにしない）
    pub fn is_valid(&self, token: &str) -> bool {
        self.decode(token).is_ok()
    }

    pub fn access_ttl_secs(&self) -> i64 {
        self.access_ttl_secs
    }

    pub fn refresh_ttl_secs(&self) -> i64 {
        self.refresh_ttl_secs
    }

    fn sign(&self, claims: &Claims) -> Result<String, AppError> {
        encode(&Header::default(), claims, &self.encoding_key).map_err(|e| {
            tracing::error!(error = ?e, "JWT署名エラー");
            AppError::Internal(anyhow::anyhow!("jwt signing error"))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AccountStatus, Role};

    const TEST_SECRET: &str = "0123456789abcdef0123456789abcdef";

    fn test_account() -> Account {
        let now = OffsetDateTime::now_utc();
        Account {
            id: Uuid::new_v4(),
            username: "analista1".to_string(),
            email: "analista1@lab.example".to_string(),
            password_hash: "unused".to_string(),
            given_name: "Ana".to_string(),
            family_name: "García".to_string(),
            role: Some(Role::Analyst),
            status: AccountStatus::Active,
            active: true,
            totp_secret_encrypted: None,
            totp_enabled: true,
            recovery_code_hash: None,
            recovery_code_expires_at: None,
            requires_credential_change: false,
            last_login_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn create_service() -> TokenService {
        TokenService::new(TEST_SECRET, 3600, 7 * 24 * 3600).unwrap()
    }

    #[test]
    fn test_new_with_short_secret() {
        let result = TokenService::new("short", 3600, 7200);
        assert!(result.is_err());
    }

    #[test]
    fn test_access_token_roundtrip() {
        let service = create_service();
        let account = test_account();

        let token = service.issue_access_token(&account).unwrap();
        let claims = service.decode_access(&token).unwrap();

        assert_eq!(claims.sub, account.username);
        assert_eq!(claims.user_id, account.id);
        assert_eq!(claims.email.as_deref(), Some("analista1@lab.example"));
        assert_eq!(claims.roles, vec!["analyst".to_string()]);
        assert_eq!(claims.token_type, TOKEN_TYPE_ACCESS);
        assert_eq!(claims.exp - claims.iat, 3600);
    }

    #[test]
    fn test_refresh_token_has_minimal_claims() {
        let service = create_service();
        let account = test_account();

        let token = service.issue_refresh_token(&account).unwrap();
        let claims = service.decode_refresh(&token).unwrap();

        assert_eq!(claims.token_type, TOKEN_TYPE_REFRESH);
        assert!(claims.email.is_none());
        assert!(claims.roles.is_empty());
    }

    #[test]
    fn test_token_type_isolation() {
        let service = create_service();
        let account = test_account();

        let access = service.issue_access_token(&account).unwrap();
        let refresh = service.issue_refresh_token(&account).unwrap();

        // アクセストークンをリフレッシュとして使えない（逆も同様）
        assert!(matches!(
            service.decode_refresh(&access),
            Err(AppError::TokenWrongType)
        ));
        assert!(matches!(
            service.decode_access(&refresh),
            Err(AppError::TokenWrongType)
        ));
    }

    #[test]
    fn test_tampered_signature_is_invalid() {
        let service = create_service();
        let account = test_account();

        let token = service.issue_access_token(&account).unwrap();
        let mut tampered = token.clone();
        // 署名部分の末尾1文字を差し替える
        let last = tampered.pop().unwrap();
        tampered.push(if last == 'A' { 'B' } else { 'A' });

        assert!(!service.is_valid(&tampered));
    }

    #[test]
    fn test_malformed_token_is_invalid() {
        let service = create_service();
        assert!(!service.is_valid(""));
        assert!(!service.is_valid("not.a.jwt"));
        assert!(!service.is_valid("garbage"));
    }

    #[test]
    fn test_expired_token() {
        // 有効期限を過去にしたトークン（デコード時のleewayを超える）
        let service = TokenService::new(TEST_SECRET, -300, -300).unwrap();
        let account = test_account();

        let token = service.issue_access_token(&account).unwrap();
        assert!(matches!(
            service.decode(&token),
            Err(AppError::TokenExpired)
        ));
        assert!(!service.is_valid(&token));
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let service = create_service();
        let other = TokenService::new("fedcba9876543210fedcba9876543210", 3600, 7200).unwrap();
        let account = test_account();

        let token = service.issue_access_token(&account).unwrap();
        assert!(!other.is_valid(&token));
    }
}
