use argon2::password_hash::SaltString;
use argon2::password_hash::rand_core::OsRng;
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use serde::Serialize;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::{Account, AccountStatus, Role};
use crate::repositories::AccountRepository;
use crate::services::backup_code::is_low_count;
use crate::services::{
    BackupCodeService, SetupPayload, SetupTokenStore, TokenService, TotpService,
    TrustedDeviceService,
};

/// タイミング攻撃対策用のダミーハッシュ
///
/// ユーザーが存在しない場合もこのハッシュに対して検証を実行し、
/// 応答時間からユーザーの存在有無を推測できなくする。
pub(crate) const DUMMY_HASH: &str = "$argon2id$v=19$m=19456,t=2,p=1$c29tZXNhbHQ$RWh6";

/// パスワードをargon2idでハッシュ化
pub fn hash_password(password: &str) -> Result<String, AppError> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();
    let hash = argon2
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| {
            tracing::error!(error = ?e, "パスワードハッシュ生成エラー");
            AppError::Internal(anyhow::anyhow!("password hash error"))
        })?;
    Ok(hash.to_string())
}

/// パスワードを検証
///
/// 不正な形式のハッシュでもエラーにせず false を返す。
pub fn verify_password(password: &str, hash: &str) -> bool {
    match PasswordHash::new(hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(_) => false,
    }
}

/// ログイン試行の入力
#[derive(Debug)]
pub struct LoginAttempt {
    /// ユーザー名またはメールアドレス（大文字小文字を区別しない）
    pub username_or_email: String,
    pub password: String,
    /// TOTPコードまたはバックアップコード
    pub code: Option<String>,
    /// クライアント提示のデバイスフィンガープリント
    pub device_fingerprint: Option<String>,
    /// 「このデバイスを信頼する」の要求
    pub trust_device: bool,
    pub user_agent: Option<String>,
    pub ip: Option<String>,
}

/// ログイン成功時のユーザー概要
#[derive(Debug, Serialize)]
pub struct UserSummary {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub roles: Vec<String>,
    pub totp_enabled: bool,
}

impl From<&Account> for UserSummary {
    fn from(account: &Account) -> Self {
        Self {
            id: account.id,
            username: account.username.clone(),
            email: account.email.clone(),
            roles: account.roles(),
            totp_enabled: account.totp_enabled,
        }
    }
}

/// ログイン成功時の発行内容
#[derive(Debug, Serialize)]
pub struct LoginSuccess {
    pub access_token: String,
    pub refresh_token: String,
    pub access_token_ttl_secs: i64,
    pub refresh_token_ttl_secs: i64,
    pub user: UserSummary,
    /// バックアップコードで認証した場合の残数（それ以外は None）
    pub backup_codes_remaining: Option<i64>,
    /// 残数が少ない（1〜3）場合のみ true。0は使い切りで警告対象外
    pub backup_codes_low: bool,
}

/// ログインの業務上の帰結
///
/// 「2FAが必要」等はエラーではなく正常系の分岐なので、
/// 例外ではなくタグ付きの結果型で呼び出し側に返す。
#[derive(Debug)]
pub enum LoginOutcome {
    Success(Box<LoginSuccess>),
    /// 2FAコードの提出が必要
    Requires2fa,
    /// 2FAが未設定（利用開始前に設定必須のポリシー）
    Requires2faSetup,
    /// 管理者の初回ログイン: 資格情報変更とTOTP登録が必要
    RequiresCredentialChange { setup_token: String },
}

/// 認証オーケストレーター
///
/// ログイン状態機械の本体。資格情報検証 → アカウント状態チェック →
/// 初回ログイン分岐 → 2FA/信頼済みデバイス判定 → トークン発行を担う。
#[derive(Clone)]
pub struct AuthService {
    account_repo: AccountRepository,
    totp_service: TotpService,
    token_service: TokenService,
    backup_code_service: BackupCodeService,
    trusted_device_service: TrustedDeviceService,
    setup_token_store: SetupTokenStore,
}

impl AuthService {
    pub fn new(
        account_repo: AccountRepository,
        totp_service: TotpService,
        token_service: TokenService,
        backup_code_service: BackupCodeService,
        trusted_device_service: TrustedDeviceService,
        setup_token_store: SetupTokenStore,
    ) -> Self {
        Self {
            account_repo,
            totp_service,
            token_service,
            backup_code_service,
            trusted_device_service,
            setup_token_store,
        }
    }

    /// ログイン状態機械を実行
    ///
    /// 処理フロー:
    /// 1. ユーザー名/メールでアカウント検索（不在でもダミー検証を実行）
    /// 2. アカウント状態チェック（無効化・承認待ち・ロール未割当）
    /// 3. パスワード検証、成功時に最終ログイン日時を更新
    /// 4. 管理者初回ログイン分岐（セットアップトークン発行、トークンは発行しない）
    /// 5. 2FA未設定チェック
    /// 6. 信頼済みデバイス判定（一致すれば2FA省略）
    /// 7. 2FAコード検証（TOTP → バックアップコードの順でフォールバック）
    /// 8. 要求があればデバイス信頼登録
    /// 9. アクセス/リフレッシュトークン発行
    pub async fn login(&self, attempt: LoginAttempt) -> Result<LoginOutcome, AppError> {
        // 1. アカウント検索
        let account = match self
            .account_repo
            .find_by_username_or_email(&attempt.username_or_email)
            .await?
        {
            Some(account) => account,
            None => {
                // タイミング攻撃対策: 不在でもダミー検証を実行
                let _ = verify_password(&attempt.password, DUMMY_HASH);
                tracing::warn!("ログイン失敗: アカウント不在");
                return Err(AppError::IncorrectCredentials);
            }
        };

        // 2. アカウント状態チェック
        if account.status == AccountStatus::Inactive || !account.active {
            tracing::warn!(account_id = %account.id, "ログイン失敗: アカウント無効");
            return Err(AppError::AccountInactive);
        }
        if account.status == AccountStatus::Pending {
            tracing::warn!(account_id = %account.id, "ログイン失敗: 承認待ち");
            return Err(AppError::AccountPending);
        }
        let Some(role) = account.role else {
            tracing::warn!(account_id = %account.id, "ログイン失敗: ロール未割当");
            return Err(AppError::AccountHasNoRole);
        };

        // 3. パスワード検証
        if !verify_password(&attempt.password, &account.password_hash) {
            tracing::warn!(account_id = %account.id, "ログイン失敗: パスワード不一致");
            return Err(AppError::IncorrectCredentials);
        }
        self.account_repo.update_last_login(account.id).await?;

        // 4. 管理者初回ログイン分岐
        //    フラグが立っていても管理者以外はこの分岐に入らない
        if role == Role::Admin && account.requires_credential_change {
            return self.begin_credential_change(&account).await;
        }

        // 5. 2FA未設定チェック
        if !account.totp_enabled {
            tracing::info!(account_id = %account.id, "ログイン: 2FA設定が必要");
            return Ok(LoginOutcome::Requires2faSetup);
        }

        // 6. 信頼済みデバイス判定
        let mut via_trusted_device = false;
        if let Some(fingerprint) = &attempt.device_fingerprint
            && self
                .trusted_device_service
                .is_trusted(account.id, fingerprint)
                .await?
        {
            via_trusted_device = true;
        }

        // 7. 2FAコード検証
        let mut backup_codes_remaining = None;
        if !via_trusted_device {
            let Some(code) = attempt.code.as_deref() else {
                return Ok(LoginOutcome::Requires2fa);
            };
            backup_codes_remaining = self.verify_second_factor(&account, code).await?;
        }

        // 8. デバイス信頼登録
        if attempt.trust_device
            && let Some(fingerprint) = &attempt.device_fingerprint
        {
            self.trusted_device_service
                .trust(
                    account.id,
                    fingerprint,
                    attempt.user_agent.as_deref(),
                    attempt.ip.as_deref(),
                )
                .await?;
        }

        // 9. トークン発行
        let access_token = self.token_service.issue_access_token(&account)?;
        let refresh_token = self.token_service.issue_refresh_token(&account)?;

        tracing::info!(account_id = %account.id, "ログイン成功");

        let backup_codes_low = backup_codes_remaining.is_some_and(is_low_count);

        Ok(LoginOutcome::Success(Box::new(LoginSuccess {
            access_token,
            refresh_token,
            access_token_ttl_secs: self.token_service.access_ttl_secs(),
            refresh_token_ttl_secs: self.token_service.refresh_ttl_secs(),
            user: UserSummary::from(&account),
            backup_codes_remaining,
            backup_codes_low,
        })))
    }

    /// 管理者初回ログイン: TOTPシークレットとQRコードを用意し、
    /// セットアップトークンを発行する。アクセストークンは発行しない。
    async fn begin_credential_change(&self, account: &Account) -> Result<LoginOutcome, AppError> {
        let secret = match &account.totp_secret_encrypted {
            Some(encrypted) => self.totp_service.decrypt_secret(encrypted)?,
            None => {
                let secret = TotpService::generate_secret();
                let encrypted = self.totp_service.encrypt_secret(&secret)?;
                self.account_repo
                    .set_totp_secret(account.id, &encrypted)
                    .await?;
                secret
            }
        };

        let qr_code = self.totp_service.generate_qr_code(&account.email, &secret)?;

        let setup_token = self.setup_token_store.create(SetupPayload {
            account_id: account.id,
            username: account.username.clone(),
            secret,
            qr_code,
        });

        tracing::info!(account_id = %account.id, "管理者初回ログイン: セットアップトークン発行");

        Ok(LoginOutcome::RequiresCredentialChange { setup_token })
    }

    /// 第2要素の検証（TOTP → バックアップコードの順）
    ///
    /// バックアップコードで認証した場合は残数を返す。
    async fn verify_second_factor(
        &self,
        account: &Account,
        code: &str,
    ) -> Result<Option<i64>, AppError> {
        let encrypted = account
            .totp_secret_encrypted
            .as_deref()
            .ok_or_else(|| AppError::Internal(anyhow::anyhow!("totp enabled without secret")))?;
        let secret = self.totp_service.decrypt_secret(encrypted)?;

        if self.totp_service.verify_code(&secret, code)? {
            return Ok(None);
        }

        // TOTP不一致ならバックアップコードとして消費を試みる
        if self
            .backup_code_service
            .verify_and_consume(account.id, code)
            .await?
        {
            let remaining = self.backup_code_service.available_count(account.id).await?;
            if is_low_count(remaining) {
                tracing::warn!(
                    account_id = %account.id,
                    remaining = remaining,
                    "バックアップコードの残数が少ない"
                );
            }
            return Ok(Some(remaining));
        }

        tracing::warn!(account_id = %account.id, "ログイン失敗: 認証コード不一致");
        Err(AppError::InvalidAuthenticationCode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_and_verify_roundtrip() {
        let hash = hash_password("correct horse battery staple").unwrap();
        assert!(verify_password("correct horse battery staple", &hash));
        assert!(!verify_password("wrong password", &hash));
    }

    #[test]
    fn test_verify_malformed_hash_returns_false() {
        // 不正なハッシュ形式でもエラーにせず false
        assert!(!verify_password("anything", "invalid_hash_format"));
        assert!(!verify_password("anything", ""));
    }

    #[test]
    fn test_dummy_hash_is_parseable_shape() {
        // ダミーハッシュは検証に失敗するだけでパニックしないこと
        assert!(!verify_password("password123", DUMMY_HASH));
    }
}
