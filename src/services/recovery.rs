use rand::Rng;
use sha2::{Digest, Sha256};
use time::{Duration, OffsetDateTime};

use crate::error::AppError;
use crate::repositories::{AccountRepository, TrustedDeviceRepository};
use crate::services::auth::hash_password;
use crate::services::{EmailService, TotpService};

/// リカバリーコードの文字数
const RECOVERY_CODE_LEN: usize = 8;
/// コード生成に使う文字集合
const CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ234567";

/// パスワードリセット（リカバリーコード）サービス
///
/// # Security
/// - リクエストはユーザー不在でも成功レスポンスを返す（列挙攻撃対策）
/// - コード平文・新パスワードはログに出力しない
/// - リセット成功時は全信頼済みデバイスを無条件で失効させる
#[derive(Clone)]
pub struct RecoveryService {
    account_repo: AccountRepository,
    trusted_device_repo: TrustedDeviceRepository,
    email_service: EmailService,
    totp_service: TotpService,
    code_ttl_secs: i64,
}

impl RecoveryService {
    pub fn new(
        account_repo: AccountRepository,
        trusted_device_repo: TrustedDeviceRepository,
        email_service: EmailService,
        totp_service: TotpService,
        code_ttl_secs: i64,
    ) -> Self {
        Self {
            account_repo,
            trusted_device_repo,
            email_service,
            totp_service,
            code_ttl_secs,
        }
    }

    /// コードの有効期間
    pub fn expiry_duration(&self) -> Duration {
        Duration::seconds(self.code_ttl_secs)
    }

    /// パスワードリセットをリクエスト
    ///
    /// 新しいコードの発行は既存コードを上書きする（アカウントあたり有効な
    /// コードは常に1つ）。ユーザーが存在しない場合も成功として扱う。
    pub async fn request_reset(&self, email: &str) -> Result<(), AppError> {
        tracing::info!(email = %email, "パスワードリセットリクエスト");

        let account = match self.account_repo.find_by_email(email).await? {
            Some(a) => a,
            None => {
                tracing::info!(email = %email, "リセット要求: ユーザー不在（成功レスポンス返却）");
                return Ok(());
            }
        };

        let code = generate_code();
        let code_hash = hash_code(&code);
        let expires_at = OffsetDateTime::now_utc() + self.expiry_duration();

        self.account_repo
            .set_recovery_code(account.id, &code_hash, expires_at)
            .await?;

        self.email_service
            .send_recovery_code(&account.email, &code)
            .await?;

        tracing::info!(account_id = %account.id, "リカバリーコード発行完了");

        Ok(())
    }

    /// パスワードをリセット
    ///
    /// リカバリーコードの期限・一致を確認し、TOTPが有効なアカウントでは
    /// TOTPコードも検証したうえでパスワードを更新する。
    pub async fn reset_password(
        &self,
        email: &str,
        recovery_code: &str,
        totp_code: Option<&str>,
        new_password: &str,
    ) -> Result<(), AppError> {
        let account = self
            .account_repo
            .find_by_email(email)
            .await?
            .ok_or(AppError::RecoveryCodeInvalid)?;

        let stored_hash = account
            .recovery_code_hash
            .as_deref()
            .ok_or(AppError::RecoveryCodeInvalid)?;
        let expires_at = account
            .recovery_code_expires_at
            .ok_or(AppError::RecoveryCodeInvalid)?;

        if is_expired(expires_at) {
            tracing::warn!(account_id = %account.id, "期限切れリカバリーコード");
            return Err(AppError::RecoveryCodeExpired);
        }

        if !verify_code(recovery_code, stored_hash) {
            tracing::warn!(account_id = %account.id, "リカバリーコード不一致");
            return Err(AppError::RecoveryCodeInvalid);
        }

        // TOTP有効ユーザーは第2要素の確認も必須
        if account.totp_enabled {
            let encrypted = account
                .totp_secret_encrypted
                .as_deref()
                .ok_or_else(|| AppError::Internal(anyhow::anyhow!("totp enabled without secret")))?;
            let secret = self.totp_service.decrypt_secret(encrypted)?;

            let code = totp_code.ok_or(AppError::TotpInvalid)?;
            if !self.totp_service.verify_code(&secret, code)? {
                tracing::warn!(account_id = %account.id, "リセット時のTOTPコード不一致");
                return Err(AppError::TotpInvalid);
            }
        }

        let password_hash = hash_password(new_password)?;
        self.account_repo
            .update_password(account.id, &password_hash)
            .await?;
        self.account_repo.clear_recovery_code(account.id).await?;

        // セキュリティ不変条件: パスワード変更時は全信頼済みデバイスを失効
        self.trusted_device_repo.delete_all(account.id).await?;

        tracing::info!(account_id = %account.id, "パスワードリセット完了（信頼済みデバイス全失効）");

        Ok(())
    }
}

/// ランダムなリカバリーコードを生成
pub fn generate_code() -> String {
    let mut rng = rand::thread_rng();
    (0..RECOVERY_CODE_LEN)
        .map(|_| CODE_ALPHABET[rng.gen_range(0..CODE_ALPHABET.len())] as char)
        .collect()
}

/// コードを正規化してSHA-256でハッシュ化
pub fn hash_code(code: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(code.trim().to_ascii_uppercase().as_bytes());
    format!("{:x}", hasher.finalize())
}

/// 提出されたコードを保存済みハッシュと比較
pub fn verify_code(submitted: &str, stored_hash: &str) -> bool {
    hash_code(submitted) == stored_hash
}

/// 有効期限切れかどうかの純粋な時刻比較
pub fn is_expired(expires_at: OffsetDateTime) -> bool {
    expires_at < OffsetDateTime::now_utc()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_code_format() {
        let code = generate_code();
        assert_eq!(code.len(), RECOVERY_CODE_LEN);
        assert!(code.bytes().all(|b| CODE_ALPHABET.contains(&b)));
    }

    #[test]
    fn test_verify_code_match() {
        let code = generate_code();
        let hash = hash_code(&code);
        assert!(verify_code(&code, &hash));
        // 小文字・前後空白の揺れも許容
        assert!(verify_code(&format!(" {} ", code.to_ascii_lowercase()), &hash));
    }

    #[test]
    fn test_verify_code_mismatch() {
        let hash = hash_code("AAAA2222");
        assert!(!verify_code("BBBB3333", &hash));
    }

    #[test]
    fn test_new_code_invalidates_old_hash() {
        // 新しいコードの発行 = ハッシュ上書き。旧コードは新ハッシュと一致しない
        let old_code = "AAAA2222";
        let new_code = "BBBB3333";
        let new_hash = hash_code(new_code);
        assert!(!verify_code(old_code, &new_hash));
        assert!(verify_code(new_code, &new_hash));
    }

    #[test]
    fn test_is_expired() {
        let past = OffsetDateTime::now_utc() - Duration::seconds(1);
        let future = OffsetDateTime::now_utc() + Duration::minutes(10);
        assert!(is_expired(past));
        assert!(!is_expired(future));
    }
}
