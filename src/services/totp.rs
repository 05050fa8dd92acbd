use aes_gcm::{
    Aes256Gcm, KeyInit, Nonce,
    aead::{Aead, OsRng},
};
use data_encoding::BASE32;
use rand::RngCore;
use totp_rs::{Algorithm, TOTP};

use crate::error::AppError;

/// TOTPの時間ステップ（秒）
const TOTP_PERIOD: u64 = 30;
/// 許容する時間ステップのずれ（前後1ステップ = ±30秒）
const TOTP_SKEW: u8 = 1;
/// コード桁数
const TOTP_DIGITS: usize = 6;

/// TOTP (Time-based One-Time Password) サービス
///
/// RFC 6238 準拠（SHA-1 / 6桁 / 30秒ステップ）。
/// SHA-1 を使うのは市販の認証アプリがそのまま読める otpauth URI にするため。
///
/// # Security
/// - シークレットはAES-256-GCMで暗号化してDB保存
/// - シークレット平文はログに出力しない
#[derive(Clone)]
pub struct TotpService {
    issuer: String,
    encryption_key: [u8; 32],
}

impl TotpService {
    /// 新しい TotpService を作成
    ///
    /// # Arguments
    /// * `issuer` - TOTP発行者名（認証アプリに表示されるラボ名）
    /// * `encryption_key_base64` - Base64エンコードされた32バイトの暗号化キー
    pub fn new(issuer: String, encryption_key_base64: &str) -> Result<Self, AppError> {
        use base64::{Engine as _, engine::general_purpose::STANDARD};

        let key_bytes = STANDARD.decode(encryption_key_base64).map_err(|e| {
            tracing::error!(error = ?e, "暗号化キーのBase64デコードエラー");
            AppError::Internal(anyhow::anyhow!("invalid encryption key format"))
        })?;

        if key_bytes.len() != 32 {
            tracing::error!(
                expected = 32,
                actual = key_bytes.len(),
                "暗号化キーの長さが不正"
            );
            return Err(AppError::Internal(anyhow::anyhow!(
                "encryption key must be 32 bytes"
            )));
        }

        let mut encryption_key = [0u8; 32];
        encryption_key.copy_from_slice(&key_bytes);

        Ok(Self {
            issuer,
            encryption_key,
        })
    }

    /// 20バイトのランダムシークレットを生成し、Base32でエンコード
    pub fn generate_secret() -> String {
        let mut bytes = [0u8; 20];
        rand::thread_rng().fill_bytes(&mut bytes);
        BASE32.encode(&bytes)
    }

    /// シークレットをAES-256-GCMで暗号化
    ///
    /// # Returns
    /// 96ビットnonce (12バイト) + 暗号文
    pub fn encrypt_secret(&self, secret: &str) -> Result<Vec<u8>, AppError> {
        let cipher = Aes256Gcm::new_from_slice(&self.encryption_key).map_err(|e| {
            tracing::error!(error = ?e, "AES-GCM暗号化器の初期化エラー");
            AppError::Internal(anyhow::anyhow!("cipher initialization error"))
        })?;

        let mut nonce_bytes = [0u8; 12];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher.encrypt(nonce, secret.as_bytes()).map_err(|e| {
            tracing::error!(error = ?e, "シークレット暗号化エラー");
            AppError::Internal(anyhow::anyhow!("encryption error"))
        })?;

        let mut result = Vec::with_capacity(12 + ciphertext.len());
        result.extend_from_slice(&nonce_bytes);
        result.extend_from_slice(&ciphertext);

        Ok(result)
    }

    /// 暗号化されたシークレットを復号
    pub fn decrypt_secret(&self, encrypted: &[u8]) -> Result<String, AppError> {
        if encrypted.len() < 12 {
            tracing::error!(len = encrypted.len(), "暗号化データが短すぎる");
            return Err(AppError::Internal(anyhow::anyhow!(
                "encrypted data too short"
            )));
        }

        let cipher = Aes256Gcm::new_from_slice(&self.encryption_key).map_err(|e| {
            tracing::error!(error = ?e, "AES-GCM暗号化器の初期化エラー");
            AppError::Internal(anyhow::anyhow!("cipher initialization error"))
        })?;

        let (nonce_bytes, ciphertext) = encrypted.split_at(12);
        let nonce = Nonce::from_slice(nonce_bytes);

        let plaintext = cipher.decrypt(nonce, ciphertext).map_err(|e| {
            tracing::error!(error = ?e, "シークレット復号エラー");
            AppError::Internal(anyhow::anyhow!("decryption error"))
        })?;

        String::from_utf8(plaintext).map_err(|e| {
            tracing::error!(error = ?e, "復号データのUTF-8変換エラー");
            AppError::Internal(anyhow::anyhow!("invalid utf8 after decryption"))
        })
    }

    /// QRコードを生成（PNG形式、Base64エンコード）
    ///
    /// # Arguments
    /// * `label` - アカウント識別子（認証アプリに表示される）
    /// * `secret` - Base32エンコードされたシークレット
    pub fn generate_qr_code(&self, label: &str, secret: &str) -> Result<String, AppError> {
        let totp = self.build_totp(secret, Some(label))?;

        let qr_code = totp.get_qr_base64().map_err(|e| {
            tracing::error!(error = %e, "QRコード生成エラー");
            AppError::Internal(anyhow::anyhow!("qr code generation error"))
        })?;

        Ok(qr_code)
    }

    /// 現在の時間ステップのコードを返す
    pub fn current_code(&self, secret: &str) -> Result<String, AppError> {
        self.code_at(secret, unix_now()?)
    }

    /// 指定時刻における6桁コードを返す
    pub fn code_at(&self, secret: &str, timestamp: u64) -> Result<String, AppError> {
        let totp = self.build_totp(secret, None)?;
        Ok(totp.generate(timestamp))
    }

    /// 現在の時間ステップの残り秒数
    pub fn remaining_seconds(&self) -> Result<u64, AppError> {
        let now = unix_now()?;
        Ok(TOTP_PERIOD - (now % TOTP_PERIOD))
    }

    /// TOTPコードを検証（前後1ステップの時間ウィンドウを許容）
    ///
    /// 6桁の数字でない入力はエラーにせず false を返す。
    pub fn verify_code(&self, secret: &str, code: &str) -> Result<bool, AppError> {
        self.verify_code_at(secret, code, unix_now()?)
    }

    /// 指定時刻を基準にTOTPコードを検証（テストからも使用）
    pub fn verify_code_at(
        &self,
        secret: &str,
        code: &str,
        timestamp: u64,
    ) -> Result<bool, AppError> {
        if code.len() != TOTP_DIGITS || !code.chars().all(|c| c.is_ascii_digit()) {
            return Ok(false);
        }

        let totp = self.build_totp(secret, None)?;

        // check は内部で skew を考慮して前後のステップも検証する
        Ok(totp.check(code, timestamp))
    }

    /// TOTP オブジェクトを作成
    ///
    /// label が Some の場合は otpauth URI 用（QRコード生成）、
    /// None の場合は検証専用。
    fn build_totp(&self, secret: &str, label: Option<&str>) -> Result<TOTP, AppError> {
        let secret_bytes = BASE32.decode(secret.as_bytes()).map_err(|e| {
            tracing::error!(error = ?e, "シークレットのBase32デコードエラー");
            AppError::Internal(anyhow::anyhow!("invalid base32 secret"))
        })?;

        let (issuer, account_name) = match label {
            Some(label) => (Some(self.issuer.clone()), label.to_string()),
            None => (None, String::new()),
        };

        TOTP::new(
            Algorithm::SHA1,
            TOTP_DIGITS,
            TOTP_SKEW,
            TOTP_PERIOD,
            secret_bytes,
            issuer,
            account_name,
        )
        .map_err(|e| {
            tracing::error!(error = %e, "TOTP作成エラー");
            AppError::Internal(anyhow::anyhow!("totp creation error"))
        })
    }
}

/// 現在のUNIX時刻（秒）
fn unix_now() -> Result<u64, AppError> {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .map_err(|e| {
            tracing::error!(error = ?e, "システム時刻取得エラー");
            AppError::Internal(anyhow::anyhow!("system time error"))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::{Engine as _, engine::general_purpose::STANDARD};

    fn create_test_service() -> TotpService {
        let key = [0u8; 32];
        let key_base64 = STANDARD.encode(key);
        TotpService::new("SeedLab".to_string(), &key_base64).unwrap()
    }

    #[test]
    fn test_generate_secret() {
        let secret = TotpService::generate_secret();
        // Base32エンコードされた20バイト = 32文字
        assert_eq!(secret.len(), 32);
        assert!(
            secret
                .chars()
                .all(|c| "ABCDEFGHIJKLMNOPQRSTUVWXYZ234567".contains(c))
        );
    }

    #[test]
    fn test_encrypt_decrypt_secret() {
        let service = create_test_service();
        let original = TotpService::generate_secret();

        let encrypted = service.encrypt_secret(&original).unwrap();
        // 12バイトnonce + 暗号文 + 16バイトtag
        assert!(encrypted.len() > 12);

        let decrypted = service.decrypt_secret(&encrypted).unwrap();
        assert_eq!(original, decrypted);
    }

    #[test]
    fn test_generate_qr_code() {
        let service = create_test_service();
        let secret = TotpService::generate_secret();

        let qr_base64 = service.generate_qr_code("analista@lab.example", &secret).unwrap();
        assert!(!qr_base64.is_empty());
    }

    #[test]
    fn test_verify_invalid_code_format() {
        let service = create_test_service();
        let secret = TotpService::generate_secret();

        // 6桁でない
        assert!(!service.verify_code(&secret, "12345").unwrap());
        // 数字以外を含む
        assert!(!service.verify_code(&secret, "12345a").unwrap());
        // 空文字
        assert!(!service.verify_code(&secret, "").unwrap());
    }

    #[test]
    fn test_verify_clock_skew_window() {
        let service = create_test_service();
        let secret = TotpService::generate_secret();

        // ステップ境界から離れた基準時刻（ステップ中央）
        let base = 1_700_000_000u64 - (1_700_000_000u64 % TOTP_PERIOD) + TOTP_PERIOD / 2;
        let code = service.code_at(&secret, base).unwrap();

        // ±1ステップは許容
        assert!(service.verify_code_at(&secret, &code, base).unwrap());
        assert!(
            service
                .verify_code_at(&secret, &code, base - TOTP_PERIOD)
                .unwrap()
        );
        assert!(
            service
                .verify_code_at(&secret, &code, base + TOTP_PERIOD)
                .unwrap()
        );

        // ±2ステップは拒否
        assert!(
            !service
                .verify_code_at(&secret, &code, base - 2 * TOTP_PERIOD)
                .unwrap()
        );
        assert!(
            !service
                .verify_code_at(&secret, &code, base + 2 * TOTP_PERIOD)
                .unwrap()
        );
    }

    #[test]
    fn test_remaining_seconds_in_range() {
        let service = create_test_service();
        let remaining = service.remaining_seconds().unwrap();
        assert!(remaining >= 1 && remaining <= TOTP_PERIOD);
    }

    #[test]
    fn test_new_with_invalid_key_length() {
        let short_key = STANDARD.encode([0u8; 16]);
        let result = TotpService::new("SeedLab".to_string(), &short_key);
        assert!(result.is_err());
    }

    #[test]
    fn test_new_with_invalid_base64() {
        let result = TotpService::new("SeedLab".to_string(), "not-valid-base64!!!");
        assert!(result.is_err());
    }
}
