use secrecy::SecretBox;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct Config {
    pub database_url: SecretBox<String>,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,

    // 2FA (TOTP) 設定
    /// TOTP発行者名（認証アプリに表示されるラボ名）
    pub totp_issuer: String,
    /// TOTPシークレット保存用のAES-256暗号化キー（Base64エンコード、32バイト）
    pub encryption_key: SecretBox<String>,

    // JWT 設定
    /// HS256署名キー（32バイト以上）
    pub jwt_secret: SecretBox<String>,
    #[serde(default = "default_access_token_ttl_secs")]
    pub access_token_ttl_secs: i64,
    #[serde(default = "default_refresh_token_ttl_secs")]
    pub refresh_token_ttl_secs: i64,

    // リカバリーコード / セットアップトークン設定
    #[serde(default = "default_recovery_code_ttl_secs")]
    pub recovery_code_ttl_secs: i64,
    #[serde(default = "default_setup_token_ttl_secs")]
    pub setup_token_ttl_secs: i64,

    // 信頼済みデバイス設定
    #[serde(default = "default_trusted_device_ttl_days")]
    pub trusted_device_ttl_days: i64,

    // SMTP設定（オプション - email機能有効時のみ使用）
    #[serde(default)]
    pub smtp_host: Option<String>,
    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,
    pub smtp_username: Option<SecretBox<String>>,
    pub smtp_password: Option<SecretBox<String>>,
    #[serde(default)]
    pub smtp_from_address: Option<String>,

    // CORS設定（フロントエンドのオリジン、未設定時はCORSヘッダーなし）
    #[serde(default)]
    pub cors_allowed_origin: Option<String>,
}

const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 3000;
const DEFAULT_SMTP_PORT: u16 = 587;
const DEFAULT_ACCESS_TOKEN_TTL_SECS: i64 = 3600;
const DEFAULT_REFRESH_TOKEN_TTL_SECS: i64 = 7 * 24 * 3600;
const DEFAULT_RECOVERY_CODE_TTL_SECS: i64 = 600;
const DEFAULT_SETUP_TOKEN_TTL_SECS: i64 = 600;
const DEFAULT_TRUSTED_DEVICE_TTL_DAYS: i64 = 30;

fn default_host() -> String {
    DEFAULT_HOST.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_smtp_port() -> u16 {
    DEFAULT_SMTP_PORT
}

fn default_access_token_ttl_secs() -> i64 {
    DEFAULT_ACCESS_TOKEN_TTL_SECS
}

fn default_refresh_token_ttl_secs() -> i64 {
    DEFAULT_REFRESH_TOKEN_TTL_SECS
}

fn default_recovery_code_ttl_secs() -> i64 {
    DEFAULT_RECOVERY_CODE_TTL_SECS
}

fn default_setup_token_ttl_secs() -> i64 {
    DEFAULT_SETUP_TOKEN_TTL_SECS
}

fn default_trusted_device_ttl_days() -> i64 {
    DEFAULT_TRUSTED_DEVICE_TTL_DAYS
}

impl Config {
    pub fn load() -> Result<Self, envy::Error> {
        envy::from_env()
    }
}
