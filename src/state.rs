use std::sync::Arc;

use secrecy::ExposeSecret;
use sqlx::PgPool;

use crate::config::Config;
use crate::error::AppError;
use crate::repositories::{AccountRepository, BackupCodeRepository, TrustedDeviceRepository};
use crate::services::{
    AuthService, BackupCodeService, EmailService, RecoveryService, SetupTokenStore, TokenService,
    TotpService, TrustedDeviceService,
};

/// アプリケーション共有状態
///
/// axum の State として全ハンドラーで共有される。
/// Clone は必須（axum が内部で clone するため）。
#[derive(Clone)]
pub struct AppState {
    /// PostgreSQL コネクションプール
    pub db_pool: PgPool,
    /// アプリケーション設定（Arc で共有）
    pub config: Arc<Config>,
    /// アカウントリポジトリ
    pub account_repo: AccountRepository,
    /// TOTPサービス
    pub totp_service: TotpService,
    /// JWT発行・検証サービス
    pub token_service: TokenService,
    /// バックアップコードサービス
    pub backup_code_service: BackupCodeService,
    /// 信頼済みデバイスサービス
    pub trusted_device_service: TrustedDeviceService,
    /// リカバリーコード（パスワードリセット）サービス
    pub recovery_service: RecoveryService,
    /// セットアップトークンストア
    pub setup_token_store: SetupTokenStore,
    /// 認証オーケストレーター
    pub auth_service: AuthService,
}

impl AppState {
    /// 新しい AppState を作成
    pub fn new(db_pool: PgPool, config: Config) -> Result<Self, AppError> {
        let config = Arc::new(config);

        let account_repo = AccountRepository::new(db_pool.clone());
        let backup_code_repo = BackupCodeRepository::new(db_pool.clone());
        let trusted_device_repo = TrustedDeviceRepository::new(db_pool.clone());

        let totp_service = TotpService::new(
            config.totp_issuer.clone(),
            config.encryption_key.expose_secret(),
        )?;
        let token_service = TokenService::new(
            config.jwt_secret.expose_secret(),
            config.access_token_ttl_secs,
            config.refresh_token_ttl_secs,
        )?;
        let backup_code_service = BackupCodeService::new(backup_code_repo);
        let trusted_device_service = TrustedDeviceService::new(
            trusted_device_repo.clone(),
            config.trusted_device_ttl_days,
        );
        let email_service = EmailService::new(config.clone());
        let recovery_service = RecoveryService::new(
            account_repo.clone(),
            trusted_device_repo,
            email_service,
            totp_service.clone(),
            config.recovery_code_ttl_secs,
        );
        let setup_token_store = SetupTokenStore::new(config.setup_token_ttl_secs);

        let auth_service = AuthService::new(
            account_repo.clone(),
            totp_service.clone(),
            token_service.clone(),
            backup_code_service.clone(),
            trusted_device_service.clone(),
            setup_token_store.clone(),
        );

        Ok(Self {
            db_pool,
            config,
            account_repo,
            totp_service,
            token_service,
            backup_code_service,
            trusted_device_service,
            recovery_service,
            setup_token_store,
            auth_service,
        })
    }
}
