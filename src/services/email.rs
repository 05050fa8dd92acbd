use std::sync::Arc;

use crate::config::Config;
use crate::error::AppError;

/// メール送信サービス
///
/// `email` フィーチャー有効時かつSMTP設定ありの場合は lettre で送信し、
/// それ以外はログ出力のみ（開発モード）。
#[derive(Clone)]
pub struct EmailService {
    config: Arc<Config>,
}

impl EmailService {
    /// 新しい EmailService を作成
    pub fn new(config: Arc<Config>) -> Self {
        Self { config }
    }

    /// パスワードリセット用リカバリーコードを送信
    pub async fn send_recovery_code(&self, to: &str, code: &str) -> Result<(), AppError> {
        #[cfg(feature = "email")]
        if self.smtp_configured() {
            return self.send_via_smtp(to, code).await;
        }

        // 開発モード: メール送信せずログ出力のみ。
        // 平文コードは debug 限定（本番は info 以上で運用し、平文コードを
        // ログに残さないルールを守る）
        tracing::info!(to = %to, "リカバリーコード送信（開発モード）");
        tracing::debug!("リカバリーコード: {}", code);

        Ok(())
    }

    #[cfg(feature = "email")]
    fn smtp_configured(&self) -> bool {
        self.config.smtp_host.is_some()
            && self.config.smtp_username.is_some()
            && self.config.smtp_password.is_some()
            && self.config.smtp_from_address.is_some()
    }

    #[cfg(feature = "email")]
    async fn send_via_smtp(&self, to: &str, code: &str) -> Result<(), AppError> {
        use lettre::transport::smtp::authentication::Credentials;
        use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
        use secrecy::ExposeSecret;

        let host = self.config.smtp_host.as_deref().unwrap_or_default();
        let from = self.config.smtp_from_address.as_deref().unwrap_or_default();

        let message = Message::builder()
            .from(from.parse().map_err(|e| {
                tracing::error!(error = ?e, "送信元アドレスのパースエラー");
                AppError::Internal(anyhow::anyhow!("invalid from address"))
            })?)
            .to(to.parse().map_err(|e| {
                tracing::error!(error = ?e, "宛先アドレスのパースエラー");
                AppError::Internal(anyhow::anyhow!("invalid to address"))
            })?)
            .subject("パスワードリセットのご案内")
            .body(format!(
                "パスワードリセット用のリカバリーコード: {}\n\nこのコードの有効期限は発行から10分です。心当たりがない場合はこのメールを破棄してください。",
                code
            ))
            .map_err(|e| {
                tracing::error!(error = ?e, "メール本文の構築エラー");
                AppError::Internal(anyhow::anyhow!("mail build error"))
            })?;

        let credentials = Credentials::new(
            self.config
                .smtp_username
                .as_ref()
                .map(|u| u.expose_secret().clone())
                .unwrap_or_default(),
            self.config
                .smtp_password
                .as_ref()
                .map(|p| p.expose_secret().clone())
                .unwrap_or_default(),
        );

        let mailer = AsyncSmtpTransport::<Tokio1Executor>::relay(host)
            .map_err(|e| {
                tracing::error!(error = ?e, "SMTPトランスポートの構築エラー");
                AppError::Internal(anyhow::anyhow!("smtp transport error"))
            })?
            .credentials(credentials)
            .port(self.config.smtp_port)
            .build();

        mailer.send(message).await.map_err(|e| {
            tracing::error!(error = ?e, "メール送信エラー");
            AppError::Internal(anyhow::anyhow!("mail send error"))
        })?;

        tracing::info!(to = %to, "リカバリーコードメール送信完了");

        Ok(())
    }
}
