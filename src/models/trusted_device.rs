use serde::Serialize;
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

/// 信頼済みデバイス
///
/// 2FA成功後に「このデバイスを信頼する」を選択した場合に登録され、
/// 有効期限内であれば同じフィンガープリントからのログインは2FAを省略できる。
#[derive(Debug, FromRow, Serialize)]
pub struct TrustedDevice {
    pub id: Uuid,
    pub account_id: Uuid,
    /// クライアントが提示する不透明なフィンガープリント文字列
    pub fingerprint: String,
    /// User-Agent から導出した表示用ラベル
    pub label: String,
    pub ip: Option<String>,
    pub created_at: OffsetDateTime,
    pub last_used_at: OffsetDateTime,
    pub expires_at: OffsetDateTime,
}
