use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::models::TrustedDevice;

const DEVICE_COLUMNS: &str = r#"
    id, account_id, fingerprint, label, ip, created_at, last_used_at, expires_at
"#;

#[derive(Clone)]
pub struct TrustedDeviceRepository {
    pool: PgPool,
}

impl TrustedDeviceRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// 有効期限内のデバイスを (アカウント, フィンガープリント) で検索
    pub async fn find_active(
        &self,
        account_id: Uuid,
        fingerprint: &str,
    ) -> Result<Option<TrustedDevice>, sqlx::Error> {
        let sql = format!(
            r#"
            SELECT {DEVICE_COLUMNS}
            FROM trusted_devices
            WHERE account_id = $1 AND fingerprint = $2 AND expires_at > NOW()
            "#
        );
        sqlx::query_as::<_, TrustedDevice>(&sql)
            .bind(account_id)
            .bind(fingerprint)
            .fetch_optional(&self.pool)
            .await
    }

    /// デバイスIDで検索（所有者チェックは呼び出し側で行う）
    pub async fn find_by_id(
        &self,
        device_id: Uuid,
    ) -> Result<Option<TrustedDevice>, sqlx::Error> {
        let sql = format!(
            r#"
            SELECT {DEVICE_COLUMNS}
            FROM trusted_devices
            WHERE id = $1
            "#
        );
        sqlx::query_as::<_, TrustedDevice>(&sql)
            .bind(device_id)
            .fetch_optional(&self.pool)
            .await
    }

    /// デバイス信頼を登録（既存フィンガープリントは有効期限を更新）
    pub async fn upsert(
        &self,
        account_id: Uuid,
        fingerprint: &str,
        label: &str,
        ip: Option<&str>,
        expires_at: OffsetDateTime,
    ) -> Result<TrustedDevice, sqlx::Error> {
        let sql = format!(
            r#"
            INSERT INTO trusted_devices (account_id, fingerprint, label, ip, expires_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (account_id, fingerprint)
            DO UPDATE SET label = EXCLUDED.label,
                          ip = EXCLUDED.ip,
                          last_used_at = NOW(),
                          expires_at = EXCLUDED.expires_at
            RETURNING {DEVICE_COLUMNS}
            "#
        );
        sqlx::query_as::<_, TrustedDevice>(&sql)
            .bind(account_id)
            .bind(fingerprint)
            .bind(label)
            .bind(ip)
            .bind(expires_at)
            .fetch_one(&self.pool)
            .await
    }

    /// 最終使用日時を更新（信頼済みデバイスでの2FA省略時）
    pub async fn touch(&self, device_id: Uuid) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE trusted_devices
            SET last_used_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(device_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// アカウントのデバイス一覧（最終使用日時の降順）
    pub async fn list(&self, account_id: Uuid) -> Result<Vec<TrustedDevice>, sqlx::Error> {
        let sql = format!(
            r#"
            SELECT {DEVICE_COLUMNS}
            FROM trusted_devices
            WHERE account_id = $1
            ORDER BY last_used_at DESC
            "#
        );
        sqlx::query_as::<_, TrustedDevice>(&sql)
            .bind(account_id)
            .fetch_all(&self.pool)
            .await
    }

    /// デバイスを削除
    pub async fn delete(&self, device_id: Uuid) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            DELETE FROM trusted_devices
            WHERE id = $1
            "#,
        )
        .bind(device_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// アカウントの全デバイスを削除（パスワードリセット・全端末サインアウト時）
    pub async fn delete_all(&self, account_id: Uuid) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            DELETE FROM trusted_devices
            WHERE account_id = $1
            "#,
        )
        .bind(account_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
