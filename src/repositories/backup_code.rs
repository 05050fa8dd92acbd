use sqlx::PgPool;
use uuid::Uuid;

#[derive(Clone)]
pub struct BackupCodeRepository {
    pool: PgPool,
}

impl BackupCodeRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// バックアップコードのハッシュをまとめて保存（1トランザクション）
    pub async fn insert_batch(
        &self,
        account_id: Uuid,
        code_hashes: &[String],
    ) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        for hash in code_hashes {
            sqlx::query(
                r#"
                INSERT INTO backup_codes (account_id, code_hash)
                VALUES ($1, $2)
                "#,
            )
            .bind(account_id)
            .bind(hash)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// 未使用のコードを消費する（アトミックな条件付きUPDATE）
    ///
    /// consumed = false を条件に含めることで、同一コードの同時消費を
    /// DBレベルで防ぐ。更新行数が0なら不一致または消費済み。
    pub async fn consume(&self, account_id: Uuid, code_hash: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE backup_codes
            SET consumed = true, consumed_at = NOW()
            WHERE account_id = $1 AND code_hash = $2 AND consumed = false
            "#,
        )
        .bind(account_id)
        .bind(code_hash)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// アカウントの全バックアップコードを削除（再生成・2FA無効化時）
    pub async fn delete_all(&self, account_id: Uuid) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            DELETE FROM backup_codes
            WHERE account_id = $1
            "#,
        )
        .bind(account_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// 未使用コード数を取得
    pub async fn count_unconsumed(&self, account_id: Uuid) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*)
            FROM backup_codes
            WHERE account_id = $1 AND consumed = false
            "#,
        )
        .bind(account_id)
        .fetch_one(&self.pool)
        .await
    }
}
