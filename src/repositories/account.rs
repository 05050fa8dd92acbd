use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::models::Account;

/// SELECT句の共通カラムリスト
const ACCOUNT_COLUMNS: &str = r#"
    id, username, email, password_hash, given_name, family_name,
    role, status, active, totp_secret_encrypted, totp_enabled,
    recovery_code_hash, recovery_code_expires_at,
    requires_credential_change, last_login_at, created_at, updated_at
"#;

#[derive(Clone)]
pub struct AccountRepository {
    pool: PgPool,
}

impl AccountRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// ユーザー名またはメールアドレスでアカウントを検索（大文字小文字を区別しない）
    pub async fn find_by_username_or_email(
        &self,
        identifier: &str,
    ) -> Result<Option<Account>, sqlx::Error> {
        let sql = format!(
            r#"
            SELECT {ACCOUNT_COLUMNS}
            FROM accounts
            WHERE LOWER(username) = LOWER($1) OR LOWER(email) = LOWER($1)
            "#
        );
        sqlx::query_as::<_, Account>(&sql)
            .bind(identifier)
            .fetch_optional(&self.pool)
            .await
    }

    /// メールアドレスでアカウントを検索（大文字小文字を区別しない）
    pub async fn find_by_email(&self, email: &str) -> Result<Option<Account>, sqlx::Error> {
        let sql = format!(
            r#"
            SELECT {ACCOUNT_COLUMNS}
            FROM accounts
            WHERE LOWER(email) = LOWER($1)
            "#
        );
        sqlx::query_as::<_, Account>(&sql)
            .bind(email)
            .fetch_optional(&self.pool)
            .await
    }

    /// アカウントIDでアカウントを検索
    pub async fn find_by_id(&self, account_id: Uuid) -> Result<Option<Account>, sqlx::Error> {
        let sql = format!(
            r#"
            SELECT {ACCOUNT_COLUMNS}
            FROM accounts
            WHERE id = $1
            "#
        );
        sqlx::query_as::<_, Account>(&sql)
            .bind(account_id)
            .fetch_optional(&self.pool)
            .await
    }

    /// 新しいアカウントを作成（status = pending、ロールなし）
    ///
    /// # Errors
    /// - UNIQUE制約違反時: `sqlx::Error::Database`
    ///   (constraint = "accounts_username_key" / "accounts_email_key")
    ///   呼び出し側で `AppError::UsernameOrEmailTaken` に変換すること
    pub async fn create(
        &self,
        username: &str,
        email: &str,
        password_hash: &str,
        given_name: &str,
        family_name: &str,
    ) -> Result<Account, sqlx::Error> {
        let sql = format!(
            r#"
            INSERT INTO accounts (username, email, password_hash, given_name, family_name, status)
            VALUES ($1, $2, $3, $4, $5, 'pending')
            RETURNING {ACCOUNT_COLUMNS}
            "#
        );
        sqlx::query_as::<_, Account>(&sql)
            .bind(username)
            .bind(email)
            .bind(password_hash)
            .bind(given_name)
            .bind(family_name)
            .fetch_one(&self.pool)
            .await
    }

    /// 最終ログイン日時を更新
    pub async fn update_last_login(&self, account_id: Uuid) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE accounts
            SET last_login_at = NOW(), updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(account_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// パスワードを更新
    ///
    /// # Note
    /// password_hash はログに出力しないこと
    pub async fn update_password(
        &self,
        account_id: Uuid,
        new_password_hash: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE accounts
            SET password_hash = $2, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(account_id)
        .bind(new_password_hash)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// 暗号化済みTOTPシークレットを保存（この時点では totp_enabled = false）
    pub async fn set_totp_secret(
        &self,
        account_id: Uuid,
        secret_encrypted: &[u8],
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE accounts
            SET totp_secret_encrypted = $2, totp_enabled = false, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(account_id)
        .bind(secret_encrypted)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// TOTPを有効化（シークレット保存済みであることが前提）
    pub async fn enable_totp(&self, account_id: Uuid) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE accounts
            SET totp_enabled = true, updated_at = NOW()
            WHERE id = $1 AND totp_secret_encrypted IS NOT NULL
            "#,
        )
        .bind(account_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// TOTPを無効化（シークレットも破棄する）
    pub async fn disable_totp(&self, account_id: Uuid) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE accounts
            SET totp_secret_encrypted = NULL, totp_enabled = false, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(account_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// リカバリーコードのハッシュと有効期限を保存（既存のコードは上書き）
    pub async fn set_recovery_code(
        &self,
        account_id: Uuid,
        code_hash: &str,
        expires_at: OffsetDateTime,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE accounts
            SET recovery_code_hash = $2, recovery_code_expires_at = $3, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(account_id)
        .bind(code_hash)
        .bind(expires_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// リカバリーコードを消去
    pub async fn clear_recovery_code(&self, account_id: Uuid) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE accounts
            SET recovery_code_hash = NULL, recovery_code_expires_at = NULL, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(account_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// 初回ログイン時の資格情報変更強制フラグを解除
    pub async fn clear_requires_credential_change(
        &self,
        account_id: Uuid,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE accounts
            SET requires_credential_change = false, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(account_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
