use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

/// アカウントのロール
///
/// 管理者 / 分析担当者 / 閲覧者 の3種類のみ
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "account_role", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Analyst,
    Observer,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Analyst => "analyst",
            Self::Observer => "observer",
        }
    }
}

/// アカウントの状態
///
/// 登録直後は Pending、承認で Active になる。
/// 物理削除はせず Inactive に遷移させる。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "account_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum AccountStatus {
    Active,
    Pending,
    Inactive,
}

/// ユーザーアカウント
///
/// TOTPシークレットは AES-256-GCM で暗号化されて保存される。
/// パスワードハッシュ・シークレット・リカバリーコードはログ出力禁止。
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Account {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    #[serde(skip)]
    pub password_hash: String,
    pub given_name: String,
    pub family_name: String,
    pub role: Option<Role>,
    pub status: AccountStatus,
    /// 旧システム由来の有効フラグ（status と両方チェックする）
    pub active: bool,
    #[serde(skip)]
    pub totp_secret_encrypted: Option<Vec<u8>>,
    pub totp_enabled: bool,
    #[serde(skip)]
    pub recovery_code_hash: Option<String>,
    #[serde(skip)]
    pub recovery_code_expires_at: Option<OffsetDateTime>,
    /// シード投入された管理者の初回ログイン時に資格情報変更を強制するフラグ
    pub requires_credential_change: bool,
    pub last_login_at: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl Account {
    /// JWTクレーム用のロール一覧（単一ロールを配列にして返す）
    pub fn roles(&self) -> Vec<String> {
        self.role.iter().map(|r| r.as_str().to_string()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_as_str() {
        assert_eq!(Role::Admin.as_str(), "admin");
        assert_eq!(Role::Analyst.as_str(), "analyst");
        assert_eq!(Role::Observer.as_str(), "observer");
    }
}
