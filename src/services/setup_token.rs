use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::RngCore;
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

/// セットアップトークンに紐づくペイロード
///
/// 管理者初回ログイン時のTOTP登録フローをQRコードと結びつける。
#[derive(Debug, Clone)]
pub struct SetupPayload {
    pub account_id: Uuid,
    pub username: String,
    /// Base32エンコードされたTOTPシークレット（平文、表示用）
    pub secret: String,
    /// Base64エンコードされたQRコードPNG
    pub qr_code: String,
}

struct SetupEntry {
    payload: SetupPayload,
    expires_at: OffsetDateTime,
}

/// セットアップトークンストア（プロセス内メモリ）
///
/// トークンは単一消費: consume は成否にかかわらずエントリを削除するため、
/// 2回目の consume は常に None を返す。
///
/// # Note
/// 複数ノード構成では共有キャッシュへの置き換えが必要（スケール上の考慮点）。
#[derive(Clone)]
pub struct SetupTokenStore {
    entries: Arc<Mutex<HashMap<String, SetupEntry>>>,
    ttl_secs: i64,
}

impl SetupTokenStore {
    pub fn new(ttl_secs: i64) -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            ttl_secs,
        }
    }

    /// 新しいセットアップトークンを発行して保存
    pub fn create(&self, payload: SetupPayload) -> String {
        let token = generate_token();
        let expires_at = OffsetDateTime::now_utc() + Duration::seconds(self.ttl_secs);

        let mut entries = self.lock_entries();

        // ついでに期限切れエントリを掃除（バックグラウンドスイーパーは持たない）
        entries.retain(|_, e| e.expires_at > OffsetDateTime::now_utc());

        entries.insert(
            token.clone(),
            SetupEntry {
                payload,
                expires_at,
            },
        );

        token
    }

    /// トークンを消費してペイロードを返す
    ///
    /// エントリは読み出し時に必ず削除する。期限切れの場合も None。
    pub fn consume(&self, token: &str) -> Option<SetupPayload> {
        let mut entries = self.lock_entries();

        let entry = entries.remove(token)?;

        if entry.expires_at < OffsetDateTime::now_utc() {
            tracing::warn!("期限切れセットアップトークンの消費試行");
            return None;
        }

        Some(entry.payload)
    }

    /// ロックを取得する。poisoned でもマップ自体の整合性は保たれるため
    /// リクエストを落とさず続行する。
    fn lock_entries(&self) -> std::sync::MutexGuard<'_, HashMap<String, SetupEntry>> {
        self.entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

/// 32バイトのランダムトークンを生成（URLセーフBase64）
fn generate_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_payload() -> SetupPayload {
        SetupPayload {
            account_id: Uuid::new_v4(),
            username: "admin".to_string(),
            secret: "JBSWY3DPEHPK3PXP".to_string(),
            qr_code: "aGVsbG8=".to_string(),
        }
    }

    #[test]
    fn test_consume_returns_payload_once() {
        let store = SetupTokenStore::new(600);
        let payload = test_payload();
        let account_id = payload.account_id;

        let token = store.create(payload);

        let consumed = store.consume(&token).expect("first consume should succeed");
        assert_eq!(consumed.account_id, account_id);
        assert_eq!(consumed.username, "admin");

        // 2回目は必ず None
        assert!(store.consume(&token).is_none());
    }

    #[test]
    fn test_consume_unknown_token() {
        let store = SetupTokenStore::new(600);
        assert!(store.consume("no-such-token").is_none());
    }

    #[test]
    fn test_consume_expired_token() {
        // TTL負値 = 発行時点で期限切れ
        let store = SetupTokenStore::new(-1);
        let token = store.create(test_payload());
        assert!(store.consume(&token).is_none());
    }

    #[test]
    fn test_store_survives_poisoned_lock() {
        let store = SetupTokenStore::new(600);
        let payload = test_payload();
        let account_id = payload.account_id;
        let token = store.create(payload);

        // ロック保持中にパニックしたスレッドで Mutex を poisoned にする
        let poisoner = store.clone();
        let _ = std::thread::spawn(move || {
            let _guard = poisoner.entries.lock().unwrap();
            panic!("poison the lock");
        })
        .join();

        // poisoned 後も消費は継続できる
        let consumed = store.consume(&token).expect("consume after poison");
        assert_eq!(consumed.account_id, account_id);
    }

    #[test]
    fn test_tokens_are_unique() {
        let store = SetupTokenStore::new(600);
        let t1 = store.create(test_payload());
        let t2 = store.create(test_payload());
        assert_ne!(t1, t2);
    }
}
