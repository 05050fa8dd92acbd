use rand::Rng;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::AppError;
use crate::repositories::BackupCodeRepository;

/// 1バッチあたりのコード数
pub const BACKUP_CODE_COUNT: usize = 8;
/// 残数警告のしきい値（1〜3で警告、0は「使い切り」で警告対象外）
pub const LOW_COUNT_THRESHOLD: i64 = 3;

/// コード生成に使う文字集合（紛らわしい文字を含まないBase32アルファベット）
const CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ234567";
/// ハイフン区切り前後の文字数（XXXX-XXXX）
const CODE_HALF_LEN: usize = 4;

/// 2FAバックアップコードサービス
///
/// # Security
/// - 平文コードは生成時に一度だけ返し、DBにはSHA-256ハッシュのみ保存
/// - 消費は consumed フラグを条件に含むUPDATEで行い、二重消費を防ぐ
#[derive(Clone)]
pub struct BackupCodeService {
    repo: BackupCodeRepository,
}

impl BackupCodeService {
    pub fn new(repo: BackupCodeRepository) -> Self {
        Self { repo }
    }

    /// バックアップコードを新規発行（8個）
    ///
    /// 平文コードはこの戻り値でのみ取得可能。呼び出し側は即座に
    /// ユーザーへ表示し、以後再取得できないことを伝えること。
    pub async fn generate(&self, account_id: Uuid) -> Result<Vec<String>, AppError> {
        let codes: Vec<String> = (0..BACKUP_CODE_COUNT).map(|_| generate_code()).collect();
        let hashes: Vec<String> = codes.iter().map(|c| hash_code(c)).collect();

        self.repo.insert_batch(account_id, &hashes).await?;

        tracing::info!(account_id = %account_id, count = codes.len(), "バックアップコード発行");

        Ok(codes)
    }

    /// 既存コードをすべて無効化して新しいバッチを発行
    pub async fn regenerate(&self, account_id: Uuid) -> Result<Vec<String>, AppError> {
        self.repo.delete_all(account_id).await?;
        self.generate(account_id).await
    }

    /// コードを検証し、一致すればアトミックに消費する
    ///
    /// 不一致・消費済みの場合は副作用なしで false を返す。
    pub async fn verify_and_consume(
        &self,
        account_id: Uuid,
        submitted: &str,
    ) -> Result<bool, AppError> {
        let hash = hash_code(submitted);
        let consumed = self.repo.consume(account_id, &hash).await?;

        if consumed {
            tracing::info!(account_id = %account_id, "バックアップコード消費");
        }

        Ok(consumed)
    }

    /// 未使用コード数
    pub async fn available_count(&self, account_id: Uuid) -> Result<i64, AppError> {
        Ok(self.repo.count_unconsumed(account_id).await?)
    }

    /// アカウントの全コードを削除（2FA無効化時）
    pub async fn invalidate_all(&self, account_id: Uuid) -> Result<(), AppError> {
        self.repo.delete_all(account_id).await?;
        Ok(())
    }
}

/// 残数警告を出すべきか
///
/// 0は「使い切った」という別の終端状態なので警告しない。
pub fn is_low_count(count: i64) -> bool {
    (1..=LOW_COUNT_THRESHOLD).contains(&count)
}

/// XXXX-XXXX 形式のランダムコードを生成
fn generate_code() -> String {
    let mut rng = rand::thread_rng();
    let mut pick = |n: usize| -> String {
        (0..n)
            .map(|_| CODE_ALPHABET[rng.gen_range(0..CODE_ALPHABET.len())] as char)
            .collect()
    };
    let head = pick(CODE_HALF_LEN);
    let tail = pick(CODE_HALF_LEN);
    format!("{}-{}", head, tail)
}

/// コードを正規化（大文字化・区切り除去）してSHA-256でハッシュ化
fn hash_code(code: &str) -> String {
    let normalized: String = code
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '-')
        .collect::<String>()
        .to_ascii_uppercase();

    let mut hasher = Sha256::new();
    hasher.update(normalized.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_code_format() {
        let code = generate_code();
        assert_eq!(code.len(), CODE_HALF_LEN * 2 + 1);
        let parts: Vec<&str> = code.split('-').collect();
        assert_eq!(parts.len(), 2);
        for part in parts {
            assert_eq!(part.len(), CODE_HALF_LEN);
            assert!(
                part.bytes().all(|b| CODE_ALPHABET.contains(&b)),
                "unexpected char in {}",
                code
            );
        }
    }

    #[test]
    fn test_hash_code_normalization() {
        // 大文字小文字・ハイフン・空白の揺れを吸収する
        assert_eq!(hash_code("ABCD-EFGH"), hash_code("abcdefgh"));
        assert_eq!(hash_code("ABCD-EFGH"), hash_code(" ABCD EFGH "));
        assert_ne!(hash_code("ABCD-EFGH"), hash_code("ABCD-EFGI"));
    }

    #[test]
    fn test_hash_code_is_sha256_hex() {
        let hash = hash_code("ABCD-EFGH");
        assert_eq!(hash.len(), 64);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_is_low_count_boundaries() {
        // 0は終端状態であって「残りわずか」ではない
        assert!(!is_low_count(0));
        assert!(is_low_count(1));
        assert!(is_low_count(2));
        assert!(is_low_count(3));
        assert!(!is_low_count(4));
        assert!(!is_low_count(BACKUP_CODE_COUNT as i64));
    }
}
