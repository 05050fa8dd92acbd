use http::HeaderMap;
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::TrustedDevice;
use crate::repositories::TrustedDeviceRepository;

/// User-Agent 判定ルール（先勝ち）
///
/// Edge の UA は "Chrome" も含むため、Edge は必ず Chrome より先に
/// 判定すること。同様に Chrome の UA は "Safari" を含むため、
/// Safari は Chrome より後。この並び順は仕様であり変更禁止。
const BROWSER_RULES: &[(&str, &str)] = &[
    ("Edg", "Edge"),
    ("Firefox", "Firefox"),
    ("Chrome", "Chrome"),
    ("Safari", "Safari"),
];

/// OS判定ルール（先勝ち）
///
/// Android の UA は "Linux" を含むため Linux より先に判定する。
const OS_RULES: &[(&str, &str)] = &[
    ("Windows", "Windows"),
    ("Android", "Android"),
    ("iPhone", "iOS"),
    ("iPad", "iOS"),
    ("Mac OS X", "macOS"),
    ("Linux", "Linux"),
];

/// User-Agent なし・判定不能時のラベル
const UNKNOWN_DEVICE_LABEL: &str = "不明なデバイス";

/// 信頼済みデバイスサービス
///
/// 2FA成功後のデバイス信頼登録と、以降のログインでの2FA省略判定を担う。
#[derive(Clone)]
pub struct TrustedDeviceService {
    repo: TrustedDeviceRepository,
    trust_ttl_days: i64,
}

impl TrustedDeviceService {
    pub fn new(repo: TrustedDeviceRepository, trust_ttl_days: i64) -> Self {
        Self {
            repo,
            trust_ttl_days,
        }
    }

    /// フィンガープリントが信頼済み（有効期限内）かどうか
    ///
    /// 一致した場合は最終使用日時を更新する。
    pub async fn is_trusted(&self, account_id: Uuid, fingerprint: &str) -> Result<bool, AppError> {
        match self.repo.find_active(account_id, fingerprint).await? {
            Some(device) => {
                self.repo.touch(device.id).await?;
                tracing::debug!(account_id = %account_id, device_id = %device.id, "信頼済みデバイスで2FA省略");
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// デバイスを信頼登録（既存なら有効期限を更新）
    pub async fn trust(
        &self,
        account_id: Uuid,
        fingerprint: &str,
        user_agent: Option<&str>,
        ip: Option<&str>,
    ) -> Result<TrustedDevice, AppError> {
        let label = device_label(user_agent);
        let expires_at = OffsetDateTime::now_utc() + Duration::days(self.trust_ttl_days);

        let device = self
            .repo
            .upsert(account_id, fingerprint, &label, ip, expires_at)
            .await?;

        tracing::info!(account_id = %account_id, device_id = %device.id, label = %label, "デバイス信頼登録");

        Ok(device)
    }

    /// デバイス一覧（最終使用日時の降順）
    pub async fn list(&self, account_id: Uuid) -> Result<Vec<TrustedDevice>, AppError> {
        Ok(self.repo.list(account_id).await?)
    }

    /// デバイスの信頼を取り消す
    ///
    /// デバイスが存在しない場合は冪等に成功として扱う。
    /// 他アカウントのデバイスを指定した場合のみエラー。
    pub async fn revoke(&self, account_id: Uuid, device_id: Uuid) -> Result<(), AppError> {
        let device = match self.repo.find_by_id(device_id).await? {
            Some(d) => d,
            None => {
                tracing::debug!(device_id = %device_id, "取り消し対象デバイス不在（冪等成功）");
                return Ok(());
            }
        };

        if device.account_id != account_id {
            tracing::warn!(
                account_id = %account_id,
                device_id = %device_id,
                "他アカウントのデバイス取り消し試行"
            );
            return Err(AppError::NotAuthorizedForDevice);
        }

        self.repo.delete(device_id).await?;
        tracing::info!(account_id = %account_id, device_id = %device_id, "デバイス信頼取り消し");

        Ok(())
    }

    /// アカウントの全デバイスの信頼を取り消す
    pub async fn revoke_all(&self, account_id: Uuid) -> Result<(), AppError> {
        self.repo.delete_all(account_id).await?;
        tracing::info!(account_id = %account_id, "全デバイスの信頼取り消し");
        Ok(())
    }
}

/// User-Agent から表示用ラベルを導出（ルール先勝ち）
pub fn device_label(user_agent: Option<&str>) -> String {
    let Some(ua) = user_agent else {
        return UNKNOWN_DEVICE_LABEL.to_string();
    };

    let browser = BROWSER_RULES
        .iter()
        .find(|(pattern, _)| ua.contains(pattern))
        .map(|(_, label)| *label);

    let os = OS_RULES
        .iter()
        .find(|(pattern, _)| ua.contains(pattern))
        .map(|(_, label)| *label);

    match (browser, os) {
        (Some(b), Some(o)) => format!("{} ({})", b, o),
        (Some(b), None) => b.to_string(),
        (None, Some(o)) => o.to_string(),
        (None, None) => UNKNOWN_DEVICE_LABEL.to_string(),
    }
}

/// クライアントIPの抽出
///
/// 優先順位: X-Forwarded-For の先頭エントリ > X-Real-IP > トランスポート層のピアアドレス
pub fn client_ip(headers: &HeaderMap, peer_ip: Option<std::net::IpAddr>) -> Option<String> {
    if let Some(forwarded) = headers.get("x-forwarded-for")
        && let Ok(value) = forwarded.to_str()
        && let Some(first) = value.split(',').next()
    {
        let first = first.trim();
        if !first.is_empty() {
            return Some(first.to_string());
        }
    }

    if let Some(real_ip) = headers.get("x-real-ip")
        && let Ok(value) = real_ip.to_str()
        && !value.trim().is_empty()
    {
        return Some(value.trim().to_string());
    }

    peer_ip.map(|ip| ip.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const EDGE_UA: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36 Edg/120.0.0.0";
    const CHROME_UA: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";
    const FIREFOX_UA: &str = "Mozilla/5.0 (X11; Linux x86_64; rv:121.0) Gecko/20100101 Firefox/121.0";
    const SAFARI_UA: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.1 Safari/605.1.15";
    const ANDROID_CHROME_UA: &str = "Mozilla/5.0 (Linux; Android 14; Pixel 8) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Mobile Safari/537.36";

    #[test]
    fn test_edge_detected_before_chrome() {
        // Edge の UA は "Chrome" を含むが Edge と判定されること
        assert_eq!(device_label(Some(EDGE_UA)), "Edge (Windows)");
    }

    #[test]
    fn test_chrome_detected_before_safari() {
        // Chrome の UA は "Safari" を含むが Chrome と判定されること
        assert_eq!(device_label(Some(CHROME_UA)), "Chrome (Windows)");
    }

    #[test]
    fn test_firefox_on_linux() {
        assert_eq!(device_label(Some(FIREFOX_UA)), "Firefox (Linux)");
    }

    #[test]
    fn test_safari_on_macos() {
        assert_eq!(device_label(Some(SAFARI_UA)), "Safari (macOS)");
    }

    #[test]
    fn test_android_detected_before_linux() {
        assert_eq!(device_label(Some(ANDROID_CHROME_UA)), "Chrome (Android)");
    }

    #[test]
    fn test_missing_user_agent() {
        assert_eq!(device_label(None), UNKNOWN_DEVICE_LABEL);
    }

    #[test]
    fn test_unrecognized_user_agent() {
        assert_eq!(device_label(Some("curl/8.4.0")), UNKNOWN_DEVICE_LABEL);
    }

    #[test]
    fn test_client_ip_forwarded_for_first_entry() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "203.0.113.7, 10.0.0.1".parse().unwrap());
        headers.insert("x-real-ip", "10.0.0.2".parse().unwrap());

        assert_eq!(client_ip(&headers, None), Some("203.0.113.7".to_string()));
    }

    #[test]
    fn test_client_ip_real_ip_fallback() {
        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", "198.51.100.4".parse().unwrap());

        assert_eq!(client_ip(&headers, None), Some("198.51.100.4".to_string()));
    }

    #[test]
    fn test_client_ip_peer_fallback() {
        let headers = HeaderMap::new();
        let peer: std::net::IpAddr = "192.0.2.10".parse().unwrap();

        assert_eq!(client_ip(&headers, Some(peer)), Some("192.0.2.10".to_string()));
        assert_eq!(client_ip(&headers, None), None);
    }
}
