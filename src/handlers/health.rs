use axum::Json;
use serde::Serialize;

/// ヘルスチェックレスポンス
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    /// サービス識別子（複数サービス構成のモニタリングで区別するため）
    pub service: &'static str,
    pub version: &'static str,
}

/// ヘルスチェックハンドラー
///
/// GET /api/health
///
/// 認証バックエンドの稼働確認。ロードバランサーと監視から叩かれるため
/// DBには触れず、プロセスの生存のみを返す。
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        service: env!("CARGO_PKG_NAME"),
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_health_check_reports_service_identity() {
        let response = health_check().await;
        assert_eq!(response.status, "ok");
        assert_eq!(response.service, "seedgate");
        assert_eq!(response.version, env!("CARGO_PKG_VERSION"));
    }
}
