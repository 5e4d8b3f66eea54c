use crate::models::{ClientRunStats, ForecastParams, ForecastPoint, RunSummary};
use crate::service::{ForecastService, ReconcilerService};
use axum::{
    extract::{Json, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// 请求体: 客户ID列表 + 是否执行修正写入
#[derive(Debug, Deserialize)]
pub struct ReconcileBatchRequest {
    pub client_ids: Vec<i64>,
    #[serde(default)]
    pub apply: bool,
}

/// 对账响应体 (含逐客户统计)
#[derive(Debug, Serialize)]
pub struct ReconcileBatchResponse {
    pub success: bool,
    pub message: String,
    pub summary: RunSummary,
    pub stats: Vec<ClientRunStats>,
}

/// 预测接口查询参数: as_of 缺省为今天
#[derive(Debug, Deserialize)]
pub struct ForecastQuery {
    pub as_of: Option<NaiveDate>,
}

#[derive(Debug, Serialize)]
pub struct ForecastErrorResponse {
    pub success: bool,
    pub message: String,
}

/// 预测接口共享状态
pub struct ForecastApi {
    pub service: ForecastService,
    pub params: ForecastParams,
}

/// 健康检查
pub async fn health_check() -> &'static str {
    "OK"
}

/// 批量对账接口: dry-run 或 apply 由请求体决定
pub async fn reconcile_batch(
    State(service): State<Arc<ReconcilerService>>,
    Json(req): Json<ReconcileBatchRequest>,
) -> Response {
    let (summary, stats) = service.sweep(&req.client_ids, req.apply).await;

    let success = summary.clients_failed < req.client_ids.len() || req.client_ids.is_empty();
    let message = format!(
        "processed {} clients ({} failed), {} discrepancies, {} fixed",
        summary.clients_processed,
        summary.clients_failed,
        summary.discrepancies_found,
        summary.items_fixed
    );

    let status = if success {
        StatusCode::OK
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };
    let response = ReconcileBatchResponse {
        success,
        message,
        summary,
        stats,
    };
    (status, Json(response)).into_response()
}

/// 预测曲线接口: 供图表/报表层消费的有序 ForecastPoint 序列
pub async fn forecast_client(
    State(api): State<Arc<ForecastApi>>,
    Path(client_id): Path<i64>,
    Query(query): Query<ForecastQuery>,
) -> Response {
    let as_of = query.as_of.unwrap_or_else(|| Utc::now().date_naive());

    match api.service.forecast_client(client_id, as_of, &api.params).await {
        Ok(points) => (StatusCode::OK, Json::<Vec<ForecastPoint>>(points)).into_response(),
        Err(e) => {
            let response = ForecastErrorResponse {
                success: false,
                message: format!("Error: {}", e),
            };
            (StatusCode::INTERNAL_SERVER_ERROR, Json(response)).into_response()
        }
    }
}
