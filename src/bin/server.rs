use axum::{
    routing::{get, post},
    Router,
};
use budget_recon_rust::api::{self, ForecastApi};
use budget_recon_rust::{create_pool, AppConfig, ForecastService, ReconcilerService};
use std::sync::Arc;
use tower::ServiceBuilder;
use tracing::info;
use tracing_subscriber::fmt::time::ChronoLocal;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 初始化日志 - 使用本地时间格式
    tracing_subscriber::fmt()
        .with_timer(ChronoLocal::new("%Y-%m-%d %H:%M:%S".to_string()))
        .with_target(true)
        .with_level(true)
        .init();

    // 加载配置
    let config = AppConfig::from_env();
    info!("Starting server with config: {:?}", config);

    // 创建数据库连接池
    let pool = create_pool(&config.database).await?;
    info!("Database pool created");

    // 对账与预测两个服务
    let reconciler = Arc::new(ReconcilerService::new(pool.clone()));
    let forecast_api = Arc::new(ForecastApi {
        service: ForecastService::new(pool),
        params: config.forecast,
    });

    // 构建路由
    let recon_routes = Router::new()
        .route("/api/reconcile/batch", post(api::reconcile_batch))
        .with_state(reconciler);

    let forecast_routes = Router::new()
        .route("/api/forecast/:client_id", get(api::forecast_client))
        .with_state(forecast_api);

    let app = Router::new()
        .route("/health", get(api::health_check))
        .merge(recon_routes)
        .merge(forecast_routes)
        .layer(ServiceBuilder::new());

    // 启动服务器
    let addr = format!("{}:{}", config.server.host, config.server.port);
    info!("Server listening on {}", addr);
    info!("API Endpoints:");
    info!("  POST /api/reconcile/batch          - reconcile clients (dry-run or apply)");
    info!("  GET  /api/forecast/:client_id      - fund utilization forecast series");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
