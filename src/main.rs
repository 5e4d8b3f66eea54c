use budget_recon_rust::db::queries;
use budget_recon_rust::{create_pool, AppConfig, ReconcilerService};
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::info;
use tracing_subscriber::fmt::time::ChronoLocal;

/// 预算对账批处理: 按客户核对资助项目的期望用量与账面用量
#[derive(Debug, Parser)]
#[command(name = "budget-recon-rust")]
#[command(about = "Budget utilization reconciliation sweep")]
struct Cli {
    /// 处理所有持有活跃计划的客户
    #[arg(long, conflicts_with = "client")]
    all: bool,

    /// 只处理指定客户
    #[arg(long)]
    client: Option<i64>,

    /// 执行修正写入 (缺省为 dry-run, 只报告差异)
    #[arg(long)]
    apply: bool,

    /// 逐项明细输出
    #[arg(long, short)]
    verbose: bool,

    /// 差异报告导出路径 (CSV)
    #[arg(long)]
    csv: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // 初始化日志 - 本地时间格式; verbose 模式放开 DEBUG 级别的逐项明细
    let max_level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt()
        .with_timer(ChronoLocal::new("%Y-%m-%d %H:%M:%S".to_string()))
        .with_target(true)
        .with_level(true)
        .with_max_level(max_level)
        .init();

    let config = AppConfig::from_env();

    // 连接失败对整次运行是致命的
    let pool = match create_pool(&config.database).await {
        Ok(pool) => pool,
        Err(e) => {
            tracing::error!("数据库连接失败: {}", e);
            return ExitCode::FAILURE;
        }
    };
    info!("Database pool created");

    // 目标客户集: --client 单客户, 否则全量扫描
    let client_ids = match cli.client {
        Some(id) => vec![id],
        None => {
            if !cli.all {
                tracing::error!("必须指定 --all 或 --client <id>");
                return ExitCode::FAILURE;
            }
            match queries::list_active_client_ids(&pool).await {
                Ok(ids) => ids,
                Err(e) => {
                    tracing::error!("查询活跃客户失败: {}", e);
                    return ExitCode::FAILURE;
                }
            }
        }
    };

    let mode = if cli.apply { "apply" } else { "dry-run" };
    info!("开始对账: {} 个客户, 模式 {}", client_ids.len(), mode);

    let service = ReconcilerService::new(pool);
    let (summary, stats) = service.sweep(&client_ids, cli.apply).await;

    if let Some(path) = &cli.csv {
        match queries::export_discrepancies_csv(&stats, path) {
            Ok(()) => info!("差异报告已导出: {}", path.display()),
            Err(e) => tracing::error!("CSV 导出失败: {}", e),
        }
    }

    // 固定输出运行汇总, 区分 "没有差异" / "没有匹配" / "跑挂了"
    println!("clients processed: {}", summary.clients_processed);
    println!("clients failed:    {}", summary.clients_failed);
    println!("discrepancies:     {}", summary.discrepancies_found);
    if cli.apply {
        println!("items fixed:       {}", summary.items_fixed);
        println!("write failures:    {}", summary.write_failures);
    }

    // 至少一个客户成功完成对账才算成功; 全军覆没返回非零
    if summary.clients_processed == 0 && summary.clients_failed > 0 {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}
