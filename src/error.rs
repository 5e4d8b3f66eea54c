use thiserror::Error;

/// 对账引擎错误分类
/// 连接/查询错误对整次运行是致命的; 计划缺失/冲突只对单个客户致命;
/// 单条记录解析失败和单项写入失败不算错误, 走计数上报 (见 ExtractOutcome / ApplyStats)
#[derive(Debug, Error)]
pub enum ReconError {
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),

    #[error("client {0} has no active funding plan")]
    NoActivePlan(i64),

    #[error("client {client_id} has {count} active funding plans, expected exactly one")]
    MultipleActivePlans { client_id: i64, count: usize },
}
