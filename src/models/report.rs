use bigdecimal::BigDecimal;
use serde::Serialize;
use std::collections::HashMap;

/// 差异记录 (Discrepancy): 期望用量与账面用量不一致
/// delta = expected_used - actual_used, 仅在非零时产生
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Discrepancy {
    pub item_id: i64,
    pub item_code: String,     // 归一化编码
    pub expected_used: i64,
    pub actual_used: i64,
    pub delta: i64,
}

/// 编码冲突: 两个项目归一化后编码相同, 属配置错误, 保留首次映射
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CodeCollision {
    pub normalized_code: String,
    pub kept_item_id: i64,
    pub duplicate_item_id: i64,
}

/// 超配警告: 对账后的用量 (账面与期望的较大者) 超过核定数量
/// 根因是上游数据录入问题, 只上报不自动修正
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OverAllocation {
    pub item_id: i64,
    pub item_code: String,
    pub used_quantity: i64,    // 超配口径下的用量
    pub total_quantity: i64,
}

/// 对账结果
#[derive(Debug, Clone, Default, Serialize)]
pub struct ReconcileOutcome {
    pub expected_by_item: HashMap<i64, i64>,
    pub discrepancies: Vec<Discrepancy>,
    pub collisions: Vec<CodeCollision>,
    pub over_allocations: Vec<OverAllocation>,
    pub matched_events: usize,
    pub unmatched_events: usize,   // 编码在目录中不存在
    pub excluded_events: usize,    // 会话/笔记未完成
}

/// 利用率汇总 (数量口径 + 金额口径)
#[derive(Debug, Clone, Serialize)]
pub struct UtilizationSummary {
    pub total_quantity: i64,
    pub used_quantity: i64,
    pub quantity_pct: f64,
    pub allocated_cost: BigDecimal,
    pub used_cost: BigDecimal,
    pub cost_pct: f64,
}

/// 修正写入统计: 逐项独立写入, 单项失败不回滚其他项
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct ApplyStats {
    pub applied: usize,
    pub failed: usize,
}

/// 单客户对账统计 (CLI 汇总 / HTTP 响应共用)
#[derive(Debug, Clone, Serialize)]
pub struct ClientRunStats {
    pub client_id: i64,
    pub plan_id: i64,
    pub items: usize,
    pub events: usize,
    pub rejected_records: usize,
    pub parse_failures: usize,
    pub unmatched_events: usize,
    pub excluded_events: usize,
    pub discrepancies: Vec<Discrepancy>,
    pub collisions: Vec<CodeCollision>,
    pub over_allocations: Vec<OverAllocation>,
    pub apply: Option<ApplyStats>,   // 仅 apply 模式填充
    pub utilization: UtilizationSummary,
}

/// 整次批处理汇总
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct RunSummary {
    pub clients_processed: usize,
    pub clients_failed: usize,
    pub discrepancies_found: usize,
    pub items_fixed: usize,
    pub write_failures: usize,
}
