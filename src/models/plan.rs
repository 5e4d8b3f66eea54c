use bigdecimal::BigDecimal;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// 资助计划主表 (FundingPlan)
/// 每个客户同一时间只允许一个活跃计划, 由读取层校验 (见 queries::get_active_plan)
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct FundingPlan {
    pub id: i64,
    pub client_id: i64,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub total_funds: BigDecimal,
    pub is_active: bool,
}

impl FundingPlan {
    /// 计划总天数
    pub fn duration_days(&self) -> i64 {
        (self.end_date - self.start_date).num_days()
    }
}

/// 资助项目明细行 (FundedItem)
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct FundedItem {
    pub id: i64,
    pub plan_id: i64,          // 关联计划ID
    pub item_code: String,     // 项目编码 (匹配时忽略大小写和空白)
    pub description: String,
    pub unit_price: BigDecimal,
    pub total_quantity: i64,   // 核定数量
    pub used_quantity: i64,    // 已用数量, 仅由对账 apply 写入
}

impl FundedItem {
    /// 归一化编码: 去空白 + 小写
    pub fn normalized_code(&self) -> String {
        self.item_code.trim().to_lowercase()
    }
}
