use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// 预测曲线参数
/// 节奏/漏诊系数是展示调优常量, 走配置而不是写死 (默认: 14天一次, 漏诊率0.2)
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ForecastParams {
    pub session_cadence_days: i64,
    pub miss_rate: f64,
}

impl Default for ForecastParams {
    fn default() -> Self {
        Self {
            session_cadence_days: 14,
            miss_rate: 0.2,
        }
    }
}

/// 预测时间轴上的一个点: 四条累计曲线
/// actual 只在 as_of 及之前有值; extension/correction 只在 as_of 及之后有值,
/// 且在 as_of 处三者相等 (连续性约束)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForecastPoint {
    pub date: NaiveDate,
    pub label: String,                          // 图表展示标签, 如 "Mar 2026"
    pub ideal_cumulative: f64,
    pub actual_cumulative: Option<f64>,
    pub extension_cumulative: Option<f64>,
    pub correction_cumulative: Option<f64>,
}
