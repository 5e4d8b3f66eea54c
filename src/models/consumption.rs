use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// 服务记录行: 会话 + 会话笔记联查结果
/// 完成状态过滤放在引擎侧, 这样被排除的事件可以计数上报
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct SessionRecordRow {
    pub record_id: i64,
    pub session_status: String,
    pub note_status: String,
    pub payload: Option<String>,   // 原始消耗数据 (JSON文本, 形态不定)
}

impl SessionRecordRow {
    /// 双侧完成判定: 会话和笔记都必须是 completed
    pub fn completed(&self) -> bool {
        self.session_status.trim().eq_ignore_ascii_case("completed")
            && self.note_status.trim().eq_ignore_ascii_case("completed")
    }
}

/// 规范化消耗事件 (ConsumptionEvent)
/// normalized_item_code 已去空白并小写; quantity 无效时默认为 1
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsumptionEvent {
    pub normalized_item_code: String,
    pub quantity: i64,
    pub source_record_id: i64,
    pub completed: bool,
}

/// 被拒绝的原始记录: 没有可解析的项目编码, 保留原文用于诊断
#[derive(Debug, Clone, Serialize)]
pub struct RejectedRecord {
    pub source_record_id: i64,
    pub raw: serde_json::Value,
}

/// 提取结果: 每个解码出的元素要么成为事件, 要么成为拒绝记录 (总数守恒)
#[derive(Debug, Clone, Default, Serialize)]
pub struct ExtractOutcome {
    pub events: Vec<ConsumptionEvent>,
    pub rejected: Vec<RejectedRecord>,
    pub parse_failures: usize,
}
