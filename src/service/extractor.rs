use crate::models::{ConsumptionEvent, ExtractOutcome, RejectedRecord, SessionRecordRow};
use serde_json::Value;

/// 项目编码字段别名, 按固定优先级尝试, 第一个非空值生效
const CODE_ALIASES: [&str; 3] = ["itemCode", "productCode", "code"];

/// 批量提取: 原始消耗记录 -> 规范化消耗事件
/// 纯变换, 无副作用; 单条记录解析失败只记日志计数, 不影响兄弟记录
pub fn extract(records: &[SessionRecordRow]) -> ExtractOutcome {
    let mut outcome = ExtractOutcome::default();

    for record in records {
        let Some(payload) = record.payload.as_deref() else {
            continue;   // 无消耗数据的笔记, 正常情况
        };
        if payload.trim().is_empty() {
            continue;
        }

        let value: Value = match serde_json::from_str(payload) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(
                    "记录 {} 消耗数据解析失败, 已跳过: {}",
                    record.record_id, e
                );
                outcome.parse_failures += 1;
                continue;
            }
        };

        let elements = match flatten_payload(value) {
            Ok(els) => els,
            Err(e) => {
                tracing::warn!(
                    "记录 {} 内嵌字符串解析失败, 已跳过: {}",
                    record.record_id, e
                );
                outcome.parse_failures += 1;
                continue;
            }
        };

        for element in elements {
            extract_element(record, element, &mut outcome);
        }
    }

    outcome
}

/// 形态归一: string | object | array | 单元素嵌套 array -> 元素列表
/// 字符串编码只解一层; 单元素数组包裹另一个数组时只拆一层
fn flatten_payload(value: Value) -> Result<Vec<Value>, serde_json::Error> {
    let value = match value {
        Value::String(s) => serde_json::from_str(&s)?,
        other => other,
    };

    Ok(match value {
        Value::Array(mut arr) => {
            if arr.len() == 1 && arr[0].is_array() {
                match arr.remove(0) {
                    Value::Array(inner) => inner,
                    _ => unreachable!(),
                }
            } else {
                arr
            }
        }
        other => vec![other],
    })
}

/// 单个元素 -> 事件或拒绝记录 (总数守恒)
/// 元素本身是字符串编码的对象时同样只解一层; 解不开保留原文走拒绝路径
fn extract_element(record: &SessionRecordRow, element: Value, outcome: &mut ExtractOutcome) {
    let element = match element {
        Value::String(s) => match serde_json::from_str::<Value>(&s) {
            Ok(parsed) => parsed,
            Err(_) => Value::String(s),
        },
        other => other,
    };

    match resolve_item_code(&element) {
        Some(code) => outcome.events.push(ConsumptionEvent {
            normalized_item_code: code,
            quantity: resolve_quantity(&element),
            source_record_id: record.record_id,
            completed: record.completed(),
        }),
        None => {
            tracing::warn!("记录 {} 存在无法解析编码的元素, 已拒绝", record.record_id);
            outcome.rejected.push(RejectedRecord {
                source_record_id: record.record_id,
                raw: element,
            });
        }
    }
}

/// 按别名优先级解析项目编码并归一化 (去空白 + 小写)
fn resolve_item_code(element: &Value) -> Option<String> {
    let obj = element.as_object()?;
    CODE_ALIASES.iter().find_map(|alias| {
        let raw = match obj.get(*alias)? {
            Value::String(s) => s.clone(),
            Value::Number(n) => n.to_string(),
            _ => return None,
        };
        let normalized = raw.trim().to_lowercase();
        (!normalized.is_empty()).then_some(normalized)
    })
}

/// 数量强转: 数字或数字字符串; 非正/非有限时默认为 1
fn resolve_quantity(element: &Value) -> i64 {
    let raw = element.get("quantity").and_then(|v| match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    });

    match raw {
        Some(q) if q.is_finite() && q > 0.0 => (q.round() as i64).max(1),
        _ => 1,
    }
}
