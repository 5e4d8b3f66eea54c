use crate::db::queries;
use crate::error::ReconError;
use crate::models::{
    ApplyStats, ClientRunStats, CodeCollision, ConsumptionEvent, Discrepancy, FundedItem,
    OverAllocation, ReconcileOutcome, RunSummary, UtilizationSummary,
};
use crate::service::extractor;
use bigdecimal::{BigDecimal, ToPrimitive, Zero};
use indexmap::IndexMap;
use sqlx::PgPool;
use std::collections::HashMap;

/// 台账对账服务: 期望用量 vs 账面用量, 差异检测 + 一次性修正写入
pub struct ReconcilerService {
    pool: PgPool,
}

impl ReconcilerService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// 批量对账入口: 逐客户处理, 单客户失败不影响其余客户
    pub async fn sweep(
        &self,
        client_ids: &[i64],
        apply: bool,
    ) -> (RunSummary, Vec<ClientRunStats>) {
        let mut summary = RunSummary::default();
        let mut all_stats = Vec::with_capacity(client_ids.len());

        for &client_id in client_ids {
            match self.reconcile_client(client_id, apply).await {
                Ok(stats) => {
                    summary.clients_processed += 1;
                    summary.discrepancies_found += stats.discrepancies.len();
                    if let Some(a) = stats.apply {
                        summary.items_fixed += a.applied;
                        summary.write_failures += a.failed;
                    }
                    all_stats.push(stats);
                }
                Err(e) => {
                    tracing::error!("客户 {} 对账失败: {}", client_id, e);
                    summary.clients_failed += 1;
                }
            }
        }

        (summary, all_stats)
    }

    /// 单客户对账: 计划 -> 项目目录 -> 消耗记录 -> 提取 -> 对账 -> (可选)修正写入
    pub async fn reconcile_client(
        &self,
        client_id: i64,
        apply: bool,
    ) -> Result<ClientRunStats, ReconError> {
        // 1. 读取活跃计划 (0 个或多个都属异常, 读取层大声失败)
        let plan = queries::get_active_plan(&self.pool, client_id).await?;

        // 2. 读取项目目录和计划期间内的消耗记录
        let items = queries::list_funded_items(&self.pool, plan.id).await?;
        let records = queries::list_session_records(
            &self.pool,
            client_id,
            plan.start_date,
            plan.end_date,
        )
        .await?;

        tracing::info!(
            "客户 {} 计划 {}: {} 个项目, {} 条消耗记录",
            client_id, plan.id, items.len(), records.len()
        );

        // 3. 提取规范化事件
        let extracted = extractor::extract(&records);

        // 4. 对账 (纯计算)
        let outcome = reconcile(&items, &extracted.events);

        for c in &outcome.collisions {
            tracing::warn!(
                "编码冲突: '{}' 同时出现在项目 {} 和 {}, 保留首次映射",
                c.normalized_code, c.kept_item_id, c.duplicate_item_id
            );
        }
        for o in &outcome.over_allocations {
            tracing::warn!(
                "超配警告: 项目 {} ('{}') 已用 {} 超过核定 {}, 需人工复核",
                o.item_id, o.item_code, o.used_quantity, o.total_quantity
            );
        }

        for d in &outcome.discrepancies {
            tracing::info!(
                "差异: 项目 {} ('{}') 期望 {} / 账面 {} / delta {:+}",
                d.item_id, d.item_code, d.expected_used, d.actual_used, d.delta
            );
        }

        // 逐项明细 (verbose 模式下 CLI 将日志级别调到 DEBUG 可见)
        for item in &items {
            let expected = outcome
                .expected_by_item
                .get(&item.id)
                .copied()
                .unwrap_or(0);
            tracing::debug!(
                "项目 {} ('{}'): 期望 {} / 账面 {} / 核定 {}",
                item.id, item.normalized_code(), expected, item.used_quantity, item.total_quantity
            );
        }

        // 5. apply 模式: 修正写入 (唯一允许改 used_quantity 的路径)
        let apply_stats = if apply && !outcome.discrepancies.is_empty() {
            Some(self.apply_corrections(&outcome.discrepancies).await)
        } else if apply {
            Some(ApplyStats::default())
        } else {
            None
        };

        let utilization = utilization_summary(&items, &outcome);
        tracing::info!(
            "利用率: 数量 {}/{} ({:.1}%), 金额 {}/{} ({:.1}%)",
            utilization.used_quantity,
            utilization.total_quantity,
            utilization.quantity_pct,
            utilization.used_cost,
            utilization.allocated_cost,
            utilization.cost_pct
        );

        tracing::info!(
            "客户 {} 对账完成: 差异 {}, 未匹配事件 {}, 被排除事件 {}, 拒绝记录 {}",
            client_id,
            outcome.discrepancies.len(),
            outcome.unmatched_events,
            outcome.excluded_events,
            extracted.rejected.len()
        );

        Ok(ClientRunStats {
            client_id,
            plan_id: plan.id,
            items: items.len(),
            events: extracted.events.len(),
            rejected_records: extracted.rejected.len(),
            parse_failures: extracted.parse_failures,
            unmatched_events: outcome.unmatched_events,
            excluded_events: outcome.excluded_events,
            discrepancies: outcome.discrepancies,
            collisions: outcome.collisions,
            over_allocations: outcome.over_allocations,
            apply: apply_stats,
            utilization,
        })
    }

    /// 修正写入: 对每个差异项执行一次条件更新 used_quantity = expected
    /// 逐项独立, 单项失败只计数不回滚; 条件守卫挡住并发对账互踩
    pub async fn apply_corrections(&self, discrepancies: &[Discrepancy]) -> ApplyStats {
        let mut stats = ApplyStats::default();

        for d in discrepancies {
            match queries::update_used_quantity(&self.pool, d.item_id, d.actual_used, d.expected_used)
                .await
            {
                Ok(true) => {
                    stats.applied += 1;
                    tracing::info!(
                        "项目 {} 已修正: used_quantity {} -> {}",
                        d.item_id, d.actual_used, d.expected_used
                    );
                }
                Ok(false) => {
                    stats.failed += 1;
                    tracing::error!(
                        "项目 {} 修正未命中: 账面值已不是 {}, 可能有并发运行",
                        d.item_id, d.actual_used
                    );
                }
                Err(e) => {
                    stats.failed += 1;
                    tracing::error!("项目 {} 修正写入失败: {}", d.item_id, e);
                }
            }
        }

        stats
    }
}

/// 对账核心 (纯计算): 期望用量统计 + 差异/冲突/超配检测
pub fn reconcile(items: &[FundedItem], events: &[ConsumptionEvent]) -> ReconcileOutcome {
    let mut outcome = ReconcileOutcome::default();

    // 1. 归一化编码 -> 项目ID 查找表; 目录顺序遍历, 冲突时保留首次映射
    let mut code_lookup: IndexMap<String, i64> = IndexMap::with_capacity(items.len());
    for item in items {
        let code = item.normalized_code();
        if let Some(&kept) = code_lookup.get(&code) {
            outcome.collisions.push(CodeCollision {
                normalized_code: code,
                kept_item_id: kept,
                duplicate_item_id: item.id,
            });
        } else {
            code_lookup.insert(code, item.id);
        }
    }

    // 2. 每个项目初始化期望值 0, 与是否有事件引用无关
    let mut expected: HashMap<i64, i64> = items.iter().map(|i| (i.id, 0)).collect();

    // 3. 累加事件数量; 未完成会话硬过滤, 未知编码计数不报错
    for event in events {
        if !event.completed {
            outcome.excluded_events += 1;
            continue;
        }
        match code_lookup.get(&event.normalized_item_code) {
            Some(item_id) => {
                *expected.entry(*item_id).or_insert(0) += event.quantity;
                outcome.matched_events += 1;
            }
            None => outcome.unmatched_events += 1,
        }
    }

    // 4. delta = expected - used; 非零产生差异记录
    for item in items {
        let code = item.normalized_code();

        // 冲突中被丢弃的重复项不参与差异计算, 只在 collisions 里上报
        if code_lookup.get(&code) != Some(&item.id) {
            continue;
        }

        let exp = expected.get(&item.id).copied().unwrap_or(0);
        let delta = exp - item.used_quantity;
        if delta != 0 {
            outcome.discrepancies.push(Discrepancy {
                item_id: item.id,
                item_code: code.clone(),
                expected_used: exp,
                actual_used: item.used_quantity,
                delta,
            });
        }

        // 5. 超配: 对账完成后的用量 (账面或期望的较大者) 超过核定, 上报不自动修正
        // 期望值超核定也必须在本次运行里暴露, 不能等 apply 落账后下次运行才发现
        let worst_used = item.used_quantity.max(exp);
        if worst_used > item.total_quantity {
            outcome.over_allocations.push(OverAllocation {
                item_id: item.id,
                item_code: code,
                used_quantity: worst_used,
                total_quantity: item.total_quantity,
            });
        }
    }

    outcome.expected_by_item = expected;
    outcome
}

/// 利用率汇总: 数量口径直接求和, 金额口径按单价折算
pub fn utilization_summary(items: &[FundedItem], outcome: &ReconcileOutcome) -> UtilizationSummary {
    let mut total_quantity = 0i64;
    let mut used_quantity = 0i64;
    let mut allocated_cost = BigDecimal::zero();
    let mut used_cost = BigDecimal::zero();

    for item in items {
        // apply 之后的口径: 以对账期望值为准
        let used = outcome
            .expected_by_item
            .get(&item.id)
            .copied()
            .unwrap_or(item.used_quantity);

        total_quantity += item.total_quantity;
        used_quantity += used;
        allocated_cost += &item.unit_price * BigDecimal::from(item.total_quantity);
        used_cost += &item.unit_price * BigDecimal::from(used);
    }

    let quantity_pct = if total_quantity > 0 {
        used_quantity as f64 / total_quantity as f64 * 100.0
    } else {
        0.0
    };
    let cost_pct = match (used_cost.to_f64(), allocated_cost.to_f64()) {
        (Some(u), Some(t)) if t > 0.0 => u / t * 100.0,
        _ => 0.0,
    };

    UtilizationSummary {
        total_quantity,
        used_quantity,
        quantity_pct,
        allocated_cost,
        used_cost,
        cost_pct,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bigdecimal::FromPrimitive;

    fn item(id: i64, code: &str, total: i64, used: i64) -> FundedItem {
        FundedItem {
            id,
            plan_id: 1,
            item_code: code.to_string(),
            description: format!("item {id}"),
            unit_price: BigDecimal::from_f64(50.0).unwrap(),
            total_quantity: total,
            used_quantity: used,
        }
    }

    fn event(code: &str, quantity: i64, completed: bool) -> ConsumptionEvent {
        ConsumptionEvent {
            normalized_item_code: code.trim().to_lowercase(),
            quantity,
            source_record_id: 0,
            completed,
        }
    }

    #[test]
    fn concrete_scenario_incomplete_session_excluded() {
        // 目录 {code:"st-01", total:10, used:2}; 完成事件 qty 3 + 未完成事件 qty 1
        let items = [item(7, "st-01", 10, 2)];
        let events = [event("ST-01", 3, true), event("st-01", 1, false)];

        let out = reconcile(&items, &events);
        assert_eq!(out.expected_by_item[&7], 3);
        assert_eq!(out.excluded_events, 1);
        assert_eq!(out.discrepancies.len(), 1);
        let d = &out.discrepancies[0];
        assert_eq!(d.delta, 1);
        assert_eq!(d.expected_used, 3);
        assert_eq!(d.actual_used, 2);
    }

    #[test]
    fn normalization_invariance_matches_same_item() {
        let items = [item(1, " ST-01 ", 10, 0)];
        let events = [
            event("ST-01", 1, true),
            event(" st-01 ", 1, true),
            event("St-01", 1, true),
        ];
        let out = reconcile(&items, &events);
        assert_eq!(out.expected_by_item[&1], 3);
        assert_eq!(out.unmatched_events, 0);
    }

    #[test]
    fn expected_initialized_for_unreferenced_items() {
        let items = [item(1, "a", 5, 0), item(2, "b", 5, 4)];
        let events = [event("a", 2, true)];
        let out = reconcile(&items, &events);
        assert_eq!(out.expected_by_item[&2], 0);
        // b 账面 4, 期望 0 => delta -4
        let d = out.discrepancies.iter().find(|d| d.item_id == 2).unwrap();
        assert_eq!(d.delta, -4);
    }

    #[test]
    fn unmatched_events_counted_not_fatal() {
        let items = [item(1, "a", 5, 0)];
        let events = [event("ghost", 2, true), event("a", 1, true)];
        let out = reconcile(&items, &events);
        assert_eq!(out.unmatched_events, 1);
        assert_eq!(out.matched_events, 1);
        assert_eq!(out.expected_by_item[&1], 1);
    }

    #[test]
    fn collision_keeps_first_seen_mapping() {
        let items = [item(1, "A", 5, 0), item(2, " a ", 5, 0)];
        let events = [event("a", 3, true)];
        let out = reconcile(&items, &events);

        assert_eq!(out.collisions.len(), 1);
        assert_eq!(out.collisions[0].kept_item_id, 1);
        assert_eq!(out.collisions[0].duplicate_item_id, 2);
        assert_eq!(out.expected_by_item[&1], 3);
        // 重复项不产生差异记录
        assert!(out.discrepancies.iter().all(|d| d.item_id != 2));
    }

    #[test]
    fn over_allocation_reported_not_corrected() {
        let items = [item(1, "a", 5, 8)];
        let out = reconcile(&items, &[]);
        assert_eq!(out.over_allocations.len(), 1);
        assert_eq!(out.over_allocations[0].used_quantity, 8);
        // 差异照常计算 (期望 0 vs 账面 8), 但超配本身另行上报
        assert_eq!(out.discrepancies[0].delta, -8);
    }

    #[test]
    fn consumption_beyond_allotment_flagged_in_same_run() {
        // 期望用量 12 超过核定 10: 差异照常产生, 超配必须在本次运行就上报
        let items = [item(1, "a", 10, 2)];
        let events = [event("a", 12, true)];
        let out = reconcile(&items, &events);

        assert_eq!(out.expected_by_item[&1], 12);
        assert_eq!(out.discrepancies[0].delta, 10);
        assert_eq!(out.over_allocations.len(), 1);
        assert_eq!(out.over_allocations[0].used_quantity, 12);
        assert_eq!(out.over_allocations[0].total_quantity, 10);
    }

    #[test]
    fn idempotence_after_apply() {
        let mut items = vec![item(1, "a", 10, 2), item(2, "b", 10, 5), item(3, "c", 10, 0)];
        let events = [
            event("a", 4, true),
            event("b", 5, true),
            event("c", 1, false),
        ];

        let first = reconcile(&items, &events);
        assert!(!first.discrepancies.is_empty());

        // 模拟 apply: used_quantity = expected
        for d in &first.discrepancies {
            let it = items.iter_mut().find(|i| i.id == d.item_id).unwrap();
            it.used_quantity = d.expected_used;
        }

        let second = reconcile(&items, &events);
        assert!(second.discrepancies.is_empty());
    }

    #[test]
    fn utilization_summary_percentages() {
        let items = [item(1, "a", 10, 0), item(2, "b", 10, 0)];
        let events = [event("a", 5, true)];
        let out = reconcile(&items, &events);
        let u = utilization_summary(&items, &out);

        assert_eq!(u.total_quantity, 20);
        assert_eq!(u.used_quantity, 5);
        assert!((u.quantity_pct - 25.0).abs() < 1e-9);
        // 单价统一 50: 已用 250 / 核定 1000 = 25%
        assert!((u.cost_pct - 25.0).abs() < 1e-9);
    }
}
