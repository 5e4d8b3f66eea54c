use crate::error::ReconError;
use crate::models::{ClientRunStats, FundedItem, FundingPlan, SessionRecordRow};
use chrono::NaiveDate;
use sqlx::PgPool;
use std::path::Path;

/// 查询客户的活跃资助计划
/// 全局约定每个客户恰好一个活跃计划, 数据模型没有结构化约束, 这里在读取时大声失败
pub async fn get_active_plan(
    pool: &PgPool,
    client_id: i64,
) -> Result<FundingPlan, ReconError> {
    let mut plans = sqlx::query_as::<_, FundingPlan>(
        r#"
        SELECT id, client_id, start_date, end_date, total_funds, is_active
        FROM t_funding_plan
        WHERE client_id = $1
          AND is_active = true
        ORDER BY id
        "#,
    )
    .bind(client_id)
    .fetch_all(pool)
    .await?;

    match plans.len() {
        0 => Err(ReconError::NoActivePlan(client_id)),
        1 => Ok(plans.remove(0)),
        n => Err(ReconError::MultipleActivePlans {
            client_id,
            count: n,
        }),
    }
}

/// 查询计划下的资助项目明细 (按 id 排序, 保证编码冲突处理的确定性)
pub async fn list_funded_items(
    pool: &PgPool,
    plan_id: i64,
) -> Result<Vec<FundedItem>, sqlx::Error> {
    sqlx::query_as::<_, FundedItem>(
        r#"
        SELECT id, plan_id, item_code, description, unit_price, total_quantity, used_quantity
        FROM t_funded_item
        WHERE plan_id = $1
        ORDER BY id
        "#,
    )
    .bind(plan_id)
    .fetch_all(pool)
    .await
}

/// 查询计划期间内客户的会话消耗记录 (会话笔记联查会话)
/// 不在 SQL 里过滤完成状态, 状态列带回引擎侧判定, 被排除的事件才能计数
pub async fn list_session_records(
    pool: &PgPool,
    client_id: i64,
    start_date: NaiveDate,
    end_date: NaiveDate,
) -> Result<Vec<SessionRecordRow>, sqlx::Error> {
    sqlx::query_as::<_, SessionRecordRow>(
        r#"
        SELECT sn.id as record_id,
               ss.status as session_status,
               sn.status as note_status,
               sn.consumption_data as payload
        FROM t_session_note sn
        INNER JOIN t_service_session ss ON ss.id = sn.session_id
        WHERE ss.client_id = $1
          AND ss.session_date >= $2
          AND ss.session_date <= $3
        ORDER BY sn.id
        "#,
    )
    .bind(client_id)
    .bind(start_date)
    .bind(end_date)
    .fetch_all(pool)
    .await
}

/// 查询所有持有活跃计划的客户ID (全量扫描模式)
pub async fn list_active_client_ids(pool: &PgPool) -> Result<Vec<i64>, sqlx::Error> {
    let rows: Vec<(i64,)> = sqlx::query_as(
        r#"
        SELECT DISTINCT client_id
        FROM t_funding_plan
        WHERE is_active = true
        ORDER BY client_id
        "#,
    )
    .fetch_all(pool)
    .await?;
    Ok(rows.into_iter().map(|(id,)| id).collect())
}

/// 条件更新单个项目的已用数量 (expected-old-value 守卫, 防止并发对账互踩)
/// 返回 false 表示没有命中行: 项目不存在或账面值已被别的运行改掉
pub async fn update_used_quantity(
    pool: &PgPool,
    item_id: i64,
    expected_old: i64,
    new_used: i64,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE t_funded_item
        SET used_quantity = $1
        WHERE id = $2
          AND used_quantity = $3
        "#,
    )
    .bind(new_used)
    .bind(item_id)
    .bind(expected_old)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// 导出差异报告到 CSV 文件
pub fn export_discrepancies_csv(
    stats: &[ClientRunStats],
    output_path: &Path,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    use csv::Writer;
    use std::fs::File;

    let file = File::create(output_path)?;
    let mut writer = Writer::from_writer(file);

    writer.write_record(["client_id", "item_id", "item_code", "expected_used", "actual_used", "delta"])?;
    for cs in stats {
        for d in &cs.discrepancies {
            writer.write_record(&[
                cs.client_id.to_string(),
                d.item_id.to_string(),
                d.item_code.clone(),
                d.expected_used.to_string(),
                d.actual_used.to_string(),
                d.delta.to_string(),
            ])?;
        }
    }

    writer.flush()?;
    Ok(())
}
