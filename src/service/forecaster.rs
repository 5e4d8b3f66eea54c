use crate::db::queries;
use crate::error::ReconError;
use crate::models::{ForecastParams, ForecastPoint, FundingPlan};
use bigdecimal::{BigDecimal, ToPrimitive, Zero};
use chrono::{Datelike, NaiveDate};
use sqlx::PgPool;

/// 资金利用率预测: 理想/实际/惯性外推/修正 四条累计曲线
/// 展示按月出点, 花费模型按固定会话节奏 (如14天) 阶梯推进, 不做日度平滑
pub fn forecast(
    plan: &FundingPlan,
    spend_to_date: &BigDecimal,
    as_of: NaiveDate,
    params: &ForecastParams,
) -> Vec<ForecastPoint> {
    let model = ForecastModel::new(plan, spend_to_date, as_of, params);
    ticks(plan.start_date, plan.end_date, model.as_of)
        .into_iter()
        .map(|d| model.point_at(d))
        .collect()
}

/// 时间轴: 计划起点 + 期间内每个月初 + as_of(截断到计划窗口内) + 计划终点
/// 窗口之外不出点, 曲线天然不会越过计划边界
fn ticks(start: NaiveDate, end: NaiveDate, as_of: NaiveDate) -> Vec<NaiveDate> {
    let mut dates = vec![start, as_of, end];

    let mut cursor = first_of_next_month(start);
    while cursor < end {
        dates.push(cursor);
        cursor = first_of_next_month(cursor);
    }

    dates.sort();
    dates.dedup();
    dates
}

fn first_of_next_month(d: NaiveDate) -> NaiveDate {
    let (y, m) = if d.month() == 12 {
        (d.year() + 1, 1)
    } else {
        (d.year(), d.month() + 1)
    };
    // 1号永远有效
    NaiveDate::from_ymd_opt(y, m, 1).unwrap()
}

/// 预测模型: 由计划 + 实际花费 + 参数一次性推导出的阶梯曲线族
pub struct ForecastModel {
    start: NaiveDate,
    end: NaiveDate,
    as_of: NaiveDate,
    total_funds: f64,
    cadence: i64,
    total_sessions: i64,
    per_session_ideal: f64,
    miss_rate: f64,
    spend: f64,
    per_session_actual: f64,
    remaining_days: i64,
    remaining_sessions: i64,
    per_session_corr: f64,
}

impl ForecastModel {
    pub fn new(
        plan: &FundingPlan,
        spend_to_date: &BigDecimal,
        as_of: NaiveDate,
        params: &ForecastParams,
    ) -> Self {
        let start = plan.start_date;
        let end = plan.end_date.max(start);
        let as_of = as_of.clamp(start, end);

        let total_funds = plan.total_funds.to_f64().unwrap_or(0.0);
        let spend = spend_to_date.to_f64().unwrap_or(0.0);
        let cadence = params.session_cadence_days.max(1);
        let miss_rate = params.miss_rate.clamp(0.0, 0.95);

        let duration_days = (end - start).num_days();
        let total_sessions = (duration_days / cadence).max(1);
        let per_session_ideal = total_funds / total_sessions as f64;

        let elapsed_sessions = ((as_of - start).num_days() / cadence).clamp(0, total_sessions);
        let billed_at_asof = (elapsed_sessions as f64 * (1.0 - miss_rate)).round() as i64;
        let per_session_actual = if billed_at_asof > 0 {
            spend / billed_at_asof as f64
        } else {
            0.0
        };

        let remaining_days = (end - as_of).num_days();
        // 尾段不足一个节奏也算一个会话 (向上取整), 剩余资金必须在终点前走完
        let remaining_sessions = if remaining_days > 0 {
            (remaining_days + cadence - 1) / cadence
        } else {
            1
        };
        // remaining_days <= 0 时整条修正曲线坍缩为常量 total_funds, 不做除法
        let per_session_corr = (total_funds - spend) / remaining_sessions as f64;

        Self {
            start,
            end,
            as_of,
            total_funds,
            cadence,
            total_sessions,
            per_session_ideal,
            miss_rate,
            spend,
            per_session_actual,
            remaining_days,
            remaining_sessions,
            per_session_corr,
        }
    }

    /// 计划起点以来经过的完整会话数 (阶梯, 封顶 total_sessions)
    fn sessions_elapsed(&self, d: NaiveDate) -> i64 {
        ((d - self.start).num_days() / self.cadence).clamp(0, self.total_sessions)
    }

    /// as_of 以来经过的完整会话数
    fn sessions_after(&self, d: NaiveDate) -> i64 {
        ((d - self.as_of).num_days() / self.cadence).max(0)
    }

    /// 实际计费会话数: 漏诊率折减后取整
    fn sessions_billed(&self, d: NaiveDate) -> i64 {
        (self.sessions_elapsed(d) as f64 * (1.0 - self.miss_rate)).round() as i64
    }

    /// 单个时间点上的四条曲线取值
    pub fn point_at(&self, d: NaiveDate) -> ForecastPoint {
        let ideal = self.per_session_ideal * self.sessions_elapsed(d) as f64;

        // actual 只覆盖 as_of 及之前; as_of 处精确钉在对账花费上
        let actual = if d < self.as_of {
            Some(self.per_session_actual * self.sessions_billed(d) as f64)
        } else if d == self.as_of {
            Some(self.spend)
        } else {
            None
        };

        // extension: 按 as_of 前观察到的单会话花费率惯性外推
        let extension = (d >= self.as_of)
            .then(|| self.spend + self.per_session_actual * self.sessions_after(d) as f64);

        // correction: 剩余资金摊到剩余会话; 剩余天数耗尽时坍缩为 total_funds
        // 计划终点精确钉在 total_funds 上, 哪怕最后一段不足一个完整节奏
        let correction = (d >= self.as_of).then(|| {
            if self.remaining_days <= 0 || d >= self.end {
                self.total_funds
            } else {
                let steps = self.sessions_after(d).min(self.remaining_sessions);
                self.spend + self.per_session_corr * steps as f64
            }
        });

        ForecastPoint {
            date: d,
            label: d.format("%b %Y").to_string(),
            ideal_cumulative: ideal,
            actual_cumulative: actual,
            extension_cumulative: extension,
            correction_cumulative: correction,
        }
    }
}

/// 基于存储的预测服务: 读取活跃计划和项目账面, 折算已花费后出曲线
pub struct ForecastService {
    pool: PgPool,
}

impl ForecastService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// 客户预测入口: 已花费 = Σ used_quantity × unit_price
    /// 依赖新鲜的 used_quantity, 调用方应保证对账 apply 先于本调用
    pub async fn forecast_client(
        &self,
        client_id: i64,
        as_of: NaiveDate,
        params: &ForecastParams,
    ) -> Result<Vec<ForecastPoint>, ReconError> {
        let plan = queries::get_active_plan(&self.pool, client_id).await?;
        let items = queries::list_funded_items(&self.pool, plan.id).await?;

        let spend_to_date = items.iter().fold(BigDecimal::zero(), |acc, item| {
            acc + &item.unit_price * BigDecimal::from(item.used_quantity)
        });

        tracing::info!(
            "客户 {} 计划 {}: 已花费 {}, as_of {}",
            client_id, plan.id, spend_to_date, as_of
        );

        Ok(forecast(&plan, &spend_to_date, as_of, params))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bigdecimal::FromPrimitive;
    use chrono::Duration;

    fn plan(total_funds: f64, start: NaiveDate, duration_days: i64) -> FundingPlan {
        FundingPlan {
            id: 1,
            client_id: 1,
            start_date: start,
            end_date: start + Duration::days(duration_days),
            total_funds: BigDecimal::from_f64(total_funds).unwrap(),
            is_active: true,
        }
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn params(cadence: i64, miss_rate: f64) -> ForecastParams {
        ForecastParams {
            session_cadence_days: cadence,
            miss_rate,
        }
    }

    #[test]
    fn concrete_scenario_biweekly_year_plan() {
        // totalFunds=10000, 14天节奏, 365天 => 26个会话, 理想单次 ≈ 384.6
        let start = date(2025, 1, 1);
        let p = plan(10_000.0, start, 365);
        let prm = params(14, 0.2);
        let as_of = start + Duration::days(180);
        let spend = BigDecimal::from_f64(3850.0).unwrap();

        let model = ForecastModel::new(&p, &spend, as_of, &prm);

        // day 180: 12 个会话经过, 折减后 10 次计费
        let at_asof = model.point_at(as_of);
        assert_eq!(at_asof.actual_cumulative, Some(3850.0));

        // day 194: 外推一个节奏 => 再加一个观察费率的会话 (385)
        let next = model.point_at(start + Duration::days(194));
        let ext = next.extension_cumulative.unwrap();
        assert!((ext - 4235.0).abs() < 1.0, "extension = {ext}");
        assert!(next.actual_cumulative.is_none());

        // 理想曲线: day 194 经过 13 个会话边界
        let ideal = next.ideal_cumulative;
        assert!((ideal - 13.0 * 10_000.0 / 26.0).abs() < 1e-6);
    }

    #[test]
    fn continuity_at_as_of() {
        let start = date(2025, 1, 1);
        let p = plan(10_000.0, start, 365);
        let prm = params(14, 0.2);

        for offset in [0, 30, 97, 180, 300] {
            let as_of = start + Duration::days(offset);
            let spend = BigDecimal::from_f64(1234.5).unwrap();
            let model = ForecastModel::new(&p, &spend, as_of, &prm);
            let pt = model.point_at(as_of);

            let actual = pt.actual_cumulative.unwrap();
            assert_eq!(pt.extension_cumulative, Some(actual), "offset {offset}");
            assert_eq!(pt.correction_cumulative, Some(actual), "offset {offset}");
        }
    }

    #[test]
    fn correction_lands_on_total_funds_at_plan_end() {
        let start = date(2025, 1, 1);
        let p = plan(10_000.0, start, 365);
        let prm = params(14, 0.2);
        let as_of = start + Duration::days(180);
        let spend = BigDecimal::from_f64(3850.0).unwrap();

        let model = ForecastModel::new(&p, &spend, as_of, &prm);
        let end_pt = model.point_at(p.end_date);
        let corr = end_pt.correction_cumulative.unwrap();
        assert!((corr - 10_000.0).abs() < 1e-6, "correction = {corr}");
    }

    #[test]
    fn correction_reaches_total_funds_when_less_than_one_cadence_remains() {
        // as_of 距终点不足一个节奏: 尾段仍算一个会话, 终点必须走满 total_funds
        let start = date(2025, 1, 1);
        let p = plan(10_000.0, start, 365);
        let prm = params(14, 0.2);
        let as_of = p.end_date - Duration::days(5);
        let spend = BigDecimal::from_f64(5_000.0).unwrap();

        let model = ForecastModel::new(&p, &spend, as_of, &prm);
        assert_eq!(model.point_at(as_of).correction_cumulative, Some(5_000.0));
        assert_eq!(
            model.point_at(p.end_date).correction_cumulative,
            Some(10_000.0)
        );
    }

    #[test]
    fn as_of_at_end_date_collapses_without_division_error() {
        let start = date(2025, 1, 1);
        let p = plan(10_000.0, start, 365);
        let prm = params(14, 0.2);
        let spend = BigDecimal::from_f64(9_000.0).unwrap();

        let model = ForecastModel::new(&p, &spend, p.end_date, &prm);
        let pt = model.point_at(p.end_date);
        assert_eq!(pt.correction_cumulative, Some(10_000.0));
        assert!(pt.correction_cumulative.unwrap().is_finite());
    }

    #[test]
    fn as_of_outside_window_is_clamped() {
        let start = date(2025, 1, 1);
        let p = plan(10_000.0, start, 365);
        let prm = params(14, 0.2);
        let spend = BigDecimal::zero();

        // as_of 在起点之前: 全部点都在窗口内, 起点即 as_of
        let points = forecast(&p, &spend, start - Duration::days(30), &prm);
        assert!(points.iter().all(|pt| pt.date >= start && pt.date <= p.end_date));
        assert_eq!(points[0].date, start);
        assert_eq!(points[0].actual_cumulative, Some(0.0));

        // as_of 在终点之后: 同样被夹回窗口
        let points = forecast(&p, &spend, p.end_date + Duration::days(30), &prm);
        assert!(points.iter().all(|pt| pt.date <= p.end_date));
    }

    #[test]
    fn series_null_layout_around_as_of() {
        let start = date(2025, 1, 1);
        let p = plan(10_000.0, start, 365);
        let prm = params(14, 0.2);
        let as_of = start + Duration::days(100);
        let spend = BigDecimal::from_f64(2_000.0).unwrap();

        let points = forecast(&p, &spend, as_of, &prm);
        for pt in &points {
            if pt.date < as_of {
                assert!(pt.actual_cumulative.is_some());
                assert!(pt.extension_cumulative.is_none());
                assert!(pt.correction_cumulative.is_none());
            } else if pt.date > as_of {
                assert!(pt.actual_cumulative.is_none());
                assert!(pt.extension_cumulative.is_some());
                assert!(pt.correction_cumulative.is_some());
            }
        }
        // as_of 本身必须是一个点
        assert!(points.iter().any(|pt| pt.date == as_of));
    }

    #[test]
    fn ideal_is_step_function_flat_between_boundaries() {
        let start = date(2025, 1, 1);
        let p = plan(10_000.0, start, 365);
        let prm = params(14, 0.0);
        let spend = BigDecimal::zero();
        let model = ForecastModel::new(&p, &spend, start, &prm);

        // 节奏边界之间保持平坦
        let d1 = model.point_at(start + Duration::days(14)).ideal_cumulative;
        let d2 = model.point_at(start + Duration::days(27)).ideal_cumulative;
        let d3 = model.point_at(start + Duration::days(28)).ideal_cumulative;
        assert_eq!(d1, d2);
        assert!(d3 > d2);
    }

    #[test]
    fn nothing_billed_yet_extension_stays_flat() {
        let start = date(2025, 1, 1);
        let p = plan(10_000.0, start, 365);
        let prm = params(14, 0.2);
        let as_of = start + Duration::days(3);   // 不足一个节奏
        let spend = BigDecimal::zero();

        let model = ForecastModel::new(&p, &spend, as_of, &prm);
        let later = model.point_at(start + Duration::days(200));
        assert_eq!(later.extension_cumulative, Some(0.0));
    }

    #[test]
    fn ticks_cover_start_months_as_of_and_end() {
        let start = date(2025, 1, 15);
        let p = plan(5_000.0, start, 100);
        let prm = params(14, 0.0);
        let as_of = start + Duration::days(40);
        let points = forecast(&p, &BigDecimal::zero(), as_of, &prm);

        let dates: Vec<NaiveDate> = points.iter().map(|pt| pt.date).collect();
        assert_eq!(dates.first(), Some(&start));
        assert_eq!(dates.last(), Some(&p.end_date));
        assert!(dates.contains(&as_of));
        assert!(dates.contains(&date(2025, 2, 1)));
        assert!(dates.contains(&date(2025, 3, 1)));
        // 有序且去重
        let mut sorted = dates.clone();
        sorted.sort();
        sorted.dedup();
        assert_eq!(dates, sorted);
    }
}
