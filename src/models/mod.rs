pub mod consumption;
pub mod forecast;
pub mod plan;
pub mod report;

pub use consumption::{ConsumptionEvent, ExtractOutcome, RejectedRecord, SessionRecordRow};
pub use forecast::{ForecastParams, ForecastPoint};
pub use plan::{FundedItem, FundingPlan};
pub use report::{
    ApplyStats, ClientRunStats, CodeCollision, Discrepancy, OverAllocation, ReconcileOutcome,
    RunSummary, UtilizationSummary,
};
