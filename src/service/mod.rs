pub mod extractor;
pub mod forecaster;
pub mod reconciler;

pub use forecaster::{forecast, ForecastService};
pub use reconciler::{reconcile, ReconcilerService};
