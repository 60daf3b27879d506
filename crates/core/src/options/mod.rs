pub mod filler;
pub mod pricer;

pub use filler::{FillerSource, RandomFiller, SeededFiller};
pub use pricer::SyntheticOptionPricer;

use crate::domain::options::OptionContract;
use crate::error::PipelineError;

/// Synthetic chain for `ticker` priced off `spot`, as of now. No I/O.
pub fn get_available_options(ticker: &str, spot: f64) -> Result<Vec<OptionContract>, PipelineError> {
    SyntheticOptionPricer::new(RandomFiller).generate_chain(ticker, spot, chrono::Utc::now())
}
