//! Illustrative option pricing. This is an intrinsic-plus-time-value heuristic used
//! to fill chain views when no live feed is available; it is not an options model.

use crate::domain::options::{OptionContract, OptionType};
use crate::domain::post::normalize_ticker;
use crate::error::PipelineError;
use crate::options::filler::FillerSource;
use chrono::{DateTime, Duration, NaiveDate, Utc};

pub const STRIKE_STEP: f64 = 5.0;
pub const STRIKES_EACH_SIDE: i32 = 4;
pub const EXPIRY_DAYS: [i64; 3] = [7, 14, 30];
pub const MIN_PREMIUM: f64 = 0.50;
pub const SKEW_FACTOR: f64 = 0.8;

/// Deterministic part of a synthetic contract; filler is attached separately.
#[derive(Debug, Clone, PartialEq)]
pub struct PricedContract {
    pub strike: f64,
    pub expiration: NaiveDate,
    pub days_to_expiry: i64,
    pub option_type: OptionType,
    pub premium: f64,
}

pub struct SyntheticOptionPricer<F> {
    filler: F,
}

impl<F: FillerSource> SyntheticOptionPricer<F> {
    pub fn new(filler: F) -> Self {
        Self { filler }
    }

    pub fn generate_chain(
        &self,
        ticker: &str,
        spot: f64,
        as_of: DateTime<Utc>,
    ) -> Result<Vec<OptionContract>, PipelineError> {
        let ticker = normalize_ticker(ticker)
            .ok_or_else(|| PipelineError::input(format!("invalid ticker: {ticker:?}")))?;
        let priced = price_chain(spot, as_of)?;

        Ok(priced
            .into_iter()
            .map(|c| OptionContract {
                ticker: ticker.clone(),
                strike: c.strike,
                expiration: c.expiration,
                option_type: c.option_type,
                premium: c.premium,
                volume: self.filler.volume(),
                open_interest: self.filler.open_interest(),
                implied_volatility: self.filler.implied_volatility(),
            })
            .collect())
    }
}

/// `round(spot/5)*5 + k*5` for `k` in `-4..=4`, skipping non-positive strikes.
pub fn strikes_for(spot: f64) -> Vec<f64> {
    let center = (spot / STRIKE_STEP).round() * STRIKE_STEP;
    (-STRIKES_EACH_SIDE..=STRIKES_EACH_SIDE)
        .map(|k| center + f64::from(k) * STRIKE_STEP)
        .filter(|s| *s > 0.0)
        .collect()
}

pub fn is_near_the_money(strike: f64, spot: f64) -> bool {
    let ratio = strike / spot;
    0.95 < ratio && ratio < 1.05
}

/// Unrounded, unfloored heuristic premium.
fn raw_premium(spot: f64, strike: f64, days_to_expiry: i64) -> f64 {
    let intrinsic_ish = (spot - strike).abs() * 0.1;
    let atm_bump = if is_near_the_money(strike, spot) { spot * 0.02 } else { 0.0 };
    let time_value = (days_to_expiry as f64 / 30.0) * spot * 0.01;
    intrinsic_ish + atm_bump + time_value
}

fn finish_premium(raw: f64) -> f64 {
    (raw.max(MIN_PREMIUM) * 100.0).round() / 100.0
}

/// Ordered by expiry, then strike; near-the-money skew rows follow their primary.
pub fn price_chain(spot: f64, as_of: DateTime<Utc>) -> Result<Vec<PricedContract>, PipelineError> {
    if !spot.is_finite() || spot <= 0.0 {
        return Err(PipelineError::input(format!("spot price must be positive (got {spot})")));
    }

    let today = as_of.date_naive();
    let strikes = strikes_for(spot);
    let mut out = Vec::with_capacity(EXPIRY_DAYS.len() * strikes.len() * 2);

    for days in EXPIRY_DAYS {
        let expiration = today + Duration::days(days);
        for &strike in &strikes {
            let raw = raw_premium(spot, strike, days);
            let option_type = if strike < spot { OptionType::Call } else { OptionType::Put };
            out.push(PricedContract {
                strike,
                expiration,
                days_to_expiry: days,
                option_type,
                premium: finish_premium(raw),
            });
            if is_near_the_money(strike, spot) {
                out.push(PricedContract {
                    strike,
                    expiration,
                    days_to_expiry: days,
                    option_type: option_type.opposite(),
                    premium: finish_premium(raw * SKEW_FACTOR),
                });
            }
        }
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::t0;

    struct ConstFiller;

    impl FillerSource for ConstFiller {
        fn volume(&self) -> u32 {
            1
        }
        fn open_interest(&self) -> u32 {
            2
        }
        fn implied_volatility(&self) -> f64 {
            0.3
        }
    }

    fn find(chain: &[PricedContract], strike: f64, days: i64, ty: OptionType) -> f64 {
        chain
            .iter()
            .find(|c| c.strike == strike && c.days_to_expiry == days && c.option_type == ty)
            .map(|c| c.premium)
            .unwrap()
    }

    #[test]
    fn aapl_strikes_are_centered_on_spot() {
        assert_eq!(
            strikes_for(175.0),
            vec![155.0, 160.0, 165.0, 170.0, 175.0, 180.0, 185.0, 190.0, 195.0]
        );
        assert_eq!(strikes_for(173.0)[4], 175.0);
        assert_eq!(strikes_for(172.4)[4], 170.0);
    }

    #[test]
    fn aapl_premiums_are_reproducible_to_the_cent() {
        let chain = price_chain(175.0, t0()).unwrap();

        // at the money: 0 + 3.50 + 7/30 * 1.75
        assert_eq!(find(&chain, 175.0, 7, OptionType::Put), 3.91);
        assert_eq!(find(&chain, 175.0, 7, OptionType::Call), 3.13);
        // near the money call and its put skew
        assert_eq!(find(&chain, 170.0, 7, OptionType::Call), 4.41);
        assert_eq!(find(&chain, 170.0, 7, OptionType::Put), 3.53);
        // far from the money
        assert_eq!(find(&chain, 155.0, 30, OptionType::Call), 3.75);
        assert_eq!(find(&chain, 195.0, 14, OptionType::Put), 2.82);

        assert_eq!(chain, price_chain(175.0, t0()).unwrap());
    }

    #[test]
    fn chain_shape_and_ordering() {
        let chain = price_chain(175.0, t0()).unwrap();
        // 9 strikes, 3 of them (170, 175, 180) near the money, 3 expiries.
        assert_eq!(chain.len(), (9 + 3) * 3);

        let expiries: Vec<_> = chain.iter().map(|c| c.expiration).collect();
        let mut sorted = expiries.clone();
        sorted.sort();
        assert_eq!(expiries, sorted);
        assert_eq!(chain[0].expiration, t0().date_naive() + Duration::days(7));
        assert_eq!(chain.last().unwrap().days_to_expiry, 30);
    }

    #[test]
    fn premium_is_floored() {
        let chain = price_chain(2.0, t0()).unwrap();
        assert!(chain.iter().all(|c| c.premium >= MIN_PREMIUM));
        assert!(chain.iter().all(|c| c.strike > 0.0));
    }

    #[test]
    fn type_follows_strike_side() {
        let chain = price_chain(175.0, t0()).unwrap();
        // 1.50 + 14/30 * 1.75
        assert_eq!(find(&chain, 160.0, 14, OptionType::Call), 2.32);
        assert!(chain
            .iter()
            .filter(|c| !is_near_the_money(c.strike, 175.0))
            .all(|c| (c.strike < 175.0) == (c.option_type == OptionType::Call)));
    }

    #[test]
    fn rejects_bad_spot_and_ticker() {
        let pricer = SyntheticOptionPricer::new(ConstFiller);
        assert!(pricer.generate_chain("AAPL", 0.0, t0()).is_err());
        assert!(pricer.generate_chain("AAPL", f64::NAN, t0()).is_err());
        assert!(pricer.generate_chain("", 100.0, t0()).is_err());
    }

    #[test]
    fn filler_is_injected() {
        let chain = SyntheticOptionPricer::new(ConstFiller)
            .generate_chain("$aapl", 175.0, t0())
            .unwrap();
        assert!(chain.iter().all(|c| c.ticker == "AAPL"));
        assert!(chain.iter().all(|c| c.volume == 1 && c.open_interest == 2));
        assert!(chain.iter().all(|c| (c.implied_volatility - 0.3).abs() < f64::EPSILON));
    }
}
