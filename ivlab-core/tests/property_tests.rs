//! Property tests for pipeline and IV invariants.
//!
//! Uses proptest to verify:
//! 1. Forward-fill never loses observations and never fills a leading gap
//! 2. Cleaned tables are complete with strictly increasing dates
//! 3. Log returns compound back to price ratios
//! 4. Annualization is a fixed scaling
//! 5. Train-fitted standardization is centered and unit-scaled on train
//! 6. Temporal splits partition the rows in order
//! 7. Black-Scholes inversion recovers the pricing volatility
//! 8. ATM selection never beats the true nearest strike

use chrono::{Days, NaiveDate};
use ivlab_core::data::clean::{clean, forward_fill};
use ivlab_core::data::returns::{nan_mean, nan_std};
use ivlab_core::data::{
    annualize_return, annualize_vol, log_returns, standardize, temporal_split, LabeledMatrix,
    SplitBoundary,
};
use ivlab_core::options::{select_atm, BlackScholes, OptionKind, OptionQuote};
use proptest::prelude::*;

// ── Strategies (proptest) ────────────────────────────────────────────

fn base_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2022, 1, 3).unwrap()
}

fn dates(n: usize) -> Vec<NaiveDate> {
    (0..n as u64)
        .map(|i| base_date().checked_add_days(Days::new(i)).unwrap())
        .collect()
}

/// A price cell: positive, or missing about a quarter of the time.
fn arb_cell() -> impl Strategy<Value = f64> {
    prop_oneof![
        3 => (1.0..500.0_f64),
        1 => Just(f64::NAN),
    ]
}

/// A table of 1..4 tickers over 2..60 rows with scattered gaps.
fn arb_raw_table() -> impl Strategy<Value = LabeledMatrix> {
    (1usize..4, 2usize..60).prop_flat_map(|(cols, rows)| {
        prop::collection::vec(prop::collection::vec(arb_cell(), rows), cols).prop_map(
            move |values| {
                let columns = (0..cols).map(|i| format!("T{i}")).collect();
                LabeledMatrix::new(dates(rows), columns, values).unwrap()
            },
        )
    })
}

fn arb_prices() -> impl Strategy<Value = Vec<f64>> {
    prop::collection::vec(1.0..1000.0_f64, 2..80)
}

fn leading_missing(col: &[f64]) -> usize {
    col.iter().take_while(|v| v.is_nan()).count()
}

// ── 1. Forward fill ──────────────────────────────────────────────────

proptest! {
    #[test]
    fn forward_fill_keeps_observations_and_leading_gaps(raw in arb_raw_table()) {
        let filled = forward_fill(&raw);
        prop_assert!(filled.observed_count() >= raw.observed_count());
        prop_assert_eq!(filled.dates(), raw.dates());

        for (j, (_, col)) in raw.iter_columns().enumerate() {
            let lead = leading_missing(col);
            let out = filled.column_at(j);
            prop_assert_eq!(leading_missing(out), lead);
            // Everything after the first observation is filled
            prop_assert!(out[lead..].iter().all(|v| !v.is_nan()));
            // Observed cells are never rewritten
            for (a, b) in col.iter().zip(out) {
                if !a.is_nan() {
                    prop_assert_eq!(a, b);
                }
            }
        }
    }
}

// ── 2. Alignment ─────────────────────────────────────────────────────

proptest! {
    #[test]
    fn cleaned_tables_are_complete_and_ordered(raw in arb_raw_table()) {
        let cleaned = clean(&raw);
        prop_assert_eq!(cleaned.missing_count(), 0);
        prop_assert!(cleaned.has_strictly_increasing_dates());
        prop_assert_eq!(cleaned.columns(), raw.columns());

        // Only rows before some ticker's first observation are dropped
        let max_lead = raw
            .iter_columns()
            .map(|(_, c)| leading_missing(c))
            .max()
            .unwrap_or(0);
        prop_assert_eq!(cleaned.n_rows(), raw.n_rows() - max_lead);
    }
}

// ── 3. Log returns ───────────────────────────────────────────────────

proptest! {
    #[test]
    fn log_returns_compound_to_price_ratios(values in arb_prices()) {
        let n = values.len();
        let prices =
            LabeledMatrix::from_columns(dates(n), vec![("X".to_string(), values.clone())]).unwrap();
        let returns = log_returns(&prices);
        prop_assert_eq!(returns.n_rows(), n - 1);

        let mut cumulative = 0.0;
        for (t, r) in returns.column_at(0).iter().enumerate() {
            cumulative += r;
            let ratio = values[t + 1] / values[0];
            prop_assert!((cumulative.exp() - ratio).abs() <= 1e-9 * ratio.max(1.0));
        }
    }
}

// ── 4. Annualization ─────────────────────────────────────────────────

proptest! {
    #[test]
    fn annualization_is_fixed_scaling(x in -1.0..1.0_f64) {
        prop_assert!((annualize_vol(x) - x * 252f64.sqrt()).abs() < 1e-12);
        prop_assert!((annualize_return(x) - x * 252.0).abs() < 1e-12);
    }
}

// ── 5. Standardization ───────────────────────────────────────────────

proptest! {
    #[test]
    fn train_scaled_output_is_centered_and_unit(
        values in prop::collection::vec(-100.0..100.0_f64, 3..50)
    ) {
        let spread = values.iter().cloned().fold(f64::MIN, f64::max)
            - values.iter().cloned().fold(f64::MAX, f64::min);
        prop_assume!(spread > 1e-6);

        let x = LabeledMatrix::from_columns(dates(values.len()), vec![("f".into(), values)]).unwrap();
        let (scaled, stats) = standardize(&x, None).unwrap();
        prop_assert!(nan_mean(scaled.column_at(0)).abs() < 1e-9);
        prop_assert!((nan_std(scaled.column_at(0)) - 1.0).abs() < 1e-9);

        // Supplying the same stats reproduces the transform exactly
        let (again, same) = standardize(&x, Some(&stats)).unwrap();
        prop_assert_eq!(again, scaled);
        prop_assert_eq!(same, stats);
    }
}

// ── 6. Temporal splits ───────────────────────────────────────────────

proptest! {
    #[test]
    fn splits_partition_rows_in_order(rows in 1usize..60, a in 0u64..70, b in 0u64..70) {
        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
        let boundary = SplitBoundary::new(
            base_date().checked_add_days(Days::new(lo)).unwrap(),
            base_date().checked_add_days(Days::new(hi)).unwrap(),
        )
        .unwrap();
        let values: Vec<f64> = (0..rows).map(|i| i as f64).collect();
        let data = LabeledMatrix::from_columns(dates(rows), vec![("x".into(), values)]).unwrap();

        let (train, val, test) = temporal_split(&data, &boundary);
        prop_assert_eq!(train.n_rows() + val.n_rows() + test.n_rows(), rows);

        let rejoined: Vec<NaiveDate> = train
            .dates()
            .iter()
            .chain(val.dates())
            .chain(test.dates())
            .copied()
            .collect();
        prop_assert_eq!(rejoined.as_slice(), data.dates());
        prop_assert!(train.dates().iter().all(|d| *d <= boundary.train_end()));
        prop_assert!(test.dates().iter().all(|d| *d > boundary.val_end()));
    }
}

// ── 7. IV inversion ──────────────────────────────────────────────────

proptest! {
    #[test]
    fn inversion_recovers_vol(
        vol in 0.05..1.5_f64,
        moneyness in 0.8..1.25_f64,
        days in 7u32..730,
        rate in 0.0..0.08_f64,
    ) {
        let bs = BlackScholes::new(rate);
        let (spot, strike, time) = (100.0, 100.0 * moneyness, days as f64 / 365.0);
        let price = bs.price(spot, strike, time, vol, OptionKind::Call);
        // Skip prices too close to the bounds for the tolerance to pin vol
        prop_assume!(bs.vega(spot, strike, time, vol) > 1e-2);

        let iv = bs.implied_vol(price, spot, strike, time, OptionKind::Call).unwrap();
        prop_assert!((iv - vol).abs() < 1e-5, "vol {} recovered as {}", vol, iv);
    }
}

// ── 8. ATM selection ─────────────────────────────────────────────────

proptest! {
    #[test]
    fn atm_is_a_nearest_strike(
        strikes in prop::collection::vec(1u32..400, 1..30),
        spot in 1.0..400.0_f64,
    ) {
        let expiry = base_date();
        let chain: Vec<OptionQuote> = strikes
            .iter()
            .map(|&k| OptionQuote {
                strike: k as f64,
                bid: None,
                ask: None,
                last_price: None,
                provider_iv: None,
                expiry,
            })
            .collect();
        let atm = select_atm(&chain, spot).unwrap();
        let best = chain.iter().map(|q| (q.strike - spot).abs()).fold(f64::MAX, f64::min);
        prop_assert_eq!((atm.strike - spot).abs(), best);
        // Ties go to the lower strike
        prop_assert!(chain
            .iter()
            .filter(|q| (q.strike - spot).abs() == best)
            .all(|q| q.strike >= atm.strike));
    }
}
