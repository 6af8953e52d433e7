use chrono::{DateTime, Duration, Utc};

use crate::{
    data::features::{FeatureVector, MEAN_WINDOW, N_FEATURES},
    error::AqiError,
};

/// The model inputs carried from one forecast step to the next.
///
/// Concentrations, calendar fields, the rolling standard deviation and both
/// pollutant ratios stay at the last observed row's values for the whole horizon. `lag_24`
/// is approximated by the previous prediction because no 24-slot buffer is
/// kept, and the 6h mean is blended rather than recomputed over a window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeatureState {
    pub timestamp: DateTime<Utc>,
    pub co: f64,
    pub no: f64,
    pub no2: f64,
    pub o3: f64,
    pub so2: f64,
    pub pm2_5: f64,
    pub pm10: f64,
    pub nh3: f64,
    pub hour: f64,
    pub day: f64,
    pub month: f64,
    pub weekday: f64,
    pub is_weekend: f64,
    pub lag_1: f64,
    pub lag_2: f64,
    pub lag_24: f64,
    pub rolling_mean_6h: f64,
    pub rolling_std_12h: f64,
    pub aqi_diff: f64,
    pub aqi_pct_change: f64,
    pub pm_ratio: f64,
    pub gas_ratio: f64,
}

impl FeatureState {
    /// Model inputs in feature column order.
    pub fn inputs(&self) -> [f64; N_FEATURES] {
        [
            self.co,
            self.no,
            self.no2,
            self.o3,
            self.so2,
            self.pm2_5,
            self.pm10,
            self.nh3,
            self.hour,
            self.day,
            self.month,
            self.weekday,
            self.is_weekend,
            self.lag_1,
            self.lag_2,
            self.lag_24,
            self.rolling_mean_6h,
            self.rolling_std_12h,
            self.aqi_diff,
            self.aqi_pct_change,
            self.pm_ratio,
            self.gas_ratio,
        ]
    }

    /// The state one hour later, given the prediction made from `self`.
    pub fn advance(&self, prediction: f64) -> Self {
        let aqi_diff = prediction - self.lag_1;
        let aqi_pct_change = if self.lag_1 == 0.0 {
            0.0
        } else {
            aqi_diff / self.lag_1 * 100.0
        };
        let window = MEAN_WINDOW as f64;
        Self {
            timestamp: self.timestamp + Duration::hours(1),
            lag_1: prediction,
            lag_2: self.lag_1,
            lag_24: prediction,
            rolling_mean_6h: (self.rolling_mean_6h * (window - 1.0) + prediction) / window,
            aqi_diff,
            aqi_pct_change,
            ..*self
        }
    }
}

impl TryFrom<&FeatureVector> for FeatureState {
    type Error = AqiError;

    fn try_from(row: &FeatureVector) -> Result<Self, Self::Error> {
        let [co, no, no2, o3, so2, pm2_5, pm10, nh3, hour, day, month, weekday, is_weekend, lag_1, lag_2, lag_24, rolling_mean_6h, rolling_std_12h, aqi_diff, aqi_pct_change, pm_ratio, gas_ratio] =
            row.inputs().ok_or_else(|| AqiError::NonFiniteData {
                context: format!("feature row at {}", row.timestamp),
            })?;
        Ok(Self {
            timestamp: row.timestamp,
            co,
            no,
            no2,
            o3,
            so2,
            pm2_5,
            pm10,
            nh3,
            hour,
            day,
            month,
            weekday,
            is_weekend,
            lag_1,
            lag_2,
            lag_24,
            rolling_mean_6h,
            rolling_std_12h,
            aqi_diff,
            aqi_pct_change,
            pm_ratio,
            gas_ratio,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{data::features::derive_features, util::test_util::hourly_readings};

    fn state() -> FeatureState {
        let readings = hourly_readings(30, |i| 10.0 + i as f64);
        let features = derive_features(&readings).unwrap();
        FeatureState::try_from(features.last().unwrap()).unwrap()
    }

    #[test]
    fn test_inputs_match_feature_vector() {
        let readings = hourly_readings(30, |i| 10.0 + i as f64);
        let features = derive_features(&readings).unwrap();
        let last = features.last().unwrap();
        let state = FeatureState::try_from(last).unwrap();
        assert_eq!(state.inputs(), last.inputs().unwrap());
    }

    #[test]
    fn test_advance_shifts_lags() {
        let s0 = state();
        let s1 = s0.advance(80.0);
        assert_eq!(s1.lag_1, 80.0);
        assert_eq!(s1.lag_2, s0.lag_1);
        assert_eq!(s1.lag_24, 80.0);
        assert_eq!(s1.aqi_diff, 80.0 - s0.lag_1);
        assert!((s1.aqi_pct_change - (80.0 - s0.lag_1) / s0.lag_1 * 100.0).abs() < 1e-12);
        assert!((s1.rolling_mean_6h - (s0.rolling_mean_6h * 5.0 + 80.0) / 6.0).abs() < 1e-12);
        assert_eq!(s1.timestamp, s0.timestamp + Duration::hours(1));
    }

    #[test]
    fn test_advance_keeps_frozen_fields() {
        let s0 = state();
        let s2 = s0.advance(70.0).advance(75.0);
        assert_eq!(s2.hour, s0.hour);
        assert_eq!(s2.weekday, s0.weekday);
        assert_eq!(s2.rolling_std_12h, s0.rolling_std_12h);
        assert_eq!(s2.pm_ratio, s0.pm_ratio);
        assert_eq!(s2.gas_ratio, s0.gas_ratio);
        assert_eq!(s2.pm2_5, s0.pm2_5);
        assert_eq!(s2.co, s0.co);
        assert_eq!(s2.lag_2, 70.0);
    }

    #[test]
    fn test_pct_change_is_zero_when_lag_is_zero() {
        let s0 = FeatureState {
            lag_1: 0.0,
            ..state()
        };
        let s1 = s0.advance(42.0);
        assert_eq!(s1.aqi_pct_change, 0.0);
        assert_eq!(s1.aqi_diff, 42.0);
    }

    #[test]
    fn test_advance_is_pure() {
        let s0 = state();
        assert_eq!(s0.advance(55.5), s0.advance(55.5));
    }

    #[test]
    fn test_rejects_row_with_undefined_inputs() {
        let mut readings = hourly_readings(25, |_| 10.0);
        readings[24].pm10 = Some(0.0);
        let features = derive_features(&readings).unwrap();
        assert!(matches!(
            FeatureState::try_from(&features[0]),
            Err(AqiError::NonFiniteData { .. })
        ));
    }
}
