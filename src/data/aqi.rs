//! EPA PM2.5 / PM10 breakpoint interpolation.

/// One linear segment of the AQI scale.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Breakpoint {
    pub c_low: f64,
    pub c_high: f64,
    pub i_low: f64,
    pub i_high: f64,
}

const fn bp(c_low: f64, c_high: f64, i_low: f64, i_high: f64) -> Breakpoint {
    Breakpoint {
        c_low,
        c_high,
        i_low,
        i_high,
    }
}

/// PM2.5 (µg/m³, 24h) breakpoints.
pub const PM25_BREAKPOINTS: [Breakpoint; 7] = [
    bp(0.0, 12.0, 0.0, 50.0),
    bp(12.1, 35.4, 51.0, 100.0),
    bp(35.5, 55.4, 101.0, 150.0),
    bp(55.5, 150.4, 151.0, 200.0),
    bp(150.5, 250.4, 201.0, 300.0),
    bp(250.5, 350.4, 301.0, 400.0),
    bp(350.5, 500.4, 401.0, 500.0),
];

/// PM10 (µg/m³, 24h) breakpoints.
pub const PM10_BREAKPOINTS: [Breakpoint; 7] = [
    bp(0.0, 54.0, 0.0, 50.0),
    bp(55.0, 154.0, 51.0, 100.0),
    bp(155.0, 254.0, 101.0, 150.0),
    bp(255.0, 354.0, 151.0, 200.0),
    bp(355.0, 424.0, 201.0, 300.0),
    bp(425.0, 504.0, 301.0, 400.0),
    bp(505.0, 604.0, 401.0, 500.0),
];

/// Interpolates the sub-index for `concentration` within `table`.
///
/// Concentrations outside every bracket (including the gaps between
/// brackets and anything above the last one) have no sub-index.
pub fn sub_index(concentration: f64, table: &[Breakpoint]) -> Option<f64> {
    if !concentration.is_finite() {
        return None;
    }
    table
        .iter()
        .find(|b| b.c_low <= concentration && concentration <= b.c_high)
        .map(|b| (b.i_high - b.i_low) / (b.c_high - b.c_low) * (concentration - b.c_low) + b.i_low)
}

/// Overall AQI: the larger defined sub-index, rounded half to even.
///
/// Returns `None` when neither pollutant lands inside a bracket.
pub fn compute_aqi(pm2_5: Option<f64>, pm10: Option<f64>) -> Option<u32> {
    let pm25_index = pm2_5.and_then(|c| sub_index(c, &PM25_BREAKPOINTS));
    let pm10_index = pm10.and_then(|c| sub_index(c, &PM10_BREAKPOINTS));
    let overall = match (pm25_index, pm10_index) {
        (Some(a), Some(b)) => a.max(b),
        (Some(a), None) => a,
        (None, Some(b)) => b,
        (None, None) => return None,
    };
    Some(overall.round_ties_even() as u32)
}
