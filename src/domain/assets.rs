use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Supported historical look-back windows, keyed by day count
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Interval {
    OneDay,
    OneWeek,
    OneMonth,
    ThreeMonths,
    OneYear,
}

impl Interval {
    /// Shortest window; used as the default and as the "asset usable" signal during preload.
    pub const PRIMARY: Interval = Interval::OneDay;

    /// Day-count key sent upstream as the `days` query parameter
    pub fn key(&self) -> &'static str {
        match self {
            Interval::OneDay => "1",
            Interval::OneWeek => "7",
            Interval::OneMonth => "30",
            Interval::ThreeMonths => "90",
            Interval::OneYear => "365",
        }
    }

    /// Parses a day-count key. A blank key normalizes to [`Interval::PRIMARY`],
    /// anything outside the supported set yields `None`.
    pub fn from_key(key: &str) -> Option<Interval> {
        match key.trim() {
            "" => Some(Interval::PRIMARY),
            "1" => Some(Interval::OneDay),
            "7" => Some(Interval::OneWeek),
            "30" => Some(Interval::OneMonth),
            "90" => Some(Interval::ThreeMonths),
            "365" => Some(Interval::OneYear),
            _ => None,
        }
    }

    /// Maps a chart button label (1D, 1W, 1M, 3M, 1Y, All) to an interval.
    /// Unknown labels fall back to the primary interval.
    pub fn from_label(label: &str) -> Interval {
        match label {
            "1D" => Interval::OneDay,
            "1W" => Interval::OneWeek,
            "1M" => Interval::OneMonth,
            "3M" => Interval::ThreeMonths,
            "1Y" | "All" => Interval::OneYear,
            _ => Interval::PRIMARY,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Interval::OneDay => "1D",
            Interval::OneWeek => "1W",
            Interval::OneMonth => "1M",
            Interval::ThreeMonths => "3M",
            Interval::OneYear => "1Y",
        }
    }

    /// Returns all intervals, shortest first
    pub fn all() -> Vec<Interval> {
        vec![
            Interval::OneDay,
            Interval::OneWeek,
            Interval::OneMonth,
            Interval::ThreeMonths,
            Interval::OneYear,
        ]
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// One row of the top-assets snapshot. Identity is `id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetSnapshot {
    pub id: String,
    pub name: String,
    pub symbol: String,
    pub price: f64,
    pub change_percent_24h: f64,
    pub market_cap: String,
    pub volume: String,
    pub circulating_supply: String,
}

impl PartialEq for AssetSnapshot {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for AssetSnapshot {}

impl AssetSnapshot {
    /// "$60,123.45"
    pub fn price_formatted(&self) -> String {
        format!("${}", group_thousands(self.price, 2))
    }

    /// "+2.50%" / "-1.20%"
    pub fn change_formatted(&self) -> String {
        let sign = if self.change_percent_24h >= 0.0 { "+" } else { "" };
        format!("{}{:.2}%", sign, self.change_percent_24h)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SeriesPoint {
    pub timestamp: DateTime<Utc>,
    pub price: Option<f64>,
    pub volume: Option<f64>,
}

/// Chronological points for one (asset, interval). Cheap to clone: the points
/// are shared and never mutated after construction.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HistoricalSeries {
    points: Arc<[SeriesPoint]>,
}

impl HistoricalSeries {
    pub fn new(points: Vec<SeriesPoint>) -> Self {
        Self {
            points: points.into(),
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn points(&self) -> &[SeriesPoint] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn first(&self) -> Option<&SeriesPoint> {
        self.points.first()
    }

    pub fn last(&self) -> Option<&SeriesPoint> {
        self.points.last()
    }
}

/// Compact money display: "$1.12T", "$415.6B", "$950". Non-positive or
/// non-finite values render as "$0".
pub fn format_money_short(value: f64) -> String {
    if !value.is_finite() || value <= 0.0 {
        return "$0".to_string();
    }
    format!("${}", format_number_short(value))
}

/// Same suffix scheme as [`format_money_short`] without the currency sign.
pub fn format_number_short(value: f64) -> String {
    if !value.is_finite() || value <= 0.0 {
        return "0".to_string();
    }

    const SCALES: [(f64, &str); 4] = [
        (1_000_000_000_000.0, "T"),
        (1_000_000_000.0, "B"),
        (1_000_000.0, "M"),
        (1_000.0, "K"),
    ];

    for (scale, suffix) in SCALES {
        if value >= scale {
            return format!("{}{}", trim_decimals(value / scale), suffix);
        }
    }
    trim_decimals(value)
}

// Up to two decimals, trailing zeros dropped, thousands grouped.
fn trim_decimals(value: f64) -> String {
    let rendered = group_thousands(value, 2);
    if rendered.contains('.') {
        rendered
            .trim_end_matches('0')
            .trim_end_matches('.')
            .to_string()
    } else {
        rendered
    }
}

fn group_thousands(value: f64, decimals: usize) -> String {
    let rendered = format!("{:.*}", decimals, value.abs());
    let (int_part, frac_part) = match rendered.split_once('.') {
        Some((i, f)) => (i, Some(f)),
        None => (rendered.as_str(), None),
    };

    let mut grouped = String::with_capacity(int_part.len() + int_part.len() / 3);
    for (idx, ch) in int_part.chars().enumerate() {
        if idx > 0 && (int_part.len() - idx) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }

    let sign = if value < 0.0 { "-" } else { "" };
    match frac_part {
        Some(f) => format!("{}{}.{}", sign, grouped, f),
        None => format!("{}{}", sign, grouped),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interval_keys() {
        assert_eq!(Interval::from_key("30"), Some(Interval::OneMonth));
        assert_eq!(Interval::from_key(""), Some(Interval::OneDay));
        assert_eq!(Interval::from_key("  "), Some(Interval::OneDay));
        assert_eq!(Interval::from_key("14"), None);

        for interval in Interval::all() {
            assert_eq!(Interval::from_key(interval.key()), Some(interval));
        }
    }

    #[test]
    fn test_interval_labels() {
        assert_eq!(Interval::from_label("1W"), Interval::OneWeek);
        assert_eq!(Interval::from_label("All"), Interval::OneYear);
        assert_eq!(Interval::from_label("5Y"), Interval::OneDay);
        assert_eq!(Interval::ThreeMonths.label(), "3M");
    }

    #[test]
    fn test_money_formatting() {
        assert_eq!(format_money_short(1_120_000_000_000.0), "$1.12T");
        assert_eq!(format_money_short(415_600_000_000.0), "$415.6B");
        assert_eq!(format_money_short(75_000_000.0), "$75M");
        assert_eq!(format_money_short(950.0), "$950");
        assert_eq!(format_money_short(0.0), "$0");
        assert_eq!(format_money_short(f64::NAN), "$0");
    }

    #[test]
    fn test_number_formatting() {
        assert_eq!(format_number_short(19_700_000.0), "19.7M");
        assert_eq!(format_number_short(1_234.0), "1.23K");
        assert_eq!(format_number_short(-5.0), "0");
    }

    #[test]
    fn test_snapshot_display() {
        let asset = AssetSnapshot {
            id: "bitcoin".to_string(),
            name: "Bitcoin".to_string(),
            symbol: "BTC".to_string(),
            price: 60123.45,
            change_percent_24h: -1.2,
            market_cap: "$1.12T".to_string(),
            volume: "$30B".to_string(),
            circulating_supply: "19.7M".to_string(),
        };
        assert_eq!(asset.price_formatted(), "$60,123.45");
        assert_eq!(asset.change_formatted(), "-1.20%");
    }

    #[test]
    fn test_series_clone_shares_points() {
        let point = SeriesPoint {
            timestamp: Utc::now(),
            price: Some(1.0),
            volume: None,
        };
        let series = HistoricalSeries::new(vec![point]);
        let copy = series.clone();
        assert_eq!(series, copy);
        assert_eq!(copy.len(), 1);
        assert!(HistoricalSeries::empty().is_empty());
    }
}
