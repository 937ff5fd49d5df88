//! Aggregates used to summarize a series.
//!
//! Percentiles are estimated with a TDigest, the exact aggregates are computed
//! directly over the values.

use std::str::FromStr;

use chrono::Duration as ChronoDuration;
use tdigests::TDigest;

use super::models::TimedSeries;
use super::units::{convert_mem, is_byte_series};

/// Centroid budget when compressing a digest.
const DIGEST_SIZE: usize = 100;

/// Aggregate applied over a whole series.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum Aggregate {
    #[default]
    Max,
    Min,
    Mean,
    /// Quantile in `[0, 1]`.
    Percentile(f64),
}

impl Aggregate {
    pub fn name(&self) -> String {
        match self {
            Aggregate::Max => "Max".to_string(),
            Aggregate::Min => "Min".to_string(),
            Aggregate::Mean => "Mean".to_string(),
            Aggregate::Percentile(q) => format!("P{}", q * 100.0),
        }
    }

    /// Apply to `values`. `None` for an empty slice.
    pub fn apply(&self, values: &[f64]) -> Option<f64> {
        if values.is_empty() {
            return None;
        }
        match self {
            Aggregate::Max => values.iter().copied().reduce(f64::max),
            Aggregate::Min => values.iter().copied().reduce(f64::min),
            Aggregate::Mean => Some(values.iter().sum::<f64>() / values.len() as f64),
            Aggregate::Percentile(q) => {
                let mut td = TDigest::from_values(values.to_vec());
                td.compress(DIGEST_SIZE);
                Some(td.estimate_quantile(q.clamp(0.0, 1.0)))
            }
        }
    }
}

impl FromStr for Aggregate {
    type Err = String;

    /// `max`, `min`, `mean` or a percentile such as `p99` / `p99.9`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.to_ascii_lowercase();
        match lower.as_str() {
            "max" => Ok(Aggregate::Max),
            "min" => Ok(Aggregate::Min),
            "mean" | "avg" => Ok(Aggregate::Mean),
            _ => {
                let pct = lower
                    .strip_prefix('p')
                    .and_then(|p| p.parse::<f64>().ok())
                    .filter(|p| (0.0..=100.0).contains(p))
                    .ok_or_else(|| format!("unknown aggregate '{}', expected max, min, mean or pNN", s))?;
                Ok(Aggregate::Percentile(pct / 100.0))
            }
        }
    }
}

/// One computed summary of a series.
#[derive(Debug, Clone, PartialEq)]
pub struct Summary {
    pub label: String,
    pub aggregate: String,
    pub value: f64,
    /// Display unit once byte conversion applied.
    pub unit: Option<String>,
    pub count: usize,
    pub timespan: ChronoDuration,
}

impl Summary {
    pub fn display_value(&self) -> String {
        match &self.unit {
            Some(unit) => format!("{:.2} {}", self.value, unit),
            None => self.value.to_string(),
        }
    }
}

/// Summarize `series`. Byte-valued memory series are scaled to a readable unit.
pub fn summarize(series: &TimedSeries, aggregate: Aggregate, metric_unit: Option<&str>) -> Option<Summary> {
    let raw = aggregate.apply(series.values())?;
    let timespan = series.timespan()?;

    let (value, unit) = if is_byte_series(series.label(), metric_unit) {
        let (scaled, suffix) = convert_mem(raw, None).ok()?;
        (scaled, Some(suffix.to_string()))
    } else {
        (raw, None)
    };

    Some(Summary {
        label: series.label().to_string(),
        aggregate: aggregate.name(),
        value,
        unit,
        count: series.len(),
        timespan,
    })
}

/// Render a duration as `[-]H:MM:SS`.
pub fn format_timespan(span: ChronoDuration) -> String {
    let total = span.num_seconds();
    let sign = if total < 0 { "-" } else { "" };
    let total = total.abs();
    format!(
        "{}{}:{:02}:{:02}",
        sign,
        total / 3600,
        (total % 3600) / 60,
        total % 60
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn test_exact_aggregates() {
        let values = [3.0, 1.0, 4.0, 1.0, 5.0];
        assert_eq!(Aggregate::Max.apply(&values), Some(5.0));
        assert_eq!(Aggregate::Min.apply(&values), Some(1.0));
        assert_eq!(Aggregate::Mean.apply(&values), Some(2.8));
        assert_eq!(Aggregate::default(), Aggregate::Max);
        assert!(Aggregate::Max.apply(&[]).is_none());
    }

    #[test]
    fn test_percentile_estimate() {
        let values: Vec<f64> = (1..=100).map(|v| v as f64).collect();
        let median = Aggregate::Percentile(0.5).apply(&values).unwrap();
        assert!(median > 40.0 && median < 60.0);
        assert_eq!(Aggregate::Percentile(0.99).name(), "P99");
    }

    #[test]
    fn test_parse_aggregate() {
        assert_eq!("max".parse::<Aggregate>(), Ok(Aggregate::Max));
        assert_eq!("Mean".parse::<Aggregate>(), Ok(Aggregate::Mean));
        assert_eq!("p50".parse::<Aggregate>(), Ok(Aggregate::Percentile(0.5)));
        assert!("p101".parse::<Aggregate>().is_err());
        assert!("median".parse::<Aggregate>().is_err());
    }

    #[test]
    fn test_summarize_memory_series() {
        let series = TimedSeries::new(
            "mem_used",
            vec![ts(7200), ts(3600), ts(0)],
            vec![1024.0, 3.0 * 1024.0 * 1024.0, 2048.0],
        )
        .unwrap();
        let summary = summarize(&series, Aggregate::Max, Some("Bytes")).unwrap();
        assert_eq!(summary.value, 3.0);
        assert_eq!(summary.unit.as_deref(), Some("MB"));
        assert_eq!(summary.count, 3);
        assert_eq!(summary.timespan, ChronoDuration::seconds(7200));
        assert_eq!(summary.display_value(), "3.00 MB");
    }

    #[test]
    fn test_summarize_plain_series() {
        let series = TimedSeries::new("cpu_usage_user", vec![ts(0), ts(60)], vec![12.5, 40.0]).unwrap();
        let summary = summarize(&series, Aggregate::Min, Some("Percent")).unwrap();
        assert_eq!(summary.value, 12.5);
        assert!(summary.unit.is_none());
        // Ascending input yields a negative span.
        assert_eq!(summary.timespan, ChronoDuration::seconds(-60));
    }

    #[test]
    fn test_summarize_memory_percent_without_unit() {
        let series = TimedSeries::new("mem_used_percent", vec![ts(60), ts(0)], vec![45.0, 40.0]).unwrap();
        let summary = summarize(&series, Aggregate::Max, None).unwrap();
        assert_eq!(summary.value, 45.0);
        assert!(summary.unit.is_none());
        assert_eq!(summary.display_value(), "45");
    }

    #[test]
    fn test_format_timespan() {
        assert_eq!(format_timespan(ChronoDuration::seconds(3661)), "1:01:01");
        assert_eq!(format_timespan(ChronoDuration::seconds(-60)), "-0:01:00");
        assert_eq!(format_timespan(ChronoDuration::seconds(90061)), "25:01:01");
    }
}
