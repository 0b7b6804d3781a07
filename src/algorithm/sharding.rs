use std::fmt::Write;
use std::ops::Bound;

use chrono::format::{Item, StrftimeItems};
use chrono::{Duration, Months, NaiveDate, NaiveDateTime};

use super::props::{self, Props};
use super::{ShardingAlgorithm, ShardingValue, select_by_suffix};
use crate::ast::Value;
use crate::condition::ValueRange;
use crate::error::{ShardError, ShardResult};
use crate::rule::inline::Template;

const KIND: &str = "sharding";

/// Integer bounds of a range, when both ends are integers.
fn int_span(range: &ValueRange) -> Option<(i64, i64)> {
    let low = match &range.lower {
        Bound::Included(Value::Int(n)) => *n,
        Bound::Excluded(Value::Int(n)) => n.checked_add(1)?,
        _ => return None,
    };
    let high = match &range.upper {
        Bound::Included(Value::Int(n)) => *n,
        Bound::Excluded(Value::Int(n)) => n.checked_sub(1)?,
        _ => return None,
    };
    Some((low, high))
}

/// `value % sharding_count` selects the target with that suffix.
#[derive(Debug)]
pub struct ModSharding {
    count: i64,
}

impl ModSharding {
    pub fn new(props: &Props) -> ShardResult<Self> {
        Ok(Self {
            count: props::positive_i64(props, "sharding_count", KIND)?,
        })
    }
}

impl ShardingAlgorithm for ModSharding {
    fn compute(&self, candidates: &[String], value: &ShardingValue<'_>) -> ShardResult<Vec<String>> {
        let suffixes: Vec<String> = match value {
            ShardingValue::Exact { values, .. } => values
                .iter()
                .map(|v| Ok(v.as_i64()?.rem_euclid(self.count).to_string()))
                .collect::<ShardResult<_>>()?,
            ShardingValue::Range { range, .. } => match int_span(range) {
                Some((low, high)) if high < low => Vec::new(),
                Some((low, high)) if high.checked_sub(low).is_some_and(|d| d < self.count) => {
                    (low..=high).map(|n| n.rem_euclid(self.count).to_string()).collect()
                }
                _ => return Ok(candidates.to_vec()),
            },
        };
        Ok(select_by_suffix(candidates, &suffixes))
    }
}

/// CRC32 of the value bytes modulo `sharding_count`.
#[derive(Debug)]
pub struct HashModSharding {
    count: i64,
}

impl HashModSharding {
    pub fn new(props: &Props) -> ShardResult<Self> {
        Ok(Self {
            count: props::positive_i64(props, "sharding_count", KIND)?,
        })
    }

    fn bucket(&self, value: &Value) -> i64 {
        i64::from(crc32fast::hash(&value.to_bytes())) % self.count
    }
}

impl ShardingAlgorithm for HashModSharding {
    fn compute(&self, candidates: &[String], value: &ShardingValue<'_>) -> ShardResult<Vec<String>> {
        match value {
            ShardingValue::Exact { values, .. } => {
                let suffixes: Vec<String> = values.iter().map(|v| self.bucket(v).to_string()).collect();
                Ok(select_by_suffix(candidates, &suffixes))
            }
            ShardingValue::Range { .. } => Ok(candidates.to_vec()),
        }
    }
}

/// Partitions split at ascending boundaries.
///
/// With boundaries `[b0, b1]` partition 0 holds `x < b0`, partition 1
/// holds `b0 <= x < b1` and partition 2 holds `x >= b1`.
#[derive(Debug)]
pub struct BoundaryRangeSharding {
    boundaries: Vec<i64>,
}

impl BoundaryRangeSharding {
    pub fn new(props: &Props) -> ShardResult<Self> {
        Self::with_boundaries(props::i64_list(props, "sharding_ranges", KIND)?)
    }

    fn with_boundaries(boundaries: Vec<i64>) -> ShardResult<Self> {
        if boundaries.is_empty() {
            return Err(ShardError::algorithm(KIND, "at least one boundary is required"));
        }
        if boundaries.windows(2).any(|w| w[0] >= w[1]) {
            return Err(ShardError::algorithm(KIND, "boundaries must be strictly ascending"));
        }
        Ok(Self { boundaries })
    }

    fn partition(&self, n: i64) -> usize {
        self.boundaries.partition_point(|b| *b <= n)
    }

    fn partitions(&self, range: &ValueRange) -> ShardResult<Vec<usize>> {
        let first = match &range.lower {
            Bound::Unbounded => 0,
            Bound::Included(v) | Bound::Excluded(v) => self.partition(v.as_i64()?),
        };
        let last = match &range.upper {
            Bound::Unbounded => self.boundaries.len(),
            Bound::Included(v) => self.partition(v.as_i64()?),
            Bound::Excluded(v) => {
                let n = v.as_i64()?;
                self.boundaries.partition_point(|b| *b < n)
            }
        };
        Ok(if first > last { Vec::new() } else { (first..=last).collect() })
    }
}

impl ShardingAlgorithm for BoundaryRangeSharding {
    fn compute(&self, candidates: &[String], value: &ShardingValue<'_>) -> ShardResult<Vec<String>> {
        let partitions = match value {
            ShardingValue::Exact { values, .. } => values
                .iter()
                .map(|v| Ok(self.partition(v.as_i64()?)))
                .collect::<ShardResult<Vec<_>>>()?,
            ShardingValue::Range { range, .. } => self.partitions(range)?,
        };
        let suffixes: Vec<String> = partitions.iter().map(|p| p.to_string()).collect();
        Ok(select_by_suffix(candidates, &suffixes))
    }
}

/// Fixed-volume partitions between `range_lower` and `range_upper`, plus one
/// partition below and one above.
#[derive(Debug)]
pub struct VolumeRangeSharding {
    inner: BoundaryRangeSharding,
}

impl VolumeRangeSharding {
    pub fn new(props: &Props) -> ShardResult<Self> {
        let lower = props::required_i64(props, "range_lower", KIND)?;
        let upper = props::required_i64(props, "range_upper", KIND)?;
        let volume = props::positive_i64(props, "sharding_volume", KIND)?;
        if upper <= lower {
            return Err(ShardError::algorithm(KIND, "range_upper must be greater than range_lower"));
        }
        let mut boundaries = Vec::new();
        let mut edge = lower;
        while edge < upper {
            boundaries.push(edge);
            edge = edge.saturating_add(volume);
        }
        boundaries.push(upper);
        Ok(Self {
            inner: BoundaryRangeSharding::with_boundaries(boundaries)?,
        })
    }
}

impl ShardingAlgorithm for VolumeRangeSharding {
    fn compute(&self, candidates: &[String], value: &ShardingValue<'_>) -> ShardResult<Vec<String>> {
        self.inner.compute(candidates, value)
    }
}

/// Target name rendered from an inline expression such as
/// `t_order_${order_id % 4}`.
#[derive(Debug)]
pub struct InlineSharding {
    template: Template,
}

impl InlineSharding {
    pub fn new(props: &Props) -> ShardResult<Self> {
        let expr = props::required_str(props, "algorithm_expression", KIND)?;
        Ok(Self {
            template: Template::parse(&expr)?,
        })
    }
}

impl ShardingAlgorithm for InlineSharding {
    fn compute(&self, candidates: &[String], value: &ShardingValue<'_>) -> ShardResult<Vec<String>> {
        match value {
            ShardingValue::Exact { column, values } => {
                let mut targets = Vec::with_capacity(values.len());
                for v in *values {
                    targets.push(self.template.render(|name| {
                        name.eq_ignore_ascii_case(column).then_some(v)
                    })?);
                }
                Ok(candidates
                    .iter()
                    .filter(|c| targets.iter().any(|t| t.eq_ignore_ascii_case(c)))
                    .cloned()
                    .collect())
            }
            // Inline expressions cannot prune ranges.
            ShardingValue::Range { .. } => Ok(candidates.to_vec()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IntervalUnit {
    Hours,
    Days,
    Months,
    Years,
}

/// Upper limit on the number of partitions an interval rule may declare.
const MAX_INTERVALS: usize = 100_000;

/// Time partitions of `interval_amount` units between `datetime_lower` and
/// `datetime_upper`, suffixed by the partition start formatted with
/// `sharding_suffix_pattern`.
#[derive(Debug)]
pub struct IntervalSharding {
    /// Partition start and (exclusive) end, with the formatted suffix.
    windows: Vec<(NaiveDateTime, NaiveDateTime, String)>,
}

impl IntervalSharding {
    pub fn new(props: &Props) -> ShardResult<Self> {
        let lower = parse_datetime_prop(props, "datetime_lower")?;
        let upper = parse_datetime_prop(props, "datetime_upper")?;
        let pattern = props::required_str(props, "sharding_suffix_pattern", KIND)?;
        let unit = match props::optional_str(props, "interval_unit", KIND)?
            .unwrap_or_else(|| "DAYS".to_string())
            .to_ascii_uppercase()
            .as_str()
        {
            "HOURS" => IntervalUnit::Hours,
            "DAYS" => IntervalUnit::Days,
            "MONTHS" => IntervalUnit::Months,
            "YEARS" => IntervalUnit::Years,
            other => {
                return Err(ShardError::algorithm(KIND, format!("unknown interval_unit '{}'", other)));
            }
        };
        let amount = props::optional_i64(props, "interval_amount", KIND)?.unwrap_or(1);
        let amount = u32::try_from(amount)
            .ok()
            .filter(|a| *a > 0)
            .ok_or_else(|| ShardError::algorithm(KIND, "interval_amount must be a positive integer"))?;
        if upper < lower {
            return Err(ShardError::algorithm(KIND, "datetime_upper is before datetime_lower"));
        }

        let items: Vec<Item<'_>> = StrftimeItems::new(&pattern).collect();
        if items.iter().any(|i| matches!(i, Item::Error)) {
            return Err(ShardError::algorithm(
                KIND,
                format!("invalid sharding_suffix_pattern '{}'", pattern),
            ));
        }

        let mut windows = Vec::new();
        let mut start = lower;
        while start <= upper {
            let end = step(start, unit, amount)
                .ok_or_else(|| ShardError::algorithm(KIND, "interval overflows the calendar"))?;
            let mut suffix = String::new();
            write!(suffix, "{}", start.format_with_items(items.iter())).map_err(|_| {
                ShardError::algorithm(
                    KIND,
                    format!("sharding_suffix_pattern '{}' cannot format a local datetime", pattern),
                )
            })?;
            windows.push((start, end, suffix));
            if windows.len() > MAX_INTERVALS {
                return Err(ShardError::algorithm(
                    KIND,
                    format!("more than {} intervals between the bounds", MAX_INTERVALS),
                ));
            }
            start = end;
        }
        Ok(Self { windows })
    }
}

fn step(start: NaiveDateTime, unit: IntervalUnit, amount: u32) -> Option<NaiveDateTime> {
    match unit {
        IntervalUnit::Hours => start.checked_add_signed(Duration::hours(i64::from(amount))),
        IntervalUnit::Days => start.checked_add_signed(Duration::days(i64::from(amount))),
        IntervalUnit::Months => start.checked_add_months(Months::new(amount)),
        IntervalUnit::Years => start.checked_add_months(Months::new(amount.checked_mul(12)?)),
    }
}

fn parse_datetime_prop(props: &Props, key: &str) -> ShardResult<NaiveDateTime> {
    let raw = props::required_str(props, key, KIND)?;
    parse_datetime(&raw)
        .ok_or_else(|| ShardError::algorithm(KIND, format!("'{}' is not a datetime: '{}'", key, raw)))
}

fn parse_datetime(s: &str) -> Option<NaiveDateTime> {
    const FORMATS: [&str; 3] = ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S%.f"];
    FORMATS
        .iter()
        .find_map(|f| NaiveDateTime::parse_from_str(s, f).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

fn value_datetime(value: &Value) -> ShardResult<NaiveDateTime> {
    match value {
        Value::Timestamp(ts) => Ok(*ts),
        Value::String(s) => parse_datetime(s).ok_or_else(|| ShardError::coercion(value, "timestamp")),
        other => Err(ShardError::coercion(other, "timestamp")),
    }
}

impl ShardingAlgorithm for IntervalSharding {
    fn compute(&self, candidates: &[String], value: &ShardingValue<'_>) -> ShardResult<Vec<String>> {
        let mut suffixes = Vec::new();
        match value {
            ShardingValue::Exact { values, .. } => {
                for v in *values {
                    let ts = value_datetime(v)?;
                    if let Some((_, _, suffix)) =
                        self.windows.iter().find(|(start, end, _)| *start <= ts && ts < *end)
                    {
                        suffixes.push(suffix.clone());
                    }
                }
            }
            ShardingValue::Range { range, .. } => {
                let lower = bound_datetime(&range.lower)?;
                let upper = bound_datetime(&range.upper)?;
                for (start, end, suffix) in &self.windows {
                    let below_end = match &lower {
                        Bound::Unbounded => true,
                        Bound::Included(l) | Bound::Excluded(l) => l < end,
                    };
                    let above_start = match &upper {
                        Bound::Unbounded => true,
                        Bound::Included(u) => u >= start,
                        Bound::Excluded(u) => u > start,
                    };
                    if below_end && above_start {
                        suffixes.push(suffix.clone());
                    }
                }
            }
        }
        Ok(select_by_suffix(candidates, &suffixes))
    }
}

fn bound_datetime(bound: &Bound<Value>) -> ShardResult<Bound<NaiveDateTime>> {
    Ok(match bound {
        Bound::Unbounded => Bound::Unbounded,
        Bound::Included(v) => Bound::Included(value_datetime(v)?),
        Bound::Excluded(v) => Bound::Excluded(value_datetime(v)?),
    })
}
