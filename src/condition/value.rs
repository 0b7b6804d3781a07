use std::cmp::Ordering;
use std::ops::Bound;

use crate::ast::{BinaryOp, Value};

/// Interval over [`Value`] with inclusive, exclusive or open ends.
#[derive(Debug, Clone, PartialEq)]
pub struct ValueRange {
    pub lower: Bound<Value>,
    pub upper: Bound<Value>,
}

impl ValueRange {
    pub fn all() -> Self {
        Self {
            lower: Bound::Unbounded,
            upper: Bound::Unbounded,
        }
    }

    /// `low <= x <= high`
    pub fn closed(low: Value, high: Value) -> Self {
        Self {
            lower: Bound::Included(low),
            upper: Bound::Included(high),
        }
    }

    /// Range described by `column <op> value`; `None` for non-range operators.
    pub fn from_comparison(op: BinaryOp, value: Value) -> Option<Self> {
        let range = match op {
            BinaryOp::Lt => Self {
                lower: Bound::Unbounded,
                upper: Bound::Excluded(value),
            },
            BinaryOp::Lte => Self {
                lower: Bound::Unbounded,
                upper: Bound::Included(value),
            },
            BinaryOp::Gt => Self {
                lower: Bound::Excluded(value),
                upper: Bound::Unbounded,
            },
            BinaryOp::Gte => Self {
                lower: Bound::Included(value),
                upper: Bound::Unbounded,
            },
            _ => return None,
        };
        Some(range)
    }

    pub fn contains(&self, value: &Value) -> bool {
        let above = match &self.lower {
            Bound::Unbounded => true,
            Bound::Included(l) => value.compare(l) != Ordering::Less,
            Bound::Excluded(l) => value.compare(l) == Ordering::Greater,
        };
        let below = match &self.upper {
            Bound::Unbounded => true,
            Bound::Included(u) => value.compare(u) != Ordering::Greater,
            Bound::Excluded(u) => value.compare(u) == Ordering::Less,
        };
        above && below
    }

    /// Whether no value can satisfy the range.
    pub fn is_empty(&self) -> bool {
        match (&self.lower, &self.upper) {
            (Bound::Included(l), Bound::Included(u)) => l.compare(u) == Ordering::Greater,
            (Bound::Included(l), Bound::Excluded(u))
            | (Bound::Excluded(l), Bound::Included(u))
            | (Bound::Excluded(l), Bound::Excluded(u)) => l.compare(u) != Ordering::Less,
            _ => false,
        }
    }

    pub fn intersect(&self, other: &ValueRange) -> ValueRange {
        ValueRange {
            lower: tighter_lower(&self.lower, &other.lower),
            upper: tighter_upper(&self.upper, &other.upper),
        }
    }
}

fn tighter_lower(a: &Bound<Value>, b: &Bound<Value>) -> Bound<Value> {
    match (a, b) {
        (Bound::Unbounded, other) | (other, Bound::Unbounded) => other.clone(),
        (Bound::Included(x) | Bound::Excluded(x), Bound::Included(y) | Bound::Excluded(y)) => {
            match x.compare(y) {
                Ordering::Greater => a.clone(),
                Ordering::Less => b.clone(),
                Ordering::Equal if matches!(a, Bound::Excluded(_)) => a.clone(),
                Ordering::Equal => b.clone(),
            }
        }
    }
}

fn tighter_upper(a: &Bound<Value>, b: &Bound<Value>) -> Bound<Value> {
    match (a, b) {
        (Bound::Unbounded, other) | (other, Bound::Unbounded) => other.clone(),
        (Bound::Included(x) | Bound::Excluded(x), Bound::Included(y) | Bound::Excluded(y)) => {
            match x.compare(y) {
                Ordering::Less => a.clone(),
                Ordering::Greater => b.clone(),
                Ordering::Equal if matches!(a, Bound::Excluded(_)) => a.clone(),
                Ordering::Equal => b.clone(),
            }
        }
    }
}

/// Candidate values of one sharding column.
#[derive(Debug, Clone, PartialEq)]
pub enum ConditionValue {
    /// Discrete values, deduplicated, in first-seen order.
    Exact(Vec<Value>),
    Range(ValueRange),
}

impl ConditionValue {
    pub fn exact(values: Vec<Value>) -> Self {
        let mut unique: Vec<Value> = Vec::with_capacity(values.len());
        for v in values {
            if !unique.iter().any(|u| u.compare(&v) == Ordering::Equal) {
                unique.push(v);
            }
        }
        ConditionValue::Exact(unique)
    }

    /// AND of two value sets. `None` means no value satisfies both.
    pub fn intersect(&self, other: &ConditionValue) -> Option<ConditionValue> {
        let result = match (self, other) {
            (ConditionValue::Exact(a), ConditionValue::Exact(b)) => ConditionValue::Exact(
                a.iter()
                    .filter(|v| b.iter().any(|w| v.compare(w) == Ordering::Equal))
                    .cloned()
                    .collect(),
            ),
            (ConditionValue::Exact(values), ConditionValue::Range(range))
            | (ConditionValue::Range(range), ConditionValue::Exact(values)) => {
                ConditionValue::Exact(values.iter().filter(|v| range.contains(v)).cloned().collect())
            }
            (ConditionValue::Range(a), ConditionValue::Range(b)) => {
                ConditionValue::Range(a.intersect(b))
            }
        };
        if result.is_empty() { None } else { Some(result) }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            ConditionValue::Exact(values) => values.is_empty(),
            ConditionValue::Range(range) => range.is_empty(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_range_intersection_tightens_bounds() {
        let a = ValueRange::from_comparison(BinaryOp::Gte, Value::Int(10)).unwrap();
        let b = ValueRange::from_comparison(BinaryOp::Lt, Value::Int(20)).unwrap();
        let c = ValueRange::from_comparison(BinaryOp::Gt, Value::Int(10)).unwrap();
        let r = a.intersect(&b).intersect(&c);
        assert_eq!(r.lower, Bound::Excluded(Value::Int(10)));
        assert_eq!(r.upper, Bound::Excluded(Value::Int(20)));
        assert!(!r.contains(&Value::Int(10)));
        assert!(r.contains(&Value::Int(19)));
    }

    #[test]
    fn test_empty_ranges() {
        assert!(ValueRange::closed(Value::Int(5), Value::Int(4)).is_empty());
        assert!(!ValueRange::closed(Value::Int(5), Value::Int(5)).is_empty());
        let half_open = ValueRange {
            lower: Bound::Included(Value::Int(5)),
            upper: Bound::Excluded(Value::Int(5)),
        };
        assert!(half_open.is_empty());
    }

    #[test]
    fn test_exact_and_range_intersection() {
        let exact = ConditionValue::exact(vec![Value::Int(1), Value::Int(150), Value::Int(1)]);
        assert_eq!(exact, ConditionValue::Exact(vec![Value::Int(1), Value::Int(150)]));
        let range = ConditionValue::Range(ValueRange::closed(Value::Int(100), Value::Int(199)));
        assert_eq!(
            exact.intersect(&range),
            Some(ConditionValue::Exact(vec![Value::Int(150)]))
        );
        let disjoint = ConditionValue::exact(vec![Value::Int(2)]);
        assert_eq!(exact.intersect(&disjoint), None);
    }
}
