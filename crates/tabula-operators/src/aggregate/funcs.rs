//! Built-in aggregation functions over a group's extracted values.

use std::collections::BTreeSet;

use tabula_core::types::{Row, Value};

use crate::traits::{OpError, Result};

fn fail(message: String) -> OpError {
    OpError::Aggregation {
        field: String::new(),
        message,
    }
}

pub fn count(values: &[Value]) -> Result<Value> {
    Ok(Value::from(values.len()))
}

/// Group size, for whole-row aggregators.
pub fn count_rows(rows: &[Row]) -> Result<Value> {
    Ok(Value::from(rows.len()))
}

/// Numeric sum. Nulls are skipped; the result stays an integer while every
/// input is one and the total fits.
pub fn sum(values: &[Value]) -> Result<Value> {
    let mut int: Option<i64> = Some(0);
    let mut float = 0.0f64;
    for v in values {
        match v {
            Value::Null => {}
            Value::Int(i) => {
                int = int.and_then(|acc| acc.checked_add(*i));
                float += *i as f64;
            }
            Value::Float(f) => {
                int = None;
                float += f;
            }
            other => return Err(fail(format!("sum: non-numeric value {other}"))),
        }
    }
    Ok(match int {
        Some(i) => Value::Int(i),
        None => Value::Float(float),
    })
}

pub fn min(values: &[Value]) -> Result<Value> {
    Ok(values.iter().filter(|v| !v.is_null()).min().cloned().unwrap_or_default())
}

pub fn max(values: &[Value]) -> Result<Value> {
    Ok(values.iter().filter(|v| !v.is_null()).max().cloned().unwrap_or_default())
}

/// Arithmetic mean of the non-null values; null for an all-null group.
pub fn mean(values: &[Value]) -> Result<Value> {
    let mut total = 0.0;
    let mut n = 0usize;
    for v in values {
        match v {
            Value::Null => {}
            other => {
                let x = other
                    .as_f64()
                    .ok_or_else(|| fail(format!("mean: non-numeric value {other}")))?;
                total += x;
                n += 1;
            }
        }
    }
    Ok(if n == 0 {
        Value::Null
    } else {
        Value::Float(total / n as f64)
    })
}

pub fn first(values: &[Value]) -> Result<Value> {
    Ok(values.first().cloned().unwrap_or_default())
}

pub fn last(values: &[Value]) -> Result<Value> {
    Ok(values.last().cloned().unwrap_or_default())
}

pub fn list(values: &[Value]) -> Result<Value> {
    Ok(Value::List(values.to_vec()))
}

/// Distinct values in ascending order.
pub fn set(values: &[Value]) -> Result<Value> {
    let distinct: BTreeSet<&Value> = values.iter().collect();
    Ok(Value::List(distinct.into_iter().cloned().collect()))
}

/// Display forms of the values joined with `sep`.
pub fn strjoin(sep: &str) -> impl Fn(&[Value]) -> Result<Value> + Send + Sync + 'static {
    let sep = sep.to_string();
    move |values: &[Value]| {
        let parts: Vec<String> = values.iter().map(|v| v.to_string()).collect();
        Ok(Value::Text(parts.join(&sep)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tabula_core::row;

    #[test]
    fn sum_keeps_integers_integral() {
        assert_eq!(sum(&row![3, 7]).unwrap(), Value::Int(10));
        assert_eq!(sum(&row![1, 0.5, None::<i64>]).unwrap(), Value::Float(1.5));
        assert_eq!(sum(&[]).unwrap(), Value::Int(0));
        assert!(sum(&row![1, "x"]).is_err());
    }

    #[test]
    fn min_max_mean_skip_nulls() {
        let vals = row![None::<i64>, 4, 2.5, 9];
        assert_eq!(min(&vals).unwrap(), Value::Float(2.5));
        assert_eq!(max(&vals).unwrap(), Value::Int(9));
        assert_eq!(mean(&row![1, 2, None::<i64>]).unwrap(), Value::Float(1.5));
        assert_eq!(mean(&row![None::<i64>]).unwrap(), Value::Null);
    }

    #[test]
    fn collections_and_strjoin() {
        assert_eq!(set(&row!["b", "a", "b"]).unwrap(), Value::List(row!["a", "b"]));
        assert_eq!(list(&row![1, 1]).unwrap(), Value::List(row![1, 1]));
        assert_eq!(strjoin("-")(&row!["a", 1]).unwrap(), Value::from("a-1"));
        assert_eq!(first(&row![5, 6]).unwrap(), Value::Int(5));
        assert_eq!(last(&row![5, 6]).unwrap(), Value::Int(6));
        assert_eq!(count(&row![5, 6]).unwrap(), Value::Int(2));
    }
}
