//! Schema inference from tabular samples.

use serde_json::{Map, Number, Value};
use tracing::debug;

use crate::common::error::{ArtifactError, ArtifactResult};

use super::domain::{Attribute, Domain, Schema};
use super::sample::{SampleColumn, TabularSample};

/// Widest sample a schema is generated for unless the caller raises the limit.
pub const DEFAULT_MAX_COLUMNS: usize = 400;

/// Derive a schema from `sample`. Samples wider than `max_columns` fail with
/// `DataTooWide`; they are never truncated.
pub fn infer(sample: &TabularSample, max_columns: usize) -> ArtifactResult<Schema> {
    let columns = sample.n_cols();
    if columns > max_columns {
        return Err(ArtifactError::DataTooWide {
            columns,
            max: max_columns,
        });
    }
    let attributes = sample
        .columns()
        .iter()
        .enumerate()
        .map(|(order, column)| describe(order, column))
        .collect();
    let schema = Schema { attributes };
    debug!(columns, rows = sample.n_rows(), "schema inferred");
    Ok(schema)
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum Kind {
    Boolean,
    Integer,
    Continuous,
    Text,
    Mixed,
    Empty,
}

impl Kind {
    fn dtype(self) -> &'static str {
        match self {
            Kind::Boolean => "bool",
            Kind::Integer => "int64",
            Kind::Continuous => "float64",
            Kind::Text | Kind::Mixed | Kind::Empty => "object",
        }
    }

    fn feature_type(self) -> &'static str {
        match self {
            Kind::Boolean => "Boolean",
            Kind::Integer => "Integer",
            Kind::Continuous => "Continuous",
            Kind::Text => "String",
            Kind::Mixed | Kind::Empty => "Unknown",
        }
    }
}

fn classify(values: &[&Value]) -> Kind {
    let mut kind = Kind::Empty;
    for value in values {
        let this = match value {
            Value::Bool(_) => Kind::Boolean,
            Value::Number(n) if n.is_i64() || n.is_u64() => Kind::Integer,
            Value::Number(_) => Kind::Continuous,
            Value::String(_) => Kind::Text,
            _ => Kind::Mixed,
        };
        kind = match (kind, this) {
            (Kind::Empty, k) => k,
            (a, b) if a == b => a,
            (Kind::Integer, Kind::Continuous) | (Kind::Continuous, Kind::Integer) => {
                Kind::Continuous
            }
            _ => return Kind::Mixed,
        };
    }
    kind
}

fn describe(order: usize, column: &SampleColumn) -> Attribute {
    let present: Vec<&Value> = column.values.iter().filter(|v| !v.is_null()).collect();
    let missing = column.values.len() - present.len();
    let kind = classify(&present);

    let mut stats = Map::new();
    stats.insert("count".into(), Value::from(present.len()));
    stats.insert("missing".into(), Value::from(missing));
    match kind {
        Kind::Integer | Kind::Continuous => {
            let numbers: Vec<f64> = present.iter().filter_map(|v| v.as_f64()).collect();
            numeric_stats(&numbers, &mut stats);
        }
        _ => categorical_stats(&present, &mut stats),
    }

    Attribute {
        dtype: kind.dtype().to_string(),
        feature_type: kind.feature_type().to_string(),
        name: column.name.clone(),
        domain: Domain {
            values: kind.feature_type().to_string(),
            stats,
            constraints: Vec::new(),
        },
        required: missing == 0,
        description: column.name.clone(),
        order,
    }
}

fn numeric_stats(numbers: &[f64], stats: &mut Map<String, Value>) {
    if numbers.is_empty() {
        return;
    }
    let mut sorted = numbers.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let n = sorted.len() as f64;
    let mean = sorted.iter().sum::<f64>() / n;
    let std = if sorted.len() > 1 {
        (sorted.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (n - 1.0)).sqrt()
    } else {
        f64::NAN
    };
    let entries = [
        ("mean", mean),
        ("standard deviation", std),
        ("min", sorted[0]),
        ("25%", quantile(&sorted, 0.25)),
        ("50%", quantile(&sorted, 0.5)),
        ("75%", quantile(&sorted, 0.75)),
        ("max", sorted[sorted.len() - 1]),
    ];
    for (name, value) in entries {
        // NaN has no JSON form; it is recorded as null.
        let json = Number::from_f64(value).map(Value::Number).unwrap_or(Value::Null);
        stats.insert(name.to_string(), json);
    }
}

/// Linear interpolation between closest ranks.
fn quantile(sorted: &[f64], q: f64) -> f64 {
    let pos = q * (sorted.len() - 1) as f64;
    let lower = pos.floor() as usize;
    let upper = pos.ceil() as usize;
    let weight = pos - lower as f64;
    sorted[lower] + (sorted[upper] - sorted[lower]) * weight
}

fn categorical_stats(values: &[&Value], stats: &mut Map<String, Value>) {
    let mut counts: Vec<(String, usize)> = Vec::new();
    for value in values {
        let key = match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        match counts.iter_mut().find(|(k, _)| *k == key) {
            Some((_, n)) => *n += 1,
            None => counts.push((key, 1)),
        }
    }
    stats.insert("unique".into(), Value::from(counts.len()));
    // First seen wins ties, so the result does not depend on hashing.
    let top = counts
        .iter()
        .fold(None::<&(String, usize)>, |best, entry| match best {
            Some(b) if b.1 >= entry.1 => Some(b),
            _ => Some(entry),
        });
    if let Some((value, freq)) = top {
        stats.insert("top".into(), Value::String(value.clone()));
        stats.insert("freq".into(), Value::from(*freq));
    }
}
