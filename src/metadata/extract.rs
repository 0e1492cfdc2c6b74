//! Framework-specific metadata extraction contract.

use serde_json::{Map, Value};

use super::domain::Framework;

/// Capability every per-framework extractor exposes.
pub trait ModelInfoExtractor {
    fn framework(&self) -> Framework;
    fn algorithm(&self) -> String;
    fn version(&self) -> Option<String>;
    fn hyperparameters(&self) -> Value;

    /// Collect everything into one record with normalised hyperparameters.
    fn extract(&self) -> ExtractedInfo {
        ExtractedInfo {
            framework: self.framework(),
            framework_version: self.version(),
            algorithm: self.algorithm(),
            hyperparameters: normalize_hyperparameters(self.hyperparameters()),
        }
    }
}

/// Output of a [`ModelInfoExtractor`].
#[derive(Clone, Debug, PartialEq)]
pub struct ExtractedInfo {
    pub framework: Framework,
    pub framework_version: Option<String>,
    pub algorithm: String,
    pub hyperparameters: Value,
}

/// Bring extractor output into the shape stored in taxonomy metadata.
///
/// Non-object values are wrapped under `"value"`. A `steps` list of
/// `[name, estimator]` pairs (pipelines) becomes an index-keyed object and each
/// step is also exposed at the top level under its name, with parentheses
/// stripped from the estimator description.
pub fn normalize_hyperparameters(raw: Value) -> Value {
    let mut params = match raw {
        Value::Object(map) => map,
        Value::Null => return Value::Object(Map::new()),
        other => {
            let mut map = Map::new();
            map.insert("value".to_string(), other);
            map
        }
    };

    let Some(Value::Array(steps)) = params.get("steps").cloned() else {
        return Value::Object(params);
    };

    let mut indexed = Map::new();
    for (idx, step) in steps.iter().enumerate() {
        let Some((name, estimator)) = step_pair(step) else {
            continue;
        };
        let text = strip_parens(&estimator);
        let mut entry = Map::new();
        entry.insert(name.clone(), Value::String(text.clone()));
        indexed.insert(idx.to_string(), Value::Object(entry));
        params.insert(name, Value::String(text));
    }
    params.insert("steps".to_string(), Value::Object(indexed));
    Value::Object(params)
}

fn step_pair(step: &Value) -> Option<(String, String)> {
    let pair = step.as_array()?;
    let name = pair.first()?.as_str()?.to_string();
    let estimator = match pair.get(1)? {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    Some((name, estimator))
}

fn strip_parens(text: &str) -> String {
    text.chars().filter(|c| *c != '(' && *c != ')').collect()
}
