//! Scoring entry point of an artifact and the local verify round trip.
//!
//! The entry point is a plugin: a [`ScoreLoader`] turns the artifact's score
//! file into a [`ScoreModule`], which loads the model and runs predictions.
//! Load failures surface as `ScoreModule` errors.

use std::any::Any;
use std::fmt;
use std::path::{Path, PathBuf};

use serde_json::{json, Value};
use tracing::debug;

use crate::common::error::{ArtifactError, ArtifactResult};

/// Score file of format 3.0 and later.
pub const SCORE_FILE_NAME: &str = "score.py";
/// Directory holding the score file in legacy formats.
pub const LEGACY_SCORE_DIR: &str = "fn-model";

/// A loaded model. Model specific members are reached through [`as_any`](ModelHandle::as_any).
pub trait ModelHandle: fmt::Debug {
    fn as_any(&self) -> &dyn Any;
}

/// Contract of the artifact's scoring entry point.
pub trait ScoreModule {
    /// Load the serialized model, optionally by file name.
    fn load_model(&self, model_file_name: Option<&str>) -> ArtifactResult<Box<dyn ModelHandle>>;

    fn predict(&self, data: &Value, model: &dyn ModelHandle) -> ArtifactResult<Value>;
}

/// Turns a score file into a [`ScoreModule`].
pub trait ScoreLoader {
    fn load(&self, entry: &Path) -> ArtifactResult<Box<dyn ScoreModule>>;
}

/// Location of the score file for the artifact format.
pub fn score_entry(dir: &Path, legacy: bool) -> PathBuf {
    if legacy {
        dir.join(LEGACY_SCORE_DIR).join(SCORE_FILE_NAME)
    } else {
        dir.join(SCORE_FILE_NAME)
    }
}

/// Load the score module, failing when the entry file is missing.
pub fn load_score_module(
    loader: &dyn ScoreLoader,
    dir: &Path,
    legacy: bool,
) -> ArtifactResult<Box<dyn ScoreModule>> {
    let entry = score_entry(dir, legacy);
    // Legacy artifacts sometimes keep the score file at the root.
    let entry = if !entry.is_file() && legacy && dir.join(SCORE_FILE_NAME).is_file() {
        dir.join(SCORE_FILE_NAME)
    } else {
        entry
    };
    if !entry.is_file() {
        return Err(ArtifactError::ScoreModule(format!(
            "{} does not exist",
            entry.display()
        )));
    }
    debug!(entry = %entry.display(), "loading score module");
    loader.load(&entry)
}

/// Input accepted by [`verify`].
#[derive(Clone, Debug, PartialEq)]
pub enum VerifyInput {
    /// JSON text.
    Json(String),
    /// A JSON object.
    Value(Value),
    /// UTF-8 encoded JSON bytes.
    Stream(Vec<u8>),
}

/// Output of [`verify`], in the same shape as the input.
#[derive(Clone, Debug, PartialEq)]
pub enum VerifyOutput {
    Json(String),
    Value(Value),
    Stream(Vec<u8>),
}

impl VerifyOutput {
    /// The response as a JSON value regardless of its shape.
    pub fn into_value(self) -> ArtifactResult<Value> {
        match self {
            VerifyOutput::Value(v) => Ok(v),
            VerifyOutput::Json(text) => Ok(serde_json::from_str(&text)?),
            VerifyOutput::Stream(bytes) => Ok(serde_json::from_slice(&bytes)?),
        }
    }
}

/// Run `input` through the scoring entry point the way the serving handler
/// does: the payload is read from `input` (or `data`), and the prediction is
/// returned under `prediction`.
pub fn verify(
    module: &dyn ScoreModule,
    model: &dyn ModelHandle,
    input: VerifyInput,
) -> ArtifactResult<VerifyOutput> {
    let (payload, shape) = match input {
        VerifyInput::Json(text) => (parse(text.as_bytes(), "text")?, Shape::Json),
        VerifyInput::Stream(bytes) => (parse(&bytes, "byte stream")?, Shape::Stream),
        VerifyInput::Value(value @ Value::Object(_)) => (value, Shape::Value),
        VerifyInput::Value(other) => {
            return Err(ArtifactError::InvalidInputType(kind_name(&other).to_string()))
        }
    };
    let data = payload
        .get("input")
        .or_else(|| payload.get("data"))
        .unwrap_or(&payload);
    let prediction = module.predict(data, model)?;
    let response = json!({ "prediction": prediction });
    Ok(match shape {
        Shape::Json => VerifyOutput::Json(serde_json::to_string(&response)?),
        Shape::Stream => VerifyOutput::Stream(serde_json::to_vec(&response)?),
        Shape::Value => VerifyOutput::Value(response),
    })
}

enum Shape {
    Json,
    Value,
    Stream,
}

fn parse(bytes: &[u8], what: &str) -> ArtifactResult<Value> {
    serde_json::from_slice(bytes)
        .map_err(|e| ArtifactError::InvalidInputType(format!("{what} is not valid JSON ({e})")))
}

fn kind_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
