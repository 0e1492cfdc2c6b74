//! Column-oriented tabular samples.
//!
//! Every accepted input shape (columns, rows with a header, records, a single
//! series) is converted into the same representation before schema inference
//! or CSV snapshotting.

use serde_json::{Map, Value};

use crate::common::error::{ArtifactError, ArtifactResult};

/// One named column of cell values.
#[derive(Clone, Debug, PartialEq)]
pub struct SampleColumn {
    pub name: String,
    pub values: Vec<Value>,
}

/// Uniform column-oriented sample. All columns have the same length.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TabularSample {
    columns: Vec<SampleColumn>,
}

impl TabularSample {
    pub fn from_columns(columns: Vec<SampleColumn>) -> ArtifactResult<Self> {
        if let Some(first) = columns.first() {
            let rows = first.values.len();
            if let Some(bad) = columns.iter().find(|c| c.values.len() != rows) {
                return Err(ArtifactError::InvalidArgument(format!(
                    "column `{}` has {} values, expected {rows}",
                    bad.name,
                    bad.values.len()
                )));
            }
        }
        Ok(Self { columns })
    }

    /// Rows with a header. Without a header, columns are named by position.
    pub fn from_rows(header: Option<Vec<String>>, rows: Vec<Vec<Value>>) -> ArtifactResult<Self> {
        let width = header
            .as_ref()
            .map(Vec::len)
            .or_else(|| rows.first().map(Vec::len))
            .unwrap_or(0);
        let names = header.unwrap_or_else(|| (0..width).map(|i| i.to_string()).collect());

        let mut columns: Vec<SampleColumn> = names
            .into_iter()
            .map(|name| SampleColumn {
                name,
                values: Vec::with_capacity(rows.len()),
            })
            .collect();
        for (idx, row) in rows.into_iter().enumerate() {
            if row.len() != width {
                return Err(ArtifactError::InvalidArgument(format!(
                    "row {idx} has {} cells, expected {width}",
                    row.len()
                )));
            }
            for (column, cell) in columns.iter_mut().zip(row) {
                column.values.push(cell);
            }
        }
        Ok(Self { columns })
    }

    /// Records keyed by column name. Columns appear in first-seen order and
    /// missing cells become `null`.
    pub fn from_records(records: &[Map<String, Value>]) -> Self {
        let mut names: Vec<String> = Vec::new();
        for record in records {
            for key in record.keys() {
                if !names.contains(key) {
                    names.push(key.clone());
                }
            }
        }
        let columns = names
            .into_iter()
            .map(|name| SampleColumn {
                values: records
                    .iter()
                    .map(|r| r.get(&name).cloned().unwrap_or(Value::Null))
                    .collect(),
                name,
            })
            .collect();
        Self { columns }
    }

    pub fn from_series(name: impl Into<String>, values: Vec<Value>) -> Self {
        Self {
            columns: vec![SampleColumn {
                name: name.into(),
                values,
            }],
        }
    }

    pub fn columns(&self) -> &[SampleColumn] {
        &self.columns
    }

    pub fn n_cols(&self) -> usize {
        self.columns.len()
    }

    pub fn n_rows(&self) -> usize {
        self.columns.first().map(|c| c.values.len()).unwrap_or(0)
    }

    /// `(rows, columns)`, rendered the way dataset sizes are recorded in metadata.
    pub fn shape(&self) -> String {
        format!("({}, {})", self.n_rows(), self.n_cols())
    }

    /// Render as CSV with a header line and a leading row index column.
    pub fn to_csv(&self) -> String {
        let mut out = String::new();
        let header: Vec<String> = std::iter::once(String::new())
            .chain(self.columns.iter().map(|c| csv_field(&c.name)))
            .collect();
        out.push_str(&header.join(","));
        out.push('\n');
        for row in 0..self.n_rows() {
            let cells: Vec<String> = std::iter::once(row.to_string())
                .chain(self.columns.iter().map(|c| csv_cell(&c.values[row])))
                .collect();
            out.push_str(&cells.join(","));
            out.push('\n');
        }
        out
    }
}

fn csv_cell(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => csv_field(s),
        Value::Bool(b) => if *b { "True" } else { "False" }.to_string(),
        Value::Number(n) => n.to_string(),
        other => csv_field(&other.to_string()),
    }
}

fn csv_field(text: &str) -> String {
    if text.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", text.replace('"', "\"\""))
    } else {
        text.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn rows_without_header_are_named_by_position() {
        let sample =
            TabularSample::from_rows(None, vec![vec![json!(1), json!(2)], vec![json!(3), json!(4)]])
                .unwrap();
        assert_eq!(sample.n_cols(), 2);
        assert_eq!(sample.n_rows(), 2);
        assert_eq!(sample.columns()[1].name, "1");
        assert_eq!(sample.columns()[1].values, vec![json!(2), json!(4)]);
        assert_eq!(sample.shape(), "(2, 2)");
    }

    #[test]
    fn ragged_rows_are_rejected() {
        let err = TabularSample::from_rows(None, vec![vec![json!(1), json!(2)], vec![json!(3)]])
            .unwrap_err();
        assert!(matches!(err, ArtifactError::InvalidArgument(_)));
    }

    #[test]
    fn records_fill_missing_cells_with_null() {
        let records = vec![
            json!({"a": 1}).as_object().unwrap().clone(),
            json!({"a": 2, "b": "x"}).as_object().unwrap().clone(),
        ];
        let sample = TabularSample::from_records(&records);
        assert_eq!(sample.n_cols(), 2);
        assert_eq!(sample.columns()[1].values, vec![Value::Null, json!("x")]);
    }

    #[test]
    fn csv_quotes_fields_that_need_it() {
        let sample = TabularSample::from_rows(
            Some(vec!["name".into(), "ok".into()]),
            vec![vec![json!("a,b"), json!(true)], vec![json!("say \"hi\""), Value::Null]],
        )
        .unwrap();
        assert_eq!(
            sample.to_csv(),
            ",name,ok\n0,\"a,b\",True\n1,\"say \"\"hi\"\"\",\n"
        );
    }
}
