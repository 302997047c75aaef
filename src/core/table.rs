//! Tabular query results

use crate::core::{ColumnType, Value};
use crate::error::{HybridError, Result};
use arrow::array::{
    ArrayRef, BooleanBuilder, Float64Builder, Int64Builder, StringBuilder,
    TimestampMillisecondBuilder,
};
use arrow::datatypes::{DataType, Field, Schema, TimeUnit};
use arrow::record_batch::RecordBatch;
use std::fmt;
use std::sync::Arc;

/// A named, typed result column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub name: String,
    pub column_type: ColumnType,
}

/// Ordered, typed columns plus rows of optional cells.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ResultTable {
    columns: Vec<Column>,
    rows: Vec<Vec<Option<Value>>>,
}

impl ResultTable {
    pub fn new(columns: Vec<Column>, rows: Vec<Vec<Option<Value>>>) -> Self {
        Self { columns, rows }
    }

    /// Builds a table inferring each column's type from its cells.
    pub fn from_rows(names: Vec<String>, rows: Vec<Vec<Option<Value>>>) -> Self {
        let columns = names
            .into_iter()
            .enumerate()
            .map(|(idx, name)| {
                let column_type = infer_column_type(rows.iter().filter_map(|row| row.get(idx)?.as_ref()));
                Column { name, column_type }
            })
            .collect();
        Self { columns, rows }
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn rows(&self) -> &[Vec<Option<Value>>] {
        &self.rows
    }

    pub fn into_rows(self) -> Vec<Vec<Option<Value>>> {
        self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    /// All cells of one column, top to bottom.
    pub fn column_values(&self, name: &str) -> Option<Vec<Option<&Value>>> {
        let idx = self.column_index(name)?;
        Some(self.rows.iter().map(|row| row.get(idx).and_then(Option::as_ref)).collect())
    }

    /// Converts the table into a single Arrow record batch.
    pub fn to_record_batch(&self) -> Result<RecordBatch> {
        let mut fields = Vec::with_capacity(self.columns.len());
        let mut arrays: Vec<ArrayRef> = Vec::with_capacity(self.columns.len());
        for (idx, column) in self.columns.iter().enumerate() {
            let cells = self.rows.iter().map(|row| row.get(idx).and_then(Option::as_ref));
            let (data_type, array) = build_array(column.column_type, cells)?;
            fields.push(Field::new(column.name.as_str(), data_type, true));
            arrays.push(array);
        }
        let schema = Arc::new(Schema::new(fields));
        Ok(RecordBatch::try_new(schema, arrays)?)
    }
}

/// Column type of a column holding `values`.
///
/// Integers mixed with doubles give doubles; any other mix, or no value at
/// all, gives strings.
pub fn infer_column_type<'a>(values: impl Iterator<Item = &'a Value>) -> ColumnType {
    let mut inferred: Option<ColumnType> = None;
    for value in values {
        let next = value.column_type();
        inferred = Some(match inferred {
            None => next,
            Some(current) if current == next => current,
            Some(ColumnType::Integer | ColumnType::Double)
                if matches!(next, ColumnType::Integer | ColumnType::Double) =>
            {
                ColumnType::Double
            }
            Some(_) => return ColumnType::String,
        });
    }
    inferred.unwrap_or(ColumnType::String)
}

fn build_array<'a>(
    column_type: ColumnType,
    cells: impl Iterator<Item = Option<&'a Value>>,
) -> Result<(DataType, ArrayRef)> {
    let mismatch =
        |v: &Value| HybridError::TypeMismatch(format!("{:?} in a {:?} column", v, column_type));
    match column_type {
        ColumnType::Iri | ColumnType::String => {
            let mut builder = StringBuilder::new();
            for cell in cells {
                builder.append_option(cell.map(Value::lexical));
            }
            Ok((DataType::Utf8, Arc::new(builder.finish())))
        }
        ColumnType::Integer => {
            let mut builder = Int64Builder::new();
            for cell in cells {
                match cell {
                    Some(Value::Integer(i)) => builder.append_value(*i),
                    Some(other) => return Err(mismatch(other)),
                    None => builder.append_null(),
                }
            }
            Ok((DataType::Int64, Arc::new(builder.finish())))
        }
        ColumnType::Double => {
            let mut builder = Float64Builder::new();
            for cell in cells {
                match cell {
                    Some(v) => builder.append_value(v.as_f64().ok_or_else(|| mismatch(v))?),
                    None => builder.append_null(),
                }
            }
            Ok((DataType::Float64, Arc::new(builder.finish())))
        }
        ColumnType::Boolean => {
            let mut builder = BooleanBuilder::new();
            for cell in cells {
                match cell {
                    Some(Value::Boolean(b)) => builder.append_value(*b),
                    Some(other) => return Err(mismatch(other)),
                    None => builder.append_null(),
                }
            }
            Ok((DataType::Boolean, Arc::new(builder.finish())))
        }
        ColumnType::DateTime => {
            let mut builder = TimestampMillisecondBuilder::new().with_timezone("UTC");
            for cell in cells {
                match cell {
                    Some(Value::DateTime(dt)) => builder.append_value(dt.timestamp_millis()),
                    Some(other) => return Err(mismatch(other)),
                    None => builder.append_null(),
                }
            }
            Ok((
                DataType::Timestamp(TimeUnit::Millisecond, Some("UTC".into())),
                Arc::new(builder.finish()),
            ))
        }
    }
}

impl fmt::Display for ResultTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered: Vec<Vec<String>> = self
            .rows
            .iter()
            .map(|row| {
                row.iter().map(|cell| cell.as_ref().map(Value::lexical).unwrap_or_default()).collect()
            })
            .collect();
        let widths: Vec<usize> = self
            .columns
            .iter()
            .enumerate()
            .map(|(idx, column)| {
                rendered
                    .iter()
                    .filter_map(|row| row.get(idx).map(String::len))
                    .chain(std::iter::once(column.name.len()))
                    .max()
                    .unwrap_or(0)
            })
            .collect();

        let header: Vec<String> = self
            .columns
            .iter()
            .zip(&widths)
            .map(|(column, width)| format!("{:<width$}", column.name, width = width))
            .collect();
        writeln!(f, "{}", header.join(" | "))?;
        let rule: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();
        writeln!(f, "{}", rule.join("-+-"))?;
        for row in &rendered {
            let cells: Vec<String> = row
                .iter()
                .zip(&widths)
                .map(|(cell, width)| format!("{:<width$}", cell, width = width))
                .collect();
            writeln!(f, "{}", cells.join(" | "))?;
        }
        write!(f, "({} rows)", self.rows.len())
    }
}
