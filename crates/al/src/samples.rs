//! Loading of initial sample tables from delimited text files.
//!
//! Rows are observations, columns are numeric fields split on commas or
//! whitespace. A leading header row and `#` comment lines are skipped.
//! The conventional layout is inputs first and the observed output as the
//! last column, split with [`split_inputs_outputs`].

use crate::errors::{AlError, Result};
use ndarray::{Array2, s};
use std::fs;
use std::path::Path;

/// Parse a delimited numeric table into an (n, c) array.
pub fn load_table(path: impl AsRef<Path>) -> Result<Array2<f64>> {
    let path = path.as_ref();
    let content = fs::read_to_string(path)?;
    let mut rows: Vec<Vec<f64>> = Vec::new();
    for (lineno, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let fields = line
            .split(|c: char| c == ',' || c.is_whitespace())
            .filter(|s| !s.is_empty());
        let mut row = Vec::new();
        let mut numeric = true;
        for field in fields {
            match field.parse::<f64>() {
                Ok(v) => row.push(v),
                Err(_) => {
                    numeric = false;
                    break;
                }
            }
        }
        if !numeric {
            // a non-numeric line before any data row is a header
            if rows.is_empty() {
                continue;
            }
            return Err(AlError::SamplesError(format!(
                "{}:{}: non-numeric field in data row",
                path.display(),
                lineno + 1
            )));
        }
        if let Some(first) = rows.first() {
            if row.len() != first.len() {
                return Err(AlError::SamplesError(format!(
                    "{}:{}: expected {} fields, got {}",
                    path.display(),
                    lineno + 1,
                    first.len(),
                    row.len()
                )));
            }
        }
        rows.push(row);
    }
    if rows.is_empty() {
        return Err(AlError::SamplesError(format!(
            "{}: no data rows",
            path.display()
        )));
    }
    let shape = (rows.len(), rows[0].len());
    let flat: Vec<f64> = rows.into_iter().flatten().collect();
    Array2::from_shape_vec(shape, flat).map_err(|err| AlError::SamplesError(err.to_string()))
}

/// Split a table into its input columns and the trailing output column,
/// shaped (n, c-1) and (n, 1).
pub fn split_inputs_outputs(table: &Array2<f64>) -> Result<(Array2<f64>, Array2<f64>)> {
    if table.ncols() < 2 {
        return Err(AlError::SamplesError(format!(
            "need at least one input and one output column, got {}",
            table.ncols()
        )));
    }
    let d = table.ncols() - 1;
    Ok((
        table.slice(s![.., ..d]).to_owned(),
        table.slice(s![.., d..]).to_owned(),
    ))
}
