//! Plain-text persistence of log-space hyperparameter vectors.
//!
//! One finite value per line, written with full round-trip precision so
//! that a trained model can be reconstructed exactly in a later session
//! via [`set_theta`](crate::MultiFidelityGp::set_theta).

use crate::errors::{GpError, Result};
use ndarray::Array1;
use std::fs;
use std::path::Path;

/// Write `theta` to `path`, one value per line.
pub fn save_theta(path: impl AsRef<Path>, theta: &Array1<f64>) -> Result<()> {
    let mut out = String::with_capacity(theta.len() * 24);
    for v in theta.iter() {
        // {:e} keeps f64 round-trip precision through parse()
        out.push_str(&format!("{v:e}\n"));
    }
    fs::write(path, out)?;
    Ok(())
}

/// Read a hyperparameter vector written by [`save_theta`].
///
/// Blank lines are skipped; any non-parsable or non-finite entry fails
/// the whole load.
pub fn load_theta(path: impl AsRef<Path>) -> Result<Array1<f64>> {
    let path = path.as_ref();
    let content = fs::read_to_string(path)?;
    let mut values = Vec::new();
    for (lineno, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let v: f64 = line.parse().map_err(|_| {
            GpError::LoadError(format!(
                "{}:{}: not a number: {line:?}",
                path.display(),
                lineno + 1
            ))
        })?;
        if !v.is_finite() {
            return Err(GpError::LoadError(format!(
                "{}:{}: non-finite hyperparameter {v}",
                path.display(),
                lineno + 1
            )));
        }
        values.push(v);
    }
    if values.is_empty() {
        return Err(GpError::LoadError(format!(
            "{}: no hyperparameters found",
            path.display()
        )));
    }
    Ok(Array1::from_vec(values))
}
