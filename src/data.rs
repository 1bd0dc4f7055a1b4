//! CSV dataset loading and JSON result persistence.
//!
//! Dataset files carry no header; every row is a feature vector followed by
//! its label (logistic) or count (Poisson) in the last column.

use crate::error::CoresetError;
use crate::experiment::{ExperimentResults, RunLabel};
use crate::types::ModelFamily;
use csv::{ReaderBuilder, StringRecord};
use ndarray::{Array2, ArrayView2, Axis, concatenate, s};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

/// Training design plus the optional held-out counterpart.
#[derive(Debug, Clone)]
pub struct Dataset {
    pub z: Array2<f64>,
    pub z_test: Option<Array2<f64>>,
}

fn read_numeric_csv(path: &Path) -> Result<Array2<f64>, CoresetError> {
    let mut rdr = ReaderBuilder::new()
        .has_headers(false)
        .trim(csv::Trim::All)
        .from_path(path)?;

    let mut records = Vec::<StringRecord>::new();
    for rec in rdr.records() {
        records.push(rec?);
    }
    if records.is_empty() {
        return Err(CoresetError::Data(format!(
            "'{}' has no rows",
            path.display()
        )));
    }

    let n = records.len();
    let p = records[0].len();
    let mut out = Array2::<f64>::zeros((n, p));
    for (i, rec) in records.iter().enumerate() {
        if rec.len() != p {
            return Err(CoresetError::Data(format!(
                "'{}' row {} has {} fields, expected {p}",
                path.display(),
                i + 1,
                rec.len()
            )));
        }
        for (j, raw) in rec.iter().enumerate() {
            out[[i, j]] = raw.parse::<f64>().map_err(|e| {
                CoresetError::Data(format!(
                    "'{}' row {}, column {}: cannot parse '{raw}' as a number ({e})",
                    path.display(),
                    i + 1,
                    j + 1
                ))
            })?;
        }
    }
    Ok(out)
}

fn join_columns(parts: &[ArrayView2<'_, f64>]) -> Result<Array2<f64>, CoresetError> {
    concatenate(Axis(1), parts)
        .map_err(|e| CoresetError::Data(format!("cannot assemble design matrix: {e}")))
}

/// Arrange raw `[x, y]` rows into the design the model oracle expects.
pub fn design_matrix(raw: &Array2<f64>, family: ModelFamily) -> Result<Array2<f64>, CoresetError> {
    let p = raw.ncols();
    if p < 2 {
        return Err(CoresetError::Data(format!(
            "expected at least one feature and a label column, got {p} columns"
        )));
    }
    let x = raw.slice(s![.., ..p - 1]);
    let y = raw.column(p - 1);
    let ones = Array2::<f64>::ones((raw.nrows(), 1));

    match family {
        ModelFamily::LogisticRegression => {
            let mut z = join_columns(&[x, ones.view()])?;
            for (i, mut row) in z.axis_iter_mut(Axis(0)).enumerate() {
                let label = match y[i] {
                    v if v == 1.0 => 1.0,
                    v if v == 0.0 || v == -1.0 => -1.0,
                    other => {
                        return Err(CoresetError::Data(format!(
                            "row {}: logistic labels must be 0, 1 or -1, got {other}",
                            i + 1
                        )));
                    }
                };
                row *= label;
            }
            Ok(z)
        }
        ModelFamily::PoissonRegression => {
            let counts = y.insert_axis(Axis(1));
            join_columns(&[x, ones.view(), counts])
        }
    }
}

pub fn load_dataset(path: &Path, family: ModelFamily) -> Result<Array2<f64>, CoresetError> {
    let raw = read_numeric_csv(path)?;
    design_matrix(&raw, family)
}

/// `<stem>.csv` plus `<stem>_test.csv` when it exists next to it.
pub fn load_dataset_with_test(path: &Path, family: ModelFamily) -> Result<Dataset, CoresetError> {
    let z = load_dataset(path, family)?;
    let test_path = sibling(path, "_test")?;
    let z_test = if test_path.exists() {
        log::info!("Loading held-out data from {}", test_path.display());
        Some(load_dataset(&test_path, family)?)
    } else {
        None
    };
    Ok(Dataset { z, z_test })
}

/// Posterior samples: one draw per row.
pub fn load_samples(path: &Path) -> Result<Array2<f64>, CoresetError> {
    read_numeric_csv(path)
}

/// `<dir>/<stem><suffix>.csv` for a dataset at `<dir>/<stem>.csv`.
pub fn sibling(path: &Path, suffix: &str) -> Result<PathBuf, CoresetError> {
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .ok_or_else(|| CoresetError::Data(format!("'{}' has no file name", path.display())))?;
    Ok(path.with_file_name(format!("{stem}{suffix}.csv")))
}

pub fn results_file_name(label: &RunLabel, results: &ExperimentResults) -> String {
    format!(
        "{}_{}_{}_results_{}.json",
        label.model.tag(),
        label.dataset,
        results.algorithm.name(),
        label.run_id
    )
}

#[derive(Serialize)]
struct SavedRun<'a> {
    #[serde(flatten)]
    label: &'a RunLabel,
    #[serde(flatten)]
    results: &'a ExperimentResults,
}

/// Write pretty JSON into `dir` and return the file path.
pub fn write_results(
    dir: &Path,
    label: &RunLabel,
    results: &ExperimentResults,
) -> Result<PathBuf, CoresetError> {
    fs::create_dir_all(dir)?;
    let path = dir.join(results_file_name(label, results));
    let json = serde_json::to_string_pretty(&SavedRun { label, results })?;
    fs::write(&path, json)?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gaussian::Gaussian;
    use crate::types::Algorithm;
    use ndarray::array;

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("coresets-data-{name}-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn logistic_rows_are_signed_and_get_an_intercept() {
        let raw = array![[0.5, 2.0, 1.0], [1.0, -1.0, 0.0], [3.0, 0.0, -1.0]];
        let z = design_matrix(&raw, ModelFamily::LogisticRegression).unwrap();
        assert_eq!(
            z,
            array![[0.5, 2.0, 1.0], [-1.0, 1.0, -1.0], [-3.0, -0.0, -1.0]]
        );
    }

    #[test]
    fn poisson_rows_keep_the_count_last() {
        let raw = array![[0.5, 3.0], [1.5, 0.0]];
        let z = design_matrix(&raw, ModelFamily::PoissonRegression).unwrap();
        assert_eq!(z, array![[0.5, 1.0, 3.0], [1.5, 1.0, 0.0]]);
    }

    #[test]
    fn unexpected_logistic_labels_are_rejected() {
        let raw = array![[0.5, 2.0]];
        assert!(matches!(
            design_matrix(&raw, ModelFamily::LogisticRegression),
            Err(CoresetError::Data(_))
        ));
    }

    #[test]
    fn csv_round_trip_with_optional_test_split() {
        let dir = scratch_dir("load");
        let train = dir.join("toy.csv");
        fs::write(&train, "0.5, 1\n-0.25, 0\n1.0, 1\n").unwrap();
        let loaded = load_dataset_with_test(&train, ModelFamily::LogisticRegression).unwrap();
        assert_eq!(loaded.z.dim(), (3, 2));
        assert!(loaded.z_test.is_none());

        fs::write(dir.join("toy_test.csv"), "2.0, 0\n").unwrap();
        let loaded = load_dataset_with_test(&train, ModelFamily::LogisticRegression).unwrap();
        assert_eq!(loaded.z_test.unwrap(), array![[-2.0, -1.0]]);
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn ragged_and_non_numeric_rows_are_reported() {
        let dir = scratch_dir("bad");
        let ragged = dir.join("ragged.csv");
        fs::write(&ragged, "1,2,3\n4,5\n").unwrap();
        assert!(load_samples(&ragged).is_err());
        let text = dir.join("text.csv");
        fs::write(&text, "1,abc\n").unwrap();
        assert!(matches!(load_samples(&text), Err(CoresetError::Data(_))));
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn results_land_under_the_expected_name() {
        let dir = scratch_dir("results");
        let label = RunLabel {
            model: ModelFamily::PoissonRegression,
            dataset: "synth".to_string(),
            run_id: "7".to_string(),
            seed: 7,
        };
        let results = ExperimentResults {
            algorithm: Algorithm::RiemannCorrected,
            posterior: Gaussian::standard(2),
            records: Vec::new(),
        };
        let path = write_results(&dir, &label, &results).unwrap();
        assert_eq!(
            path.file_name().unwrap().to_str().unwrap(),
            "poiss_synth_riemann_corr_results_7.json"
        );
        let saved: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(saved["dataset"], "synth");
        assert_eq!(saved["seed"], 7);
        assert!(saved["records"].as_array().unwrap().is_empty());
        fs::remove_dir_all(&dir).unwrap();
    }
}
