use clap::Parser;
use coresets::data::{load_dataset_with_test, load_samples, sibling, write_results};
use coresets::experiment::{ExperimentConfig, ExperimentInputs, RunLabel, run_experiment};
use coresets::model::{LogisticRegression, PoissonRegression};
use coresets::{Algorithm, CoresetError, ModelFamily};
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "coresets")]
#[command(
    about = "Build and score Bayesian coresets for logistic and Poisson regression",
    long_about = None
)]
#[command(arg_required_else_help = true)]
struct Cli {
    /// Model family tag: `lr` or `poiss`.
    model: String,
    /// Dataset name; read from `<data-dir>/<model>/<dataset>.csv`.
    dataset: String,
    /// `hilbert`, `hilbert_corr`, `riemann`, `riemann_corr` or `uniform`.
    algorithm: String,
    /// Run identifier used in the output file name.
    run_id: String,
    #[arg(long = "data-dir", default_value = ".")]
    data_dir: PathBuf,
    #[arg(long = "out-dir", default_value = ".")]
    out_dir: PathBuf,
    /// Defaults to the run id when it is numeric, else 0.
    #[arg(long = "seed")]
    seed: Option<u64>,
    /// JSON file with experiment settings; missing fields take defaults.
    #[arg(long = "config")]
    config: Option<PathBuf>,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    if let Err(e) = run() {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), CoresetError> {
    let cli = Cli::parse();
    let family: ModelFamily = cli.model.parse()?;
    let algorithm: Algorithm = cli.algorithm.parse()?;

    let config = match &cli.config {
        Some(path) => serde_json::from_str::<ExperimentConfig>(&std::fs::read_to_string(path)?)?,
        None => ExperimentConfig::default(),
    };
    config.validate()?;

    let seed = cli.seed.unwrap_or_else(|| cli.run_id.parse().unwrap_or(0));
    let label = RunLabel {
        model: family,
        dataset: cli.dataset.clone(),
        run_id: cli.run_id.clone(),
        seed,
    };

    let dataset_path = cli
        .data_dir
        .join(family.tag())
        .join(format!("{}.csv", cli.dataset));
    log::info!("Loading dataset {}", dataset_path.display());
    let data = load_dataset_with_test(&dataset_path, family)?;
    let samples_path = sibling(&dataset_path, "_samples")?;
    log::info!("Loading posterior samples from {}", samples_path.display());
    let samples = load_samples(&samples_path)?;

    let inputs = ExperimentInputs {
        z: data.z.view(),
        z_test: data.z_test.as_ref().map(|zt| zt.view()),
        posterior_samples: samples.view(),
    };
    let mut rng = StdRng::seed_from_u64(seed);

    let results = match family {
        ModelFamily::LogisticRegression => {
            run_experiment(&LogisticRegression, &inputs, algorithm, &config, &mut rng)?
        }
        ModelFamily::PoissonRegression => {
            run_experiment(&PoissonRegression, &inputs, algorithm, &config, &mut rng)?
        }
    };

    let path = write_results(&cli.out_dir, &label, &results)?;
    log::info!("Saved results to {}", path.display());
    Ok(())
}
