use anyhow::{Context, Result};
use clap::Parser;
use ssvep_cca::{
    CcaConfig, CcaExtractor, ProcessingDevice, QrMethod, SyntheticSsvep, VoteResult, vote,
};
use std::path::PathBuf;
use std::time::Instant;
use tracing::{debug, info};

/// Sample count of synthetic trials when the configuration leaves it open
const DEFAULT_SYNTHETIC_SAMPLES: usize = 512;

/// SSVEP CCA - canonical correlation features for SSVEP spellers
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(name = "ssvep-cca")]
#[command(about = "Extract CCA features from synthetic SSVEP recordings and classify them", long_about = None)]
struct Cli {
    /// JSON configuration file; options given on the command line override it
    #[arg(long, value_name = "CONFIG_JSON")]
    config: Option<PathBuf>,

    /// Target stimulation frequencies in Hz (comma-separated, e.g., "9.25,11.25,13.25")
    #[arg(short, long, value_delimiter = ',')]
    frequencies: Option<Vec<f64>>,

    /// Harmonics per target in the reference template (default: 3)
    #[arg(long)]
    harmonics: Option<usize>,

    /// Sampling rate in Hz (default: 256)
    #[arg(long)]
    sampling_frequency: Option<f64>,

    /// Samples per trial; learned from the recordings if not specified
    #[arg(long)]
    samples: Option<usize>,

    /// Keep every canonical correlation instead of only the largest
    #[arg(long)]
    all_correlations: bool,

    /// Number of voters (random electrode subsets, default: 1)
    #[arg(long)]
    voters: Option<usize>,

    /// Seed for electrode subset selection
    #[arg(long)]
    seed: Option<u64>,

    /// Run the batched cross-products on the GPU
    #[arg(long)]
    gpu: bool,

    /// Maximum (signal, voter) pairs per batch (default: 16)
    #[arg(long)]
    batch_size: Option<usize>,

    /// Worker threads for explicit multithreading (0 = vectorized batches)
    #[arg(short, long)]
    threads: Option<usize>,

    /// Orthogonalization routine
    #[arg(long, value_enum)]
    qr_method: Option<QrMethodArg>,

    /// Synthetic trials per target
    #[arg(long, default_value = "10")]
    trials_per_target: usize,

    /// Electrodes in the synthetic recordings
    #[arg(short, long, default_value = "8")]
    electrodes: usize,

    /// Half-width of the uniform noise added to synthetic recordings
    #[arg(long, default_value = "1.0")]
    noise: f64,

    /// Second harmonic amplitude of synthetic recordings, relative to the fundamental
    #[arg(long, default_value = "0.4")]
    harmonic_gain: f64,

    /// Seed for synthetic recordings
    #[arg(long, default_value = "0")]
    data_seed: u64,

    /// Save a JSON report of the run
    #[arg(long, value_name = "REPORT_PATH")]
    report: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum QrMethodArg {
    /// LAPACK Householder QR
    Householder,
    /// Modified Gram-Schmidt
    GramSchmidt,
}

impl From<QrMethodArg> for QrMethod {
    fn from(method: QrMethodArg) -> Self {
        match method {
            QrMethodArg::Householder => QrMethod::Householder,
            QrMethodArg::GramSchmidt => QrMethod::GramSchmidt,
        }
    }
}

/// Start from the JSON file (or defaults) and apply command-line overrides
fn build_config(args: &Cli) -> Result<CcaConfig> {
    let mut config = match &args.config {
        Some(path) => {
            let json = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read configuration {}", path.display()))?;
            CcaConfig::from_json_str(&json)
                .with_context(|| format!("Invalid configuration in {}", path.display()))?
        }
        None => CcaConfig {
            target_frequencies: vec![9.25, 11.25, 13.25],
            ..Default::default()
        },
    };

    if let Some(frequencies) = &args.frequencies {
        config.target_frequencies = frequencies.clone();
    }
    if let Some(harmonics) = args.harmonics {
        config.harmonics_count = harmonics;
    }
    if let Some(fs) = args.sampling_frequency {
        config.sampling_frequency = fs;
    }
    if args.samples.is_some() {
        config.samples_count = args.samples;
    }
    if args.all_correlations {
        config.max_correlation_only = false;
    }
    if let Some(voters) = args.voters {
        config.voters_count = voters;
    }
    if let Some(seed) = args.seed {
        config.random_seed = seed;
    }
    if args.gpu {
        config.device = ProcessingDevice::Gpu;
    }
    if let Some(batch_size) = args.batch_size {
        config.max_batch_size = batch_size;
    }
    if let Some(threads) = args.threads {
        config.explicit_multithreading = threads;
    }
    if let Some(method) = args.qr_method {
        config.qr_method = method.into();
    }

    config.validate()?;
    Ok(config)
}

fn print_summary(result: &VoteResult, labels: &[usize], frequencies: &[f64], verbose: bool) {
    if verbose {
        for (trial, (&predicted, &label)) in result.predictions.iter().zip(labels).enumerate() {
            let votes = result.votes.row(trial);
            println!(
                "  Trial {:3}: attended {:6.2} Hz, predicted {:6.2} Hz {} votes {:?}",
                trial,
                frequencies[label],
                frequencies[predicted],
                if predicted == label { "✓" } else { "✗" },
                votes.to_vec()
            );
        }
        println!();
    }

    for (target, frequency) in frequencies.iter().enumerate() {
        let trials = labels.iter().filter(|&&l| l == target).count();
        let hits = result
            .predictions
            .iter()
            .zip(labels)
            .filter(|(p, l)| **l == target && *p == *l)
            .count();
        println!("  {:6.2} Hz: {}/{} correct", frequency, hits, trials);
    }
}

fn main() -> Result<()> {
    // Initialize tracing subscriber with environment filter
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let args = Cli::parse();

    println!("🧠 SSVEP CCA - Feature Extraction");
    println!("=================================\n");

    let config = build_config(&args)?;
    let frequencies = config.target_frequencies.clone();

    let labels: Vec<usize> = (0..frequencies.len())
        .flat_map(|target| std::iter::repeat_n(target, args.trials_per_target))
        .collect();
    let attended: Vec<f64> = labels.iter().map(|&l| frequencies[l]).collect();

    let generator = SyntheticSsvep {
        electrodes_count: args.electrodes,
        samples_count: config.samples_count.unwrap_or(DEFAULT_SYNTHETIC_SAMPLES),
        sampling_frequency: config.sampling_frequency,
        noise_amplitude: args.noise,
        harmonic_gain: args.harmonic_gain,
        seed: args.data_seed,
    };
    let signals = generator.trials(&attended);
    debug!("Synthesized recordings: {:?}", signals.dim());

    println!(
        "📊 {} trials, {} electrodes, {} samples at {} Hz",
        attended.len(),
        generator.electrodes_count,
        generator.samples_count,
        config.sampling_frequency
    );
    println!(
        "🎯 Targets: {:?} Hz, {} harmonics, {} voters\n",
        frequencies, config.harmonics_count, config.voters_count
    );

    let start_time = Instant::now();
    let mut extractor = CcaExtractor::setup(config.clone())?;
    extractor.prepare_voting_random(signals)?;
    let setup_time = start_time.elapsed();

    let extract_start = Instant::now();
    let features = extractor.extract_features()?;
    let extract_time = extract_start.elapsed();

    let result = vote(&features);
    let accuracy = result.accuracy(&labels);
    info!("Accuracy {:.1}%", accuracy * 100.0);

    print_summary(&result, &labels, &frequencies, args.verbose);

    println!("\n✅ Accuracy: {:.1}%", accuracy * 100.0);
    println!(
        "⏱️  Setup: {:.2} ms, extraction: {:.2} ms ({} on {})",
        setup_time.as_secs_f64() * 1000.0,
        extract_time.as_secs_f64() * 1000.0,
        match extractor.plan().concurrency() {
            ssvep_cca::Concurrency::Vectorized => "vectorized".to_string(),
            ssvep_cca::Concurrency::WorkerPool { threads } => format!("{} threads", threads),
        },
        extractor.plan().backend_kind()
    );

    if let Some(ref report_path) = args.report {
        let report = serde_json::json!({
            "config": config,
            "features_shape": features.features().shape(),
            "labels": labels,
            "result": result,
            "accuracy": accuracy,
            "setup_time_ms": setup_time.as_millis(),
            "extraction_time_ms": extract_time.as_millis(),
        });
        std::fs::write(report_path, serde_json::to_string_pretty(&report)?)?;
        println!("💾 Report saved to {}", report_path.display());
    }

    Ok(())
}
