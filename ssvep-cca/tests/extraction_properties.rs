//! End-to-end properties of the extractor
//!
//! These tests drive the public API the way a BCI pipeline does: configure,
//! hand over a signal pool, extract, vote.

use ndarray::{Array3, Axis, s};
use ssvep_cca::{
    CcaConfig, CcaError, CcaExtractor, ChannelSelectionSet, FatalHook, ProcessingDevice, QrMethod,
    SyntheticSsvep, vote,
};
use std::sync::{Arc, Mutex};

const TARGETS: [f64; 3] = [9.25, 11.25, 13.25];

fn scenario_config() -> CcaConfig {
    CcaConfig {
        harmonics_count: 3,
        target_frequencies: TARGETS.to_vec(),
        sampling_frequency: 256.0,
        samples_count: Some(512),
        ..Default::default()
    }
}

fn generator() -> SyntheticSsvep {
    SyntheticSsvep {
        electrodes_count: 8,
        samples_count: 512,
        sampling_frequency: 256.0,
        noise_amplitude: 1.0,
        harmonic_gain: 0.4,
        seed: 11,
    }
}

fn recordings(attended: &[f64]) -> Array3<f64> {
    generator().trials(attended)
}

#[derive(Default)]
struct Recorder(Mutex<Vec<String>>);

impl FatalHook for Recorder {
    fn on_fatal(&self, error: &CcaError) {
        self.0.lock().unwrap().push(error.to_string());
    }
}

/// Attending 11.25 Hz gives the largest correlation at 11.25 Hz
#[test]
fn test_attended_frequency_has_highest_correlation() {
    let mut extractor = CcaExtractor::setup(scenario_config()).unwrap();
    extractor
        .prepare_voting(
            recordings(&[11.25]),
            ChannelSelectionSet::all_electrodes(8, 1).unwrap(),
        )
        .unwrap();

    let features = extractor.extract_features().unwrap();
    assert_eq!(features.features().dim(), (1, 1, 3, 1));

    let per_target = features.features().slice_move(s![0, 0, .., 0]).to_vec();
    assert!(
        per_target[1] > per_target[0] && per_target[1] > per_target[2],
        "11.25 Hz should win: {:?}",
        per_target
    );
}

/// Same as above with a pure 11.25 Hz sinusoid plus noise, no second harmonic
#[test]
fn test_pure_sinusoid_picks_its_frequency() {
    let signals = SyntheticSsvep {
        harmonic_gain: 0.0,
        ..generator()
    }
    .trials(&[11.25]);

    let mut extractor = CcaExtractor::setup(scenario_config()).unwrap();
    extractor
        .prepare_voting(signals, ChannelSelectionSet::all_electrodes(8, 1).unwrap())
        .unwrap();

    let features = extractor.extract_features().unwrap();
    let per_target = features.features().slice_move(s![0, 0, .., 0]).to_vec();
    assert!(
        per_target[1] > per_target[0] && per_target[1] > per_target[2],
        "11.25 Hz should win: {:?}",
        per_target
    );
}

#[test]
fn test_gpu_with_worker_threads_rejected_at_setup() {
    let config = CcaConfig {
        device: ProcessingDevice::Gpu,
        explicit_multithreading: 4,
        ..scenario_config()
    };
    assert!(matches!(
        CcaExtractor::setup(config),
        Err(CcaError::ConfigError(_))
    ));
}

#[test]
fn test_single_sample_rejected_at_setup() {
    let config = CcaConfig {
        samples_count: Some(1),
        ..scenario_config()
    };
    assert!(matches!(
        CcaExtractor::setup(config),
        Err(CcaError::InsufficientSamples { min: 2, actual: 1 })
    ));
}

#[test]
fn test_repeated_extraction_is_deterministic() {
    let config = CcaConfig {
        voters_count: 6,
        random_seed: 99,
        max_correlation_only: false,
        ..scenario_config()
    };
    let run = || {
        let mut extractor = CcaExtractor::setup(config.clone()).unwrap();
        extractor
            .prepare_voting_random(recordings(&[9.25, 13.25, 11.25]))
            .unwrap();
        let selections = extractor.selections().unwrap().clone();
        (selections, extractor.extract_features().unwrap())
    };

    let (selections_a, a) = run();
    let (selections_b, b) = run();
    assert_eq!(selections_a, selections_b);
    for (x, y) in a.features().iter().zip(b.features().iter()) {
        assert!((x - y).abs() < 1e-12);
    }
}

#[test]
fn test_features_lie_in_unit_interval() {
    let config = CcaConfig {
        voters_count: 5,
        max_correlation_only: false,
        ..scenario_config()
    };
    let mut extractor = CcaExtractor::setup(config).unwrap();
    extractor
        .prepare_voting_random(recordings(&[9.25, 11.25]))
        .unwrap();
    let features = extractor.extract_features().unwrap();
    assert!(features.features().iter().all(|v| (0.0..=1.0).contains(v)));
}

/// Max-only features equal the first of the full, descending features; the
/// full features are zero past each voter's own coefficient count
#[test]
fn test_reduction_and_padding_consistency() {
    let selections = vec![vec![0, 3], vec![1, 2, 5], vec![0, 1, 2, 3, 4, 5, 6, 7]];
    let signals = recordings(&[11.25, 13.25]);

    let extract = |max_only: bool| {
        let mut extractor = CcaExtractor::setup(CcaConfig {
            max_correlation_only: max_only,
            ..scenario_config()
        })
        .unwrap();
        extractor
            .prepare_voting(
                signals.clone(),
                ChannelSelectionSet::new(selections.clone(), 8).unwrap(),
            )
            .unwrap();
        extractor.extract_features().unwrap()
    };

    let full = extract(false);
    let max = extract(true);
    // min(8 electrodes, 2·3 harmonics)
    assert_eq!(full.features_count(), 6);
    assert_eq!(max.features_count(), 1);

    for signal in 0..2 {
        for (voter, selection) in selections.iter().enumerate() {
            let k = selection.len().min(6);
            for target in 0..3 {
                let row = full.features().slice_move(s![signal, voter, target, ..]);
                assert!((row[0] - max.features()[[signal, voter, target, 0]]).abs() < 1e-12);
                assert!(row.slice(s![k..]).iter().all(|&v| v == 0.0));
                assert!(row.slice(s![..k]).iter().all(|&v| v > 0.0));
            }
        }
    }
}

#[test]
fn test_worker_pool_matches_vectorized_batches() {
    let base = CcaConfig {
        voters_count: 7,
        random_seed: 5,
        max_batch_size: 4,
        max_correlation_only: false,
        ..scenario_config()
    };
    let signals = recordings(&[9.25, 11.25, 13.25, 11.25]);

    let mut vectorized = CcaExtractor::setup(base.clone()).unwrap();
    vectorized.prepare_voting_random(signals.clone()).unwrap();
    let mut pooled = CcaExtractor::setup(CcaConfig {
        explicit_multithreading: 2,
        ..base
    })
    .unwrap();
    pooled.prepare_voting_random(signals).unwrap();

    let a = vectorized.extract_features().unwrap();
    let b = pooled.extract_features().unwrap();
    assert_eq!(a.features().dim(), b.features().dim());
    for (x, y) in a.features().iter().zip(b.features().iter()) {
        assert!((x - y).abs() < 1e-5, "{} vs {}", x, y);
    }
}

#[test]
fn test_gram_schmidt_matches_householder() {
    let extract = |qr_method: QrMethod| {
        let mut extractor = CcaExtractor::setup(CcaConfig {
            qr_method,
            voters_count: 3,
            max_correlation_only: false,
            ..scenario_config()
        })
        .unwrap();
        extractor
            .prepare_voting_random(recordings(&[9.25, 13.25]))
            .unwrap();
        extractor.extract_features().unwrap()
    };

    let a = extract(QrMethod::Householder);
    let b = extract(QrMethod::GramSchmidt);
    for (x, y) in a.features().iter().zip(b.features().iter()) {
        assert!((x - y).abs() < 1e-8);
    }
}

#[test]
fn test_rank_deficient_pool_rejected_before_extraction() {
    let mut signals = recordings(&[9.25, 11.25, 13.25]);
    // Electrode 4 of trial 2 copies electrode 1
    let copy = signals.slice(s![2, 1, ..]).to_owned();
    signals.slice_mut(s![2, 4, ..]).assign(&copy);

    let hook = Arc::new(Recorder::default());
    let mut extractor = CcaExtractor::setup_with_hook(scenario_config(), hook.clone()).unwrap();
    let result = extractor.prepare_voting(
        signals,
        ChannelSelectionSet::all_electrodes(8, 2).unwrap(),
    );

    assert!(matches!(
        result,
        Err(CcaError::RankDeficiency {
            trial: 2,
            rank: 7,
            expected: 8
        })
    ));
    assert_eq!(hook.0.lock().unwrap().len(), 1);
    assert!(extractor.signal_pool().is_none());
    assert!(extractor.extract_features().is_err());
}

#[test]
fn test_signal_pool_is_centered() {
    let mut extractor = CcaExtractor::setup(scenario_config()).unwrap();
    extractor
        .prepare_voting_random(recordings(&[9.25, 11.25]))
        .unwrap();
    let pool = extractor.signal_pool().unwrap();
    for channel in pool.signals().lanes(Axis(2)) {
        assert!(channel.sum().abs() < 1e-9);
    }
}

#[test]
fn test_voting_recovers_attended_targets() {
    let attended = [11.25, 9.25, 13.25, 13.25, 9.25, 11.25];
    let labels = [1, 0, 2, 2, 0, 1];

    let mut extractor = CcaExtractor::setup(CcaConfig {
        voters_count: 9,
        random_seed: 2024,
        ..scenario_config()
    })
    .unwrap();
    extractor.prepare_voting_random(recordings(&attended)).unwrap();
    let result = vote(&extractor.extract_features().unwrap());

    assert_eq!(result.predictions, labels.to_vec());
    assert_eq!(result.accuracy(&labels), 1.0);
    assert!(result.votes.rows().into_iter().all(|r| r.sum() == 9));
}

#[test]
fn test_json_configuration_drives_extraction() {
    let config = CcaConfig::from_json_str(
        r#"{
            "harmonics_count": 3,
            "target_frequencies": [9.25, 11.25, 13.25],
            "sampling_frequency": 256,
            "samples_count": 0,
            "max_correlation_only": true,
            "voters_count": 3,
            "use_gpu": false,
            "explicit_multithreading": -1
        }"#,
    )
    .unwrap();
    assert_eq!(config.samples_count, None);

    let mut extractor = CcaExtractor::setup(config).unwrap();
    assert!(extractor.template().is_none());
    extractor
        .prepare_voting_random(recordings(&[13.25]))
        .unwrap();
    assert_eq!(extractor.template().unwrap().samples_count(), 512);
    assert_eq!(vote(&extractor.extract_features().unwrap()).predictions, vec![2]);
}
