//! Canonical correlation analysis (CCA) feature extraction for SSVEP
//! brain-computer interfaces
//!
//! Each target of an SSVEP speller flickers at its own frequency. This crate
//! correlates multichannel EEG trials with sine/cosine references at every
//! target frequency and its harmonics, producing a
//! `[signals, voters, targets, features]` tensor. Voters are electrode subsets
//! whose features can be combined by [`vote`].
//!
//! # Quick Start
//!
//! ```no_run
//! use ssvep_cca::{CcaConfig, CcaExtractor, SyntheticSsvep, vote};
//!
//! let config = CcaConfig {
//!     harmonics_count: 3,
//!     target_frequencies: vec![9.25, 11.25, 13.25],
//!     sampling_frequency: 256.0,
//!     samples_count: Some(512),
//!     voters_count: 8,
//!     ..Default::default()
//! };
//!
//! let signals = SyntheticSsvep::default().trials(&[11.25, 9.25]);
//!
//! let mut extractor = CcaExtractor::setup(config)?;
//! extractor.prepare_voting_random(signals)?;
//! let features = extractor.extract_features()?;
//!
//! let result = vote(&features);
//! println!("Predicted targets: {:?}", result.predictions);
//! # Ok::<(), ssvep_cca::CcaError>(())
//! ```
//!
//! # Processing modes
//!
//! - **Vectorized** (default): batches of (signal, voter) pairs are correlated
//!   against every target with a single matrix product.
//! - **Worker pool**: `explicit_multithreading = n` runs one (signal, voter)
//!   pair per task on a dedicated pool of `n` threads.
//! - **GPU** (`--features gpu`): the batched matrix product runs on a wgpu
//!   device. Cannot be combined with the worker pool.

pub mod batch;
pub mod config;
pub mod debundle;
pub mod device;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod extractor;
pub mod linalg;
pub mod pool;
pub mod synthetic;
pub mod template;
pub mod voters;
pub mod voting;

#[cfg(feature = "gpu")]
pub mod gpu;

pub use batch::{BatchDescriptor, assemble_batch, schedule_batches};
pub use config::{CcaConfig, ProcessingDevice, QrMethod};
pub use debundle::debundle;
pub use device::{DeviceId, ReplicaRegistry, TemplateReplica, TemplateReplicas};
pub use dispatch::{Concurrency, DispatchPlan};
pub use engine::CorrelationEngine;
pub use error::{CcaError, FatalHook, LogFatal, Result};
pub use extractor::{CcaExtractor, FeatureTensor};
pub use pool::SignalPool;
pub use synthetic::SyntheticSsvep;
pub use template::{ReferenceTemplate, harmonic_reference};
pub use voters::ChannelSelectionSet;
pub use voting::{VoteResult, vote};
