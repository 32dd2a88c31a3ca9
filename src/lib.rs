//! # DeepFilter-DSP
//!
//! Spectral analysis/synthesis and perceptual feature extraction for
//! DeepFilterNet-style speech enhancement.
//!
//! This crate is the numeric front end and back end of a neural denoising
//! pipeline. It converts a time-domain waveform into the three
//! representations such a model consumes (the complex short-time spectrum,
//! a perceptually-banded log-magnitude feature and a normalized complex
//! feature over the leading low-frequency bins) and converts the model's
//! output spectrum back into a waveform. The model itself stays outside
//! the crate, reached through the [`SpectralEnhancer`] trait.
//!
//! ## Pipeline
//!
//! ```text
//! waveform → [StftPlan::forward] → spectrum [T, F]
//!     spectrum → [ErbFilterbank::apply] → ERB feature [T, 32]
//!     spectrum → [ComplexCompressor::apply] → DF feature [T, 96]
//! enhanced spectrum → [StftPlan::inverse] → waveform
//! ```
//!
//! ## Quick Start
//!
//! [`Pipeline`] wires the three stages with the standard DeepFilterNet
//! parameters (48 kHz, 960-point FFT, 480-sample hop):
//!
//! ```ignore
//! use deepfilter_dsp::Pipeline;
//!
//! let pipeline = Pipeline::new()?;
//! let enhanced = pipeline.enhance(&noisy_samples, &mut model)?;
//! ```
//!
//! The stage types [`StftPlan`], [`ErbFilterbank`] and
//! [`ComplexCompressor`] are independently usable for custom wiring.
//!
//! ## Parallelism
//!
//! The core is a pure, synchronous pipeline with no shared mutable state
//! across calls. With the `parallel` feature enabled, forward-transform
//! frames are computed on the rayon thread pool; the running-mean
//! normalizations are inherently sequential along the time axis and always
//! run single-threaded per call.
//!
//! ## Logging
//!
//! This crate logs through the `log` facade at debug level (construction
//! diagnostics only). Configure a logger implementation in the
//! application; the crate never does.
//!
//! ## Thread Safety
//!
//! All configuration objects are immutable after construction and `Send`.
//! Calls take `&self`, so one [`Pipeline`] may be shared across threads.

use ndarray::Array2;
use num_complex::Complex32;
use thiserror::Error;

pub mod cpx;
pub mod erb;
pub mod stft;

pub use cpx::ComplexCompressor;
pub use erb::{erb_to_hz, hz_to_erb, ErbFilterbank};
pub use stft::{StftPlan, WindowFunction};

// Standard DeepFilterNet parameter set
pub const SAMPLE_RATE: usize = 48000;
pub const FFT_SIZE: usize = 960;
pub const HOP_SIZE: usize = 480;
pub const FREQ_SIZE: usize = 481;
pub const NB_ERB: usize = 32;
pub const NB_DF: usize = 96;
pub const MIN_NB_ERB_FREQS: usize = 2;
pub const DEFAULT_NORM_ALPHA: f32 = 0.99;

#[derive(Error, Debug)]
pub enum DspError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("invariant violation: {0}")]
    InvariantViolation(String),
    #[error("shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),
}

pub type Result<T> = std::result::Result<T, DspError>;

/// Model inputs extracted from one waveform: the complex spectrum and the
/// two normalized features derived from it.
pub struct Features {
    /// Complex short-time spectrum, time × frequency.
    pub spectra: Array2<Complex32>,
    /// Banded log-magnitude feature, time × band.
    pub erb: Array2<f32>,
    /// Compressed complex feature over the leading bins, time × bin.
    pub cpx: Array2<Complex32>,
}

/// The opaque enhancement model: consumes the extracted features and
/// returns an enhanced spectrum of the same time × frequency shape.
pub trait SpectralEnhancer {
    fn enhance(&mut self, features: &Features) -> Array2<Complex32>;
}

/// Parameters for [`Pipeline`]. The default is the standard DeepFilterNet
/// configuration.
#[derive(Debug, Clone, Copy)]
pub struct PipelineConfig {
    pub sample_rate: usize,
    pub fft_size: usize,
    pub hop_size: usize,
    pub erb_bands: usize,
    pub erb_min_width: usize,
    pub df_bins: usize,
    pub norm_alpha: f32,
    pub window: WindowFunction,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            sample_rate: SAMPLE_RATE,
            fft_size: FFT_SIZE,
            hop_size: HOP_SIZE,
            erb_bands: NB_ERB,
            erb_min_width: MIN_NB_ERB_FREQS,
            df_bins: NB_DF,
            norm_alpha: DEFAULT_NORM_ALPHA,
            window: WindowFunction::Hann,
        }
    }
}

/// Analysis/synthesis pipeline wiring the STFT, the ERB filterbank and the
/// complex compressor around an external enhancement model.
pub struct Pipeline {
    stft: StftPlan,
    erb: ErbFilterbank,
    cpx: ComplexCompressor,
    norm_alpha: f32,
}

impl Pipeline {
    /// Create a pipeline with the standard DeepFilterNet parameters.
    pub fn new() -> Result<Self> {
        Self::with_config(PipelineConfig::default())
    }

    /// Create a pipeline with explicit parameters.
    pub fn with_config(config: PipelineConfig) -> Result<Self> {
        let stft = StftPlan::with_params(
            config.fft_size,
            config.hop_size,
            0,
            false,
            config.window,
        )?;
        if config.df_bins > stft.num_bins() {
            return Err(DspError::InvalidConfig(format!(
                "{} deep-filtering bins exceed the {} spectrum bins",
                config.df_bins,
                stft.num_bins()
            )));
        }
        let erb = ErbFilterbank::new(
            config.sample_rate,
            config.fft_size,
            config.erb_bands,
            config.erb_min_width,
        )?;
        let cpx = ComplexCompressor::new(config.df_bins, config.norm_alpha)?;

        log::debug!(
            "pipeline: sr={} fft={} hop={} erb={} df={}",
            config.sample_rate,
            config.fft_size,
            config.hop_size,
            config.erb_bands,
            config.df_bins
        );

        Ok(Self {
            stft,
            erb,
            cpx,
            norm_alpha: config.norm_alpha,
        })
    }

    /// The transform plan backing this pipeline.
    pub fn stft(&self) -> &StftPlan {
        &self.stft
    }

    /// The filterbank backing this pipeline.
    pub fn erb(&self) -> &ErbFilterbank {
        &self.erb
    }

    /// Extract the model inputs from a waveform.
    pub fn analyze(&self, samples: &[f32]) -> Result<Features> {
        let spectra = self.stft.forward(samples)?;
        let erb = self.erb.apply(&spectra, self.norm_alpha, true);
        let cpx = self.cpx.apply(&spectra);
        Ok(Features { spectra, erb, cpx })
    }

    /// Reconstruct a waveform from a (model output) spectrum.
    pub fn synthesize(&self, spectra: &Array2<Complex32>) -> Result<Vec<f32>> {
        self.stft.inverse(spectra)
    }

    /// Run the full enhancement round trip, trimming the reconstruction to
    /// the input length.
    pub fn enhance<M: SpectralEnhancer>(&self, samples: &[f32], model: &mut M) -> Result<Vec<f32>> {
        let features = self.analyze(samples)?;
        let enhanced = model.enhance(&features);
        let mut output = self.synthesize(&enhanced)?;
        output.truncate(samples.len());
        Ok(output)
    }
}

// Compile-time check that the pipeline can move between threads
fn _assert_send<T: Send>() {}
fn _assert_pipeline_is_send() {
    _assert_send::<Pipeline>();
    _assert_send::<Features>();
}
