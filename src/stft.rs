//! Short-time Fourier transform with weighted overlap-add resynthesis.
//!
//! [`StftPlan`] owns the transform configuration (frame size, hop size,
//! zero padding, centering and analysis window) and operates on whole
//! in-memory buffers: [`forward`](StftPlan::forward) turns a sample slice
//! into a time × frequency [`Array2`] of complex bins, and
//! [`inverse`](StftPlan::inverse) reconstructs samples from such a matrix.
//!
//! The forward transform is `1/N`-normalized, so the inverse absorbs no
//! additional scaling. Reconstruction applies the window a second time and
//! overlap-adds with gain `hop / Σ window²`; for a window satisfying the
//! constant-overlap-add property at the chosen hop (Hann at 4× overlap),
//! interior samples are recovered exactly.

use ndarray::Array2;
use num_complex::Complex32;
use realfft::{ComplexToReal, RealFftPlanner, RealToComplex};
use std::sync::Arc;

use crate::{DspError, Result};

/// Closed set of supported analysis windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowFunction {
    /// All-ones window.
    Rect,
    /// Periodic Hann window.
    Hann,
}

impl WindowFunction {
    /// Resolve a window by configuration name, case-insensitive.
    ///
    /// `rect`, `none` and `false` select the all-ones window; `hann` and
    /// `true` select the periodic Hann window.
    pub fn from_name(name: &str) -> Result<Self> {
        match name.to_ascii_lowercase().as_str() {
            "rect" | "none" | "false" => Ok(WindowFunction::Rect),
            "hann" | "true" => Ok(WindowFunction::Hann),
            other => Err(DspError::InvalidConfig(format!(
                "unknown window function '{other}'"
            ))),
        }
    }

    /// Window coefficients for a frame of `size` samples.
    ///
    /// The Hann curve is evaluated over `size + 1` points and the last
    /// sample dropped, keeping the window periodic for overlap-add.
    fn coefficients(self, size: usize) -> Vec<f32> {
        match self {
            WindowFunction::Rect => vec![1.0; size],
            WindowFunction::Hann => {
                let pi = std::f64::consts::PI;
                (0..size)
                    .map(|i| (0.5 * (1.0 - (2.0 * pi * i as f64 / size as f64).cos())) as f32)
                    .collect()
            }
        }
    }
}

/// Immutable short-time Fourier transform plan.
pub struct StftPlan {
    frame_size: usize,
    hop_size: usize,
    pad_size: usize,
    center: bool,
    window: Vec<f32>,
    fft_forward: Arc<dyn RealToComplex<f32>>,
    fft_inverse: Arc<dyn ComplexToReal<f32>>,
}

impl StftPlan {
    /// Create a plan with a Hann window, hop `frame_size / 4`, no padding
    /// and no centering.
    pub fn new(frame_size: usize) -> Result<Self> {
        Self::with_params(frame_size, frame_size / 4, 0, false, WindowFunction::Hann)
    }

    /// Create a plan with explicit parameters.
    ///
    /// `pad_size` zeros are appended to each windowed frame before the
    /// transform; `center` circularly shifts each padded frame so that the
    /// effective zero-time point sits in the frame interior.
    pub fn with_params(
        frame_size: usize,
        hop_size: usize,
        pad_size: usize,
        center: bool,
        window: WindowFunction,
    ) -> Result<Self> {
        if frame_size == 0 {
            return Err(DspError::InvalidConfig(
                "frame size must be positive".to_string(),
            ));
        }
        if hop_size == 0 {
            return Err(DspError::InvalidConfig(
                "hop size must be positive".to_string(),
            ));
        }

        let fft_size = frame_size + pad_size;
        let mut planner = RealFftPlanner::<f32>::new();
        let fft_forward = planner.plan_fft_forward(fft_size);
        let fft_inverse = planner.plan_fft_inverse(fft_size);

        log::debug!(
            "STFT plan: frame_size={frame_size} hop_size={hop_size} pad_size={pad_size} center={center}"
        );

        Ok(Self {
            frame_size,
            hop_size,
            pad_size,
            center,
            window: window.coefficients(frame_size),
            fft_forward,
            fft_inverse,
        })
    }

    /// Frame length in samples.
    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    /// Distance between consecutive frames in samples.
    pub fn hop_size(&self) -> usize {
        self.hop_size
    }

    /// Number of zeros appended to each windowed frame.
    pub fn pad_size(&self) -> usize {
        self.pad_size
    }

    /// Whether frames are circularly shifted to center the zero-time point.
    pub fn center(&self) -> bool {
        self.center
    }

    /// Analysis window coefficients (length [`frame_size`](Self::frame_size)).
    pub fn window(&self) -> &[f32] {
        &self.window
    }

    /// Number of frequency bins per frame: `(frame_size + pad_size)/2 + 1`.
    pub fn num_bins(&self) -> usize {
        (self.frame_size + self.pad_size) / 2 + 1
    }

    /// Center frequency of each bin, in Hz for the given rate or in
    /// cycles/sample if no rate is supplied.
    pub fn freqs(&self, sample_rate: Option<f32>) -> Vec<f32> {
        let fft_size = (self.frame_size + self.pad_size) as f32;
        let rate = sample_rate.unwrap_or(1.0);
        (0..self.num_bins())
            .map(|bin| bin as f32 * rate / fft_size)
            .collect()
    }

    /// Forward transform: overlapping frames of the sample slice to a
    /// time × frequency matrix of `1/N`-normalized complex bins.
    ///
    /// Trailing samples that do not fill a complete frame are dropped.
    pub fn forward(&self, samples: &[f32]) -> Result<Array2<Complex32>> {
        let bins = self.num_bins();
        let frames = if samples.len() < self.frame_size {
            0
        } else {
            (samples.len() - self.frame_size) / self.hop_size + 1
        };

        let rows: Vec<Vec<Complex32>> = {
            #[cfg(feature = "parallel")]
            {
                use rayon::prelude::*;
                (0..frames)
                    .into_par_iter()
                    .map(|t| self.forward_frame(&samples[t * self.hop_size..][..self.frame_size]))
                    .collect()
            }
            #[cfg(not(feature = "parallel"))]
            {
                (0..frames)
                    .map(|t| self.forward_frame(&samples[t * self.hop_size..][..self.frame_size]))
                    .collect()
            }
        };

        let flat: Vec<Complex32> = rows.into_iter().flatten().collect();
        Ok(Array2::from_shape_vec((frames, bins), flat)?)
    }

    /// Inverse transform: a time × frequency matrix back to samples via
    /// weighted overlap-add.
    ///
    /// The output has length `frames * hop_size + frame_size`; trimming to
    /// the original signal length is the caller's responsibility.
    pub fn inverse(&self, spectra: &Array2<Complex32>) -> Result<Vec<f32>> {
        let (frames, bins) = spectra.dim();
        if bins != self.num_bins() {
            return Err(DspError::InvalidInput(format!(
                "expected {} frequency bins per frame, got {bins}",
                self.num_bins()
            )));
        }

        let window_energy: f32 = self.window.iter().map(|w| w * w).sum();
        let gain = self.hop_size as f32 / window_energy;
        let mut samples = vec![0.0f32; frames * self.hop_size + self.frame_size];

        let mut spectrum = self.fft_inverse.make_input_vec();
        let mut frame = self.fft_inverse.make_output_vec();
        let mut scratch = self.fft_inverse.make_scratch_vec();

        for (t, row) in spectra.rows().into_iter().enumerate() {
            for (value, &bin) in spectrum.iter_mut().zip(row.iter()) {
                *value = bin;
            }
            // DC and Nyquist bins of a real spectrum carry no imaginary part
            spectrum[0].im = 0.0;
            if (self.frame_size + self.pad_size) % 2 == 0 {
                spectrum[bins - 1].im = 0.0;
            }

            self.fft_inverse
                .process_with_scratch(&mut spectrum, &mut frame, &mut scratch)
                .expect("inverse FFT failed");

            if self.center {
                frame.rotate_right(self.frame_size / 2);
            }

            let offset = t * self.hop_size;
            for (i, (&sample, &w)) in frame.iter().zip(&self.window).enumerate() {
                samples[offset + i] += sample * w * gain;
            }
        }

        Ok(samples)
    }

    fn forward_frame(&self, frame: &[f32]) -> Vec<Complex32> {
        let fft_size = self.frame_size + self.pad_size;
        let mut buf = vec![0.0f32; fft_size];
        for ((value, &sample), &w) in buf.iter_mut().zip(frame).zip(&self.window) {
            *value = sample * w;
        }
        if self.center {
            buf.rotate_left(self.frame_size / 2);
        }

        let mut spectrum = self.fft_forward.make_output_vec();
        let mut scratch = self.fft_forward.make_scratch_vec();
        self.fft_forward
            .process_with_scratch(&mut buf, &mut spectrum, &mut scratch)
            .expect("forward FFT failed");

        let scale = 1.0 / fft_size as f32;
        for value in spectrum.iter_mut() {
            *value *= scale;
        }
        spectrum
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::PI;

    fn sine(freq: f32, sample_rate: f32, len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| (2.0 * PI * freq * i as f32 / sample_rate).sin())
            .collect()
    }

    #[test]
    fn window_names_resolve_case_insensitively() {
        for name in ["rect", "none", "false", "RECT", "None"] {
            assert_eq!(WindowFunction::from_name(name).unwrap(), WindowFunction::Rect);
        }
        for name in ["hann", "true", "Hann", "TRUE"] {
            assert_eq!(WindowFunction::from_name(name).unwrap(), WindowFunction::Hann);
        }
    }

    #[test]
    fn unknown_window_name_is_rejected() {
        assert!(matches!(
            WindowFunction::from_name("blackman"),
            Err(DspError::InvalidConfig(_))
        ));
    }

    #[test]
    fn hann_window_is_periodic() {
        let n = 960;
        let w = WindowFunction::Hann.coefficients(n);
        assert_eq!(w.len(), n);
        assert!(w[0].abs() < 1e-7);
        assert!((w[n / 2] - 1.0).abs() < 1e-6);
        // Periodic Hann: w[i] == w[n - i] for interior samples
        for i in 1..n / 2 {
            assert!((w[i] - w[n - i]).abs() < 1e-6);
        }
    }

    #[test]
    fn invalid_sizes_are_rejected() {
        assert!(matches!(
            StftPlan::with_params(0, 240, 0, false, WindowFunction::Hann),
            Err(DspError::InvalidConfig(_))
        ));
        assert!(matches!(
            StftPlan::with_params(960, 0, 0, false, WindowFunction::Hann),
            Err(DspError::InvalidConfig(_))
        ));
        // Default hop of frame_size / 4 collapses to zero for tiny frames
        assert!(StftPlan::new(2).is_err());
    }

    #[test]
    fn forward_drops_incomplete_trailing_frame() {
        let plan = StftPlan::with_params(960, 240, 0, false, WindowFunction::Hann).unwrap();
        let spectra = plan.forward(&vec![0.0; 960 + 239]).unwrap();
        assert_eq!(spectra.dim(), (1, 481));

        let spectra = plan.forward(&vec![0.0; 960 + 240]).unwrap();
        assert_eq!(spectra.dim(), (2, 481));

        // Fewer samples than one frame yields an empty matrix
        let spectra = plan.forward(&vec![0.0; 959]).unwrap();
        assert_eq!(spectra.dim(), (0, 481));
    }

    #[test]
    fn zero_samples_transform_to_zero_spectra_and_back() {
        let plan = StftPlan::with_params(960, 240, 0, false, WindowFunction::Hann).unwrap();
        let spectra = plan.forward(&vec![0.0; 2400]).unwrap();
        assert!(spectra.iter().all(|c| c.re == 0.0 && c.im == 0.0));

        let samples = plan.inverse(&spectra).unwrap();
        assert!(samples.iter().all(|&x| x == 0.0));
    }

    #[test]
    fn dc_frame_concentrates_in_bin_zero() {
        let plan = StftPlan::with_params(960, 960, 0, false, WindowFunction::Rect).unwrap();
        let spectra = plan.forward(&vec![1.0; 960]).unwrap();
        assert_eq!(spectra.dim(), (1, 481));
        assert!((spectra[(0, 0)].re - 1.0).abs() < 1e-6);
        assert!(spectra[(0, 0)].im.abs() < 1e-6);
        for bin in 1..481 {
            assert!(spectra[(0, bin)].norm() < 1e-5, "leakage in bin {bin}");
        }
    }

    #[test]
    fn round_trip_recovers_sine_in_interior() {
        let plan = StftPlan::with_params(960, 240, 0, false, WindowFunction::Hann).unwrap();
        let input = sine(440.0, 48000.0, 3840);

        let spectra = plan.forward(&input).unwrap();
        let output = plan.inverse(&spectra).unwrap();
        assert_eq!(output.len(), spectra.nrows() * 240 + 960);

        let mut max_err = 0.0f32;
        for i in 960..input.len() - 960 {
            max_err = max_err.max((output[i] - input[i]).abs());
        }
        assert!(max_err < 1e-3, "round trip error too large: {max_err}");
    }

    #[test]
    fn round_trip_with_padding_and_centering() {
        let plan = StftPlan::with_params(960, 240, 64, true, WindowFunction::Hann).unwrap();
        let input = sine(1000.0, 48000.0, 3840);

        let spectra = plan.forward(&input).unwrap();
        assert_eq!(spectra.ncols(), (960 + 64) / 2 + 1);

        let output = plan.inverse(&spectra).unwrap();
        let mut max_err = 0.0f32;
        for i in 960..input.len() - 960 {
            max_err = max_err.max((output[i] - input[i]).abs());
        }
        assert!(max_err < 1e-3, "round trip error too large: {max_err}");
    }

    #[test]
    fn inverse_rejects_wrong_bin_count() {
        let plan = StftPlan::with_params(960, 240, 0, false, WindowFunction::Hann).unwrap();
        let spectra = Array2::<Complex32>::zeros((4, 480));
        assert!(matches!(
            plan.inverse(&spectra),
            Err(DspError::InvalidInput(_))
        ));
    }

    #[test]
    fn freqs_in_hz_and_cycles_per_sample() {
        let plan = StftPlan::with_params(960, 240, 0, false, WindowFunction::Hann).unwrap();

        let cycles = plan.freqs(None);
        assert_eq!(cycles.len(), 481);
        assert_eq!(cycles[0], 0.0);
        assert!((cycles[480] - 0.5).abs() < 1e-7);

        let hertz = plan.freqs(Some(48000.0));
        assert!((hertz[1] - 50.0).abs() < 1e-3);
        assert!((hertz[480] - 24000.0).abs() < 1e-2);
    }

    #[test]
    fn freqs_account_for_padding() {
        let plan = StftPlan::with_params(960, 240, 64, false, WindowFunction::Hann).unwrap();
        let hertz = plan.freqs(Some(48000.0));
        assert_eq!(hertz.len(), 513);
        assert!((hertz[1] - 48000.0 / 1024.0).abs() < 1e-3);
    }
}
