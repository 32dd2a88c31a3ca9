//! Complex-domain compression of the deep-filtering sub-band.
//!
//! [`ComplexCompressor`] truncates a complex spectrum to its leading
//! low-frequency bins and scales each bin by the square root of a running
//! magnitude mean, pulling magnitudes toward unit variance while leaving
//! phase untouched. The result is the phase-aware model input that
//! complements the magnitude-only ERB feature.

use ndarray::{s, Array2};
use num_complex::Complex32;

use crate::{DspError, Result};

/// Running-normalized complex feature over the leading spectrum bins.
pub struct ComplexCompressor {
    cpx_size: usize,
    alpha: f32,
}

impl ComplexCompressor {
    /// Create a compressor over the leading `cpx_size` frequency bins with
    /// smoothing factor `alpha` in `(0, 1)`.
    pub fn new(cpx_size: usize, alpha: f32) -> Result<Self> {
        if cpx_size == 0 {
            return Err(DspError::InvalidConfig(
                "compressor size must be positive".to_string(),
            ));
        }
        if alpha <= 0.0 || alpha >= 1.0 {
            return Err(DspError::InvalidConfig(format!(
                "smoothing factor must lie in (0, 1), got {alpha}"
            )));
        }
        Ok(Self { cpx_size, alpha })
    }

    /// Number of leading frequency bins kept.
    pub fn cpx_size(&self) -> usize {
        self.cpx_size
    }

    /// Single-pole smoothing factor.
    pub fn alpha(&self) -> f32 {
        self.alpha
    }

    /// Compress the leading sub-band of a complex spectrum.
    ///
    /// The per-bin running magnitude mean is seeded from the first time
    /// step and advanced by single-pole smoothing; each complex value is
    /// divided by the square root of the updated mean. Output shape is the
    /// input truncated to `cpx_size` bins in the frequency axis.
    ///
    /// # Panics
    ///
    /// Panics if the spectrum has fewer than `cpx_size` frequency bins.
    pub fn apply(&self, spectra: &Array2<Complex32>) -> Array2<Complex32> {
        assert!(
            spectra.ncols() >= self.cpx_size,
            "spectrum has {} bins, compressor needs {}",
            spectra.ncols(),
            self.cpx_size
        );

        let mut compressed = spectra.slice(s![.., ..self.cpx_size]).to_owned();
        if compressed.nrows() == 0 {
            return compressed;
        }

        // Sequential along time, independent across bins
        let mut mean: Vec<f32> = compressed.row(0).iter().map(|c| c.norm()).collect();
        for mut row in compressed.rows_mut() {
            for (value, m) in row.iter_mut().zip(mean.iter_mut()) {
                *m = value.norm() * (1.0 - self.alpha) + *m * self.alpha;
                *value /= m.sqrt();
            }
        }

        compressed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_spectra(frames: usize, bins: usize) -> Array2<Complex32> {
        Array2::from_shape_fn((frames, bins), |(t, f)| {
            Complex32::new(
                0.3 + 0.1 * ((t * 3 + f) % 5) as f32,
                0.2 - 0.05 * ((t + f * 2) % 7) as f32,
            )
        })
    }

    #[test]
    fn invalid_parameters_are_rejected() {
        assert!(matches!(
            ComplexCompressor::new(0, 0.99),
            Err(DspError::InvalidConfig(_))
        ));
        assert!(matches!(
            ComplexCompressor::new(96, 0.0),
            Err(DspError::InvalidConfig(_))
        ));
        assert!(matches!(
            ComplexCompressor::new(96, 1.0),
            Err(DspError::InvalidConfig(_))
        ));
    }

    #[test]
    fn output_is_truncated_to_cpx_size() {
        let cpx = ComplexCompressor::new(96, 0.99).unwrap();
        let spectra = test_spectra(7, 481);
        assert_eq!(cpx.apply(&spectra).dim(), (7, 96));
    }

    #[test]
    #[should_panic(expected = "compressor needs")]
    fn too_few_bins_panics() {
        let cpx = ComplexCompressor::new(96, 0.99).unwrap();
        cpx.apply(&test_spectra(4, 64));
    }

    #[test]
    fn phase_is_preserved() {
        let cpx = ComplexCompressor::new(96, 0.99).unwrap();
        let spectra = test_spectra(12, 128);
        let compressed = cpx.apply(&spectra);

        for t in 0..12 {
            for f in 0..96 {
                let before = spectra[(t, f)].arg();
                let after = compressed[(t, f)].arg();
                assert!(
                    (before - after).abs() < 1e-6,
                    "t={t} f={f}: {before} vs {after}"
                );
            }
        }
    }

    #[test]
    fn first_step_magnitude_is_square_root_of_input() {
        let cpx = ComplexCompressor::new(96, 0.99).unwrap();
        let spectra = test_spectra(5, 96);
        let compressed = cpx.apply(&spectra);

        for f in 0..96 {
            let expected = spectra[(0, f)].norm().sqrt();
            let got = compressed[(0, f)].norm();
            assert!((got - expected).abs() < 1e-5, "bin {f}: {got} vs {expected}");
        }
    }

    #[test]
    fn constant_magnitude_compresses_to_its_square_root() {
        let cpx = ComplexCompressor::new(32, 0.9).unwrap();
        let spectra = Array2::from_shape_fn((20, 32), |(t, f)| {
            // Magnitude 4 everywhere, phase varying with position
            Complex32::from_polar(4.0, 0.1 * (t as f32 + f as f32))
        });

        let compressed = cpx.apply(&spectra);
        for value in compressed.iter() {
            assert!((value.norm() - 2.0).abs() < 1e-4);
        }
    }

    #[test]
    fn empty_input_yields_empty_output() {
        let cpx = ComplexCompressor::new(96, 0.99).unwrap();
        let spectra = Array2::<Complex32>::zeros((0, 481));
        assert_eq!(cpx.apply(&spectra).dim(), (0, 96));
    }
}
