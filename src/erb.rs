//! Perceptual ERB-scale filterbank and its normalized log-magnitude feature.
//!
//! [`ErbFilterbank`] partitions the DFT bins of a spectrum into
//! non-uniform bands whose widths follow the ERB frequency scale
//! (Glasberg and Moore), built once at construction. Its
//! [`apply`](ErbFilterbank::apply) call reduces a complex spectrum to a
//! per-band log-magnitude feature with running mean removal, the
//! magnitude-domain model input of the enhancement pipeline.

use ndarray::Array2;
use num_complex::Complex32;

use crate::{DspError, Result};

/// Convert a frequency in Hz to ERB-scale units (Glasberg and Moore).
pub fn hz_to_erb(hz: f64) -> f64 {
    9.265 * (1.0 + hz / (24.7 * 9.265)).ln()
}

/// Convert ERB-scale units back to a frequency in Hz (Glasberg and Moore).
pub fn erb_to_hz(erb: f64) -> f64 {
    24.7 * 9.265 * ((erb / 9.265).exp() - 1.0)
}

/// Non-uniform perceptual filterbank over the bins of a real spectrum.
pub struct ErbFilterbank {
    widths: Vec<usize>,
    weights: Array2<f32>,
}

impl ErbFilterbank {
    /// Build the filterbank for spectra of `fft_size / 2 + 1` bins.
    ///
    /// The ERB span up to Nyquist is divided evenly into `band_count`
    /// increments; each band owns the contiguous bin range between
    /// successive boundaries, at least `min_width` bins wide.
    pub fn new(
        sample_rate: usize,
        fft_size: usize,
        band_count: usize,
        min_width: usize,
    ) -> Result<Self> {
        let widths = band_widths(sample_rate, fft_size, band_count, min_width)?;
        let weights = band_weights(&widths);
        log::debug!(
            "ERB filterbank: {band_count} bands over {} bins",
            weights.nrows()
        );
        Ok(Self { widths, weights })
    }

    /// Per-band bin counts; sums to the spectrum bin count.
    pub fn widths(&self) -> &[usize] {
        &self.widths
    }

    /// Bin × band weight matrix; each column averages one band's bins.
    pub fn weights(&self) -> &Array2<f32> {
        &self.weights
    }

    /// Number of bands.
    pub fn num_bands(&self) -> usize {
        self.widths.len()
    }

    /// Banded log-magnitude feature with running mean removal.
    ///
    /// Magnitudes are averaged into bands through the weight matrix. With
    /// `db` set, band values are converted to decibels, a per-band running
    /// mean (seeded from the first time step, advanced by single-pole
    /// smoothing with factor `alpha`) is subtracted in place, and the
    /// result is divided by 40 to bound the dynamic range. With `db` unset
    /// the raw banded magnitudes are returned.
    ///
    /// # Panics
    ///
    /// Panics if the spectrum's bin count does not match the filterbank.
    pub fn apply(&self, spectra: &Array2<Complex32>, alpha: f32, db: bool) -> Array2<f32> {
        assert_eq!(
            spectra.ncols(),
            self.weights.nrows(),
            "spectrum bin count does not match filterbank"
        );

        let magnitudes = spectra.mapv(Complex32::norm);
        let mut banded = magnitudes.dot(&self.weights);
        if !db || banded.nrows() == 0 {
            return banded;
        }

        banded.mapv_inplace(|x| 20.0 * (x + f32::EPSILON).log10());

        // Sequential along time, independent across bands: the mean is
        // seeded from the first step and updated before each subtraction
        let mut mean = banded.row(0).to_owned();
        for mut row in banded.rows_mut() {
            for (value, m) in row.iter_mut().zip(mean.iter_mut()) {
                *m = *value * (1.0 - alpha) + *m * alpha;
                *value -= *m;
                *value /= 40.0;
            }
        }

        banded
    }
}

fn band_widths(
    sample_rate: usize,
    fft_size: usize,
    band_count: usize,
    min_width: usize,
) -> Result<Vec<usize>> {
    if fft_size == 0 {
        return Err(DspError::InvalidConfig(
            "FFT size must be positive".to_string(),
        ));
    }
    if band_count == 0 {
        return Err(DspError::InvalidConfig(
            "band count must be positive".to_string(),
        ));
    }

    let dft_bins = fft_size / 2 + 1;
    let bin_width = sample_rate as f64 / fft_size as f64;
    let nyquist = sample_rate as f64 / 2.0;

    let erb_min = hz_to_erb(0.0);
    let erb_max = hz_to_erb(nyquist);
    let erb_inc = (erb_max - erb_min) / band_count as f64;

    let mut widths = vec![0i64; band_count];
    let mut prev = 0i64;
    let mut deficit = 0i64;

    for (band, width) in widths.iter_mut().enumerate() {
        let boundary = erb_to_hz(erb_min + erb_inc * (band + 1) as f64);
        let next = (boundary / bin_width).round() as i64;

        // Carry forward the amount by which the previous band fell short
        // of the minimum width before clamping this one
        let raw = next - prev - deficit;
        prev = next;

        deficit = (min_width as i64 - raw).max(0);
        *width = raw.max(min_width as i64);
    }

    // The rounded Nyquist boundary lands one bin short of the DFT size
    widths[band_count - 1] += 1;

    let total: i64 = widths.iter().sum();
    if total != dft_bins as i64 {
        return Err(DspError::InvariantViolation(format!(
            "ERB band widths sum to {total}, expected {dft_bins} frequency bins"
        )));
    }

    Ok(widths.into_iter().map(|w| w as usize).collect())
}

fn band_weights(widths: &[usize]) -> Array2<f32> {
    let dft_bins: usize = widths.iter().sum();
    let mut weights = Array2::<f32>::zeros((dft_bins, widths.len()));

    let mut offset = 0;
    for (band, &width) in widths.iter().enumerate() {
        // Column-normalized so banding averages rather than sums
        let gain = 1.0 / width as f32;
        for bin in offset..offset + width {
            weights[(bin, band)] = gain;
        }
        offset += width;
    }

    weights
}
