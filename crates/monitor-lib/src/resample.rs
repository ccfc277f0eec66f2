//! Signal resampling to a fixed length
//!
//! Vibration chunks arrive at whatever length the sensor gateway produced;
//! the inference path needs every chunk at `sampling_rate` samples.

use crate::error::{MonitorError, Result};
use realfft::{FftError, RealFftPlanner};
use std::sync::Mutex;

/// Deterministic resampling of one channel to a target length
pub trait Resampler: Send + Sync {
    fn resample(&self, data: &[f64], target_len: usize) -> Result<Vec<f64>>;
}

fn validate(data: &[f64], target_len: usize) -> Result<()> {
    if data.is_empty() {
        return Err(MonitorError::ResamplingFailure("empty input".to_string()));
    }
    if target_len == 0 {
        return Err(MonitorError::ResamplingFailure(
            "target length must be positive".to_string(),
        ));
    }
    if data.iter().any(|v| !v.is_finite()) {
        return Err(MonitorError::ResamplingFailure(
            "input contains non-finite values".to_string(),
        ));
    }
    Ok(())
}

/// Fourier-domain resampler
///
/// Treats the input as one period of a band-limited signal: the real
/// spectrum is truncated or zero-padded to the target length and
/// transformed back. When the shared Nyquist bin is even-sized it is
/// doubled on downsampling and halved on upsampling.
///
/// FFT plans are cached per length, so repeated chunks of the same size
/// only pay for planning once.
pub struct FourierResampler {
    planner: Mutex<RealFftPlanner<f64>>,
}

impl Default for FourierResampler {
    fn default() -> Self {
        Self::new()
    }
}

impl FourierResampler {
    pub fn new() -> Self {
        Self {
            planner: Mutex::new(RealFftPlanner::new()),
        }
    }
}

fn fft_error(e: FftError) -> MonitorError {
    MonitorError::ResamplingFailure(format!("fft failed: {}", e))
}

impl Resampler for FourierResampler {
    fn resample(&self, data: &[f64], target_len: usize) -> Result<Vec<f64>> {
        validate(data, target_len)?;

        let nx = data.len();
        if nx == target_len {
            return Ok(data.to_vec());
        }

        let (forward, inverse) = {
            let mut planner = self.planner.lock().unwrap_or_else(|e| e.into_inner());
            (planner.plan_fft_forward(nx), planner.plan_fft_inverse(target_len))
        };

        let mut input = data.to_vec();
        let mut spectrum = forward.make_output_vec();
        forward.process(&mut input, &mut spectrum).map_err(fft_error)?;

        let mut resized = inverse.make_input_vec();
        let n = nx.min(target_len);
        let keep = n / 2 + 1;
        resized[..keep].copy_from_slice(&spectrum[..keep]);

        if n % 2 == 0 {
            resized[n / 2] *= if target_len < nx { 2.0 } else { 0.5 };
        }

        // A real signal has no imaginary DC or Nyquist component
        resized[0].im = 0.0;
        if target_len % 2 == 0 {
            resized[target_len / 2].im = 0.0;
        }

        let mut output = inverse.make_output_vec();
        inverse.process(&mut resized, &mut output).map_err(fft_error)?;

        // The inverse is unnormalized (factor target_len); the amplitude
        // scale is target_len / nx
        let scale = 1.0 / nx as f64;
        Ok(output.into_iter().map(|v| v * scale).collect())
    }
}

/// Linear-interpolation resampler over the same index span
#[derive(Debug, Clone, Copy, Default)]
pub struct LinearResampler;

impl Resampler for LinearResampler {
    fn resample(&self, data: &[f64], target_len: usize) -> Result<Vec<f64>> {
        validate(data, target_len)?;

        if data.len() == target_len {
            return Ok(data.to_vec());
        }
        if data.len() == 1 {
            return Ok(vec![data[0]; target_len]);
        }
        if target_len == 1 {
            return Ok(vec![data[0]]);
        }

        let step = (data.len() - 1) as f64 / (target_len - 1) as f64;
        Ok((0..target_len)
            .map(|i| {
                let pos = i as f64 * step;
                let lo = pos.floor() as usize;
                let hi = (lo + 1).min(data.len() - 1);
                let ratio = pos - lo as f64;
                data[lo] + ratio * (data[hi] - data[lo])
            })
            .collect())
    }
}
