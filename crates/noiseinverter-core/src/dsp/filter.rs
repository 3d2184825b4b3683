//! Second-order IIR filter stage
//!
//! Runs a transposed direct-form II difference equation one sample at a time.
//! Coefficients are derived from a [`FilterParams`] and are never set
//! directly. Every parameter change recomputes the coefficients and zeroes
//! the filter state, so a change always produces a short transient.

use serde::{Deserialize, Serialize};
use std::f32::consts::PI;
use std::fmt;

/// Filter family selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterFamily {
    /// Fixed resonant bandpass; cutoffs are ignored numerically
    #[default]
    Bandpass,
    /// One-pole lowpass at `high_freq`
    Lowpass,
    /// One-pole highpass at `low_freq`
    Highpass,
}

impl FilterFamily {
    /// Menu code for this family (0 = bandpass, 1 = lowpass, 2 = highpass)
    pub fn code(self) -> i32 {
        match self {
            FilterFamily::Bandpass => 0,
            FilterFamily::Lowpass => 1,
            FilterFamily::Highpass => 2,
        }
    }

    /// Family for a menu code, `None` for anything else
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(FilterFamily::Bandpass),
            1 => Some(FilterFamily::Lowpass),
            2 => Some(FilterFamily::Highpass),
            _ => None,
        }
    }
}

impl fmt::Display for FilterFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FilterFamily::Bandpass => "bandpass",
            FilterFamily::Lowpass => "lowpass",
            FilterFamily::Highpass => "highpass",
        };
        f.write_str(name)
    }
}

/// User-facing filter parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FilterParams {
    /// Lower cutoff in Hz (drives the highpass family)
    pub low_freq: f32,
    /// Upper cutoff in Hz (drives the lowpass family)
    pub high_freq: f32,
    /// Filter family
    pub family: FilterFamily,
}

impl Default for FilterParams {
    fn default() -> Self {
        Self {
            low_freq: 50.0,
            high_freq: 4000.0,
            family: FilterFamily::Bandpass,
        }
    }
}

/// Feed-forward (`b`) and feed-back (`a`) coefficients
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FilterCoefficients {
    /// Numerator `b0..b2`
    pub b: [f32; 3],
    /// Denominator `a0..a2` (`a0` is always 1)
    pub a: [f32; 3],
}

impl FilterCoefficients {
    /// Derive coefficients for `params` at `sample_rate`
    ///
    /// No validation is performed: zero sample rates or negative cutoffs
    /// simply produce whatever the formulas yield.
    pub fn design(params: &FilterParams, sample_rate: u32) -> Self {
        let sr = sample_rate as f32;
        let omega_low = 2.0 * PI * params.low_freq / sr;
        let omega_high = 2.0 * PI * params.high_freq / sr;

        match params.family {
            FilterFamily::Bandpass => Self {
                b: [0.25, 0.0, -0.25],
                a: [1.0, -1.5, 0.5],
            },
            FilterFamily::Lowpass => {
                let alpha = (-omega_high).exp();
                Self {
                    b: [1.0 - alpha, 0.0, 0.0],
                    a: [1.0, -alpha, 0.0],
                }
            }
            FilterFamily::Highpass => {
                let alpha = (-omega_low).exp();
                let half = (1.0 + alpha) / 2.0;
                Self {
                    b: [half, -half, 0.0],
                    a: [1.0, -alpha, 0.0],
                }
            }
        }
    }
}

/// Stateful second-order IIR filter
///
/// # Example
/// ```
/// use noiseinverter_core::dsp::filter::{FilterParams, FilterStage};
///
/// let mut filter = FilterStage::new(FilterParams::default(), 96000);
/// let y = filter.apply(1.0);
/// assert_eq!(y, 0.25);
/// ```
#[derive(Debug, Clone)]
pub struct FilterStage {
    sample_rate: u32,
    params: FilterParams,
    coeffs: FilterCoefficients,
    state: [f32; 2],
}

impl FilterStage {
    /// Create a filter stage with coefficients for `params`
    pub fn new(params: FilterParams, sample_rate: u32) -> Self {
        Self {
            sample_rate,
            params,
            coeffs: FilterCoefficients::design(&params, sample_rate),
            state: [0.0; 2],
        }
    }

    /// Recompute coefficients and zero the filter state
    pub fn set_params(&mut self, params: FilterParams) {
        self.params = params;
        self.coeffs = FilterCoefficients::design(&params, self.sample_rate);
        self.state = [0.0; 2];
    }

    /// Run one step of the difference equation
    #[inline]
    pub fn apply(&mut self, x: f32) -> f32 {
        let FilterCoefficients { b, a } = self.coeffs;
        let y = b[0] * x + self.state[0];
        self.state[0] = b[1] * x - a[1] * y + self.state[1];
        self.state[1] = b[2] * x - a[2] * y;
        y
    }

    /// Current parameters
    pub fn params(&self) -> FilterParams {
        self.params
    }

    /// Current coefficients
    pub fn coefficients(&self) -> FilterCoefficients {
        self.coeffs
    }

    /// Current state registers `[z0, z1]`
    pub fn state(&self) -> [f32; 2] {
        self.state
    }
}
