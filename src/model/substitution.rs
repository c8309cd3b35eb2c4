//! # Nucleotide Substitution Models
//!
//! ## Role
//! Supplies the compute core with row-stochastic 4x4 transition matrices keyed
//! by (branch length x category rate) and with stationary frequencies. The
//! compute core treats the matrices as opaque.
//!
//! ## Models
//! - `Jc69`: equal rates and frequencies.
//! - `F84`: unequal frequencies with a transition/transversion ratio `kappa`.
//!   Parameter combinations with negative within-group rate are declined as
//!   impossible modifications.
//!
//! State order is A, C, G, T.

use crate::error::{McmcError, Result};

pub const NUM_STATES: usize = 4;
pub const A: usize = 0;
pub const C: usize = 1;
pub const G: usize = 2;
pub const T: usize = 3;

const FREQUENCY_TOLERANCE: f64 = 1e-6;

/// Precomputed F84 intermediates for one (kappa, frequencies) pair
#[derive(Clone, Debug, PartialEq)]
pub struct F84Params {
    kappa: f64,
    pi: [f64; NUM_STATES],
    pi_r: f64,
    pi_y: f64,
    alpha: f64,
    beta: f64,
}

impl F84Params {
    pub fn new(kappa: f64, frequencies: &[f64]) -> Result<Self> {
        let pi = validate_frequencies(frequencies)?;
        if !kappa.is_finite() || kappa < 0.0 {
            return Err(McmcError::impossible(format!("kappa {} is invalid", kappa)));
        }
        let pi_r = pi[A] + pi[G];
        let pi_y = pi[C] + pi[T];
        let within = pi_r * pi_y * kappa - pi[A] * pi[G] - pi[C] * pi[T];
        if within < 0.0 {
            return Err(McmcError::impossible(format!(
                "kappa {} is incompatible with base frequencies {:?}",
                kappa, pi
            )));
        }
        let beta = 1.0 / (2.0 * pi_r * pi_y * (1.0 + kappa));
        let alpha =
            within / (2.0 * (1.0 + kappa) * (pi_y * pi[A] * pi[G] + pi_r * pi[C] * pi[T]));
        Ok(Self {
            kappa,
            pi,
            pi_r,
            pi_y,
            alpha,
            beta,
        })
    }

    pub fn kappa(&self) -> f64 {
        self.kappa
    }

    pub fn frequencies(&self) -> &[f64; NUM_STATES] {
        &self.pi
    }

    fn fill(&self, t: f64, out: &mut [f64]) {
        let eb = (-self.beta * t).exp();
        let ea = (-self.alpha * t).exp();
        let er0 = ea * eb;
        let er1 = eb * (1.0 - ea);
        let er2 = 1.0 - eb;

        for i in 0..NUM_STATES {
            let row = &mut out[i * NUM_STATES..(i + 1) * NUM_STATES];
            let i_purine = is_purine(i);
            for (j, p) in row.iter_mut().enumerate() {
                let mut v = er2 * self.pi[j];
                if is_purine(j) == i_purine {
                    let group = if i_purine { self.pi_r } else { self.pi_y };
                    v += er1 * self.pi[j] / group;
                }
                if i == j {
                    v += er0;
                }
                *p = v;
            }
        }
    }
}

#[inline]
fn is_purine(state: usize) -> bool {
    state == A || state == G
}

fn validate_frequencies(frequencies: &[f64]) -> Result<[f64; NUM_STATES]> {
    if frequencies.len() != NUM_STATES {
        return Err(McmcError::invalid_parameter(format!(
            "expected {} base frequencies, got {}",
            NUM_STATES,
            frequencies.len()
        )));
    }
    if frequencies.iter().any(|f| !f.is_finite() || *f <= 0.0) {
        return Err(McmcError::impossible("base frequencies must be positive"));
    }
    let total: f64 = frequencies.iter().sum();
    if (total - 1.0).abs() > FREQUENCY_TOLERANCE {
        return Err(McmcError::impossible(format!(
            "base frequencies sum to {}",
            total
        )));
    }
    let mut pi = [0.0; NUM_STATES];
    pi.copy_from_slice(frequencies);
    Ok(pi)
}

/// Transition probability generator handed to the compute core
#[derive(Clone, Debug, PartialEq)]
pub enum TransitionModel {
    Jc69,
    F84(F84Params),
}

impl TransitionModel {
    pub fn f84(kappa: f64, frequencies: &[f64]) -> Result<Self> {
        Ok(TransitionModel::F84(F84Params::new(kappa, frequencies)?))
    }

    #[inline]
    pub fn state_count(&self) -> usize {
        NUM_STATES
    }

    pub fn stationaries(&self) -> &[f64] {
        const UNIFORM: [f64; NUM_STATES] = [0.25; NUM_STATES];
        match self {
            TransitionModel::Jc69 => &UNIFORM,
            TransitionModel::F84(p) => &p.pi,
        }
    }

    /// Write the row-major transition matrix for time `t` into `out`
    pub fn fill_matrix(&self, t: f64, out: &mut [f64]) {
        debug_assert_eq!(out.len(), NUM_STATES * NUM_STATES);
        match self {
            TransitionModel::Jc69 => {
                let ex = (-4.0 * t).exp();
                let same = 0.25 + 0.75 * ex;
                let diff = 0.25 - 0.25 * ex;
                for i in 0..NUM_STATES {
                    for j in 0..NUM_STATES {
                        out[i * NUM_STATES + j] = if i == j { same } else { diff };
                    }
                }
            }
            TransitionModel::F84(p) => p.fill(t, out),
        }
    }
}
