use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{HmmError, Result};
use super::lattice;

/// Tolerance used when checking that an imported row sums to 1.
pub const DISTRIBUTION_TOLERANCE: f64 = 1e-6;

/// Parameters of a discrete-output hidden Markov model.
///
/// Matrices are dense and row-major: state `i` owns
/// `transitions[i * n_states..(i + 1) * n_states]` and
/// `emissions[i * n_symbols..(i + 1) * n_symbols]`.
///
/// ## Invariants
/// - `n_states >= 1` and `n_symbols >= 1`
/// - Every transition row, emission row and the initial distribution
///   (when present) is non-negative and sums to 1
/// - `initial == None` means state 0 is the fixed start state
///
/// Parameters are only mutated by the trainer through [`Hmm::replace`];
/// everything else reads them.
#[derive(Clone, Debug, PartialEq)]
pub struct Hmm {
	n_states: usize,
	n_symbols: usize,
	transitions: Vec<f64>,
	emissions: Vec<f64>,
	initial: Option<Vec<f64>>,
}

/// Flat record of a model, used to persist and restore it.
///
/// Floating-point values are carried as-is, so export followed by import
/// yields a bit-identical model.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct HmmSnapshot {
	pub n_states: usize,
	pub n_symbols: usize,
	pub transitions: Vec<f64>,
	pub emissions: Vec<f64>,
	pub initial: Option<Vec<f64>>,
}

impl Hmm {
	/// Creates a model with random, normalised parameters and an explicit
	/// initial distribution.
	///
	/// # Errors
	/// Returns `InvalidDimension` if either dimension is zero.
	pub fn random<R: Rng + ?Sized>(n_states: usize, n_symbols: usize, rng: &mut R) -> Result<Self> {
		check_dimensions(n_states, n_symbols)?;
		let initial = random_rows(1, n_states, rng);
		let mut hmm = Self::random_fixed_start(n_states, n_symbols, rng)?;
		hmm.initial = Some(initial);
		Ok(hmm)
	}

	/// Creates a model with random, normalised parameters that always starts
	/// in state 0.
	///
	/// # Errors
	/// Returns `InvalidDimension` if either dimension is zero.
	pub fn random_fixed_start<R: Rng + ?Sized>(n_states: usize, n_symbols: usize, rng: &mut R) -> Result<Self> {
		check_dimensions(n_states, n_symbols)?;
		Ok(Self {
			n_states,
			n_symbols,
			transitions: random_rows(n_states, n_states, rng),
			emissions: random_rows(n_states, n_symbols, rng),
			initial: None,
		})
	}

	/// Creates a model where every row is uniform.
	///
	/// # Errors
	/// Returns `InvalidDimension` if either dimension is zero.
	pub fn uniform(n_states: usize, n_symbols: usize, with_initial: bool) -> Result<Self> {
		check_dimensions(n_states, n_symbols)?;
		Ok(Self {
			n_states,
			n_symbols,
			transitions: vec![1.0 / n_states as f64; n_states * n_states],
			emissions: vec![1.0 / n_symbols as f64; n_states * n_symbols],
			initial: with_initial.then(|| vec![1.0 / n_states as f64; n_states]),
		})
	}

	/// Creates a model from explicit parameters.
	///
	/// # Errors
	/// - `InvalidDimension` if either dimension is zero
	/// - `DimensionMismatch` if a vector has the wrong length
	/// - `InvalidDistribution` if a row is negative, non-finite or does not
	///   sum to 1 within [`DISTRIBUTION_TOLERANCE`]
	pub fn from_parts(
		n_states: usize,
		n_symbols: usize,
		transitions: Vec<f64>,
		emissions: Vec<f64>,
		initial: Option<Vec<f64>>,
	) -> Result<Self> {
		check_dimensions(n_states, n_symbols)?;
		check_rows("transition", &transitions, n_states, n_states)?;
		check_rows("emission", &emissions, n_states, n_symbols)?;
		if let Some(initial) = &initial {
			check_rows("initial", initial, 1, n_states)?;
		}
		Ok(Self { n_states, n_symbols, transitions, emissions, initial })
	}

	/// Restores a model from a snapshot, revalidating every invariant.
	pub fn from_snapshot(snapshot: HmmSnapshot) -> Result<Self> {
		Self::from_parts(
			snapshot.n_states,
			snapshot.n_symbols,
			snapshot.transitions,
			snapshot.emissions,
			snapshot.initial,
		)
	}

	/// Exports the parameters as a flat record.
	pub fn snapshot(&self) -> HmmSnapshot {
		HmmSnapshot::from(self)
	}

	/// Number of hidden states (N).
	pub fn n_states(&self) -> usize {
		self.n_states
	}

	/// Size of the output alphabet (M).
	pub fn n_symbols(&self) -> usize {
		self.n_symbols
	}

	/// Row-major N×N transition matrix.
	pub fn transitions(&self) -> &[f64] {
		&self.transitions
	}

	/// Row-major N×M emission matrix.
	pub fn emissions(&self) -> &[f64] {
		&self.emissions
	}

	/// Initial distribution, `None` when state 0 is the fixed start state.
	pub fn initial(&self) -> Option<&[f64]> {
		self.initial.as_deref()
	}

	pub fn transition_row(&self, state: usize) -> &[f64] {
		&self.transitions[state * self.n_states..(state + 1) * self.n_states]
	}

	pub fn emission_row(&self, state: usize) -> &[f64] {
		&self.emissions[state * self.n_symbols..(state + 1) * self.n_symbols]
	}

	/// `A[from][to]`
	#[inline]
	pub fn transition(&self, from: usize, to: usize) -> f64 {
		self.transitions[from * self.n_states + to]
	}

	/// `B[state][symbol]`
	#[inline]
	pub fn emission(&self, state: usize, symbol: usize) -> f64 {
		self.emissions[state * self.n_symbols + symbol]
	}

	/// Weight of `state` at the first step of a sequence.
	///
	/// Without an initial distribution every state gets weight 1, i.e.
	/// `α[0][i] = B[i][s0]`.
	#[inline]
	pub fn start_weight(&self, state: usize) -> f64 {
		match &self.initial {
			Some(initial) => initial[state],
			None => 1.0,
		}
	}

	/// Checks that every symbol of `sequence` is in `[0, n_symbols)`.
	pub fn check_symbols(&self, sequence: &[usize]) -> Result<()> {
		for (position, &symbol) in sequence.iter().enumerate() {
			if symbol >= self.n_symbols {
				return Err(HmmError::SymbolOutOfRange { symbol, position, n_symbols: self.n_symbols });
			}
		}
		Ok(())
	}

	/// Natural log of the probability of `sequence` under the model.
	///
	/// # Errors
	/// - `EmptySequence` / `SymbolOutOfRange` for invalid input
	/// - `DegenerateSequence` (with `sequence = 0`) if the sequence has zero
	///   probability
	pub fn log_likelihood(&self, sequence: &[usize]) -> Result<f64> {
		let alpha = lattice::forward(self, sequence)?;
		if let Some(step) = alpha.degenerate_step() {
			return Err(HmmError::DegenerateSequence { sequence: 0, step });
		}
		Ok(alpha.log_total())
	}

	/// Replaces all parameters at once.
	///
	/// This is the single mutation entry point and is reserved to the trainer,
	/// which guarantees the new rows are normalised.
	pub(crate) fn replace(&mut self, transitions: Vec<f64>, emissions: Vec<f64>, initial: Option<Vec<f64>>) {
		debug_assert_eq!(transitions.len(), self.transitions.len());
		debug_assert_eq!(emissions.len(), self.emissions.len());
		debug_assert_eq!(initial.as_ref().map(Vec::len), self.initial.as_ref().map(Vec::len));
		self.transitions = transitions;
		self.emissions = emissions;
		self.initial = initial;
	}
}

impl From<&Hmm> for HmmSnapshot {
	fn from(hmm: &Hmm) -> Self {
		Self {
			n_states: hmm.n_states,
			n_symbols: hmm.n_symbols,
			transitions: hmm.transitions.clone(),
			emissions: hmm.emissions.clone(),
			initial: hmm.initial.clone(),
		}
	}
}

fn check_dimensions(n_states: usize, n_symbols: usize) -> Result<()> {
	if n_states == 0 || n_symbols == 0 {
		return Err(HmmError::InvalidDimension { n_states, n_symbols });
	}
	Ok(())
}

fn check_rows(what: &'static str, values: &[f64], rows: usize, width: usize) -> Result<()> {
	if values.len() != rows * width {
		return Err(HmmError::DimensionMismatch { what, expected: rows * width, actual: values.len() });
	}
	for (row, chunk) in values.chunks(width).enumerate() {
		let sum: f64 = chunk.iter().sum();
		let valid = chunk.iter().all(|p| p.is_finite() && *p >= 0.0);
		if !valid || (sum - 1.0).abs() > DISTRIBUTION_TOLERANCE {
			return Err(HmmError::InvalidDistribution { what, row, sum });
		}
	}
	Ok(())
}

/// Draws `rows` random distributions of size `width`, row-major.
fn random_rows<R: Rng + ?Sized>(rows: usize, width: usize, rng: &mut R) -> Vec<f64> {
	let mut values: Vec<f64> = (0..rows * width).map(|_| rng.random::<f64>()).collect();
	for row in values.chunks_mut(width) {
		normalize_row(row);
	}
	values
}

/// Scales `row` so it sums to 1.
///
/// A row with no positive mass becomes uniform. Returns `false` in that case.
pub(crate) fn normalize_row(row: &mut [f64]) -> bool {
	let sum: f64 = row.iter().sum();
	if sum > 0.0 && sum.is_finite() {
		for p in row.iter_mut() {
			*p /= sum;
		}
		true
	} else {
		let uniform = 1.0 / row.len() as f64;
		row.fill(uniform);
		false
	}
}
