use crate::error::{HmmError, Result};
use super::params::Hmm;

/// Columns whose mass drops below this value are rescaled to sum to 1.
pub const RESCALE_FLOOR: f64 = 1e-150;

/// A forward (α) or backward (β) table for one sequence.
///
/// Values are stored row-major, one row ("column" of the state lattice) per
/// time step. Long sequences would underflow, so a row whose mass falls below
/// [`RESCALE_FLOOR`] is divided by its sum and the natural log of that sum is
/// added to the step's offset. Offsets accumulate along the direction of the
/// pass, and the true value is `value(t, i) * exp(log_offset(t))`.
///
/// Within one row all values share the same offset, so ratios within a row
/// (and thus the posteriors built from them) are exact.
#[derive(Clone, Debug)]
pub struct Lattice {
	n_states: usize,
	values: Vec<f64>,
	log_offsets: Vec<f64>,
}

impl Lattice {
	fn zeros(len: usize, n_states: usize) -> Self {
		Self { n_states, values: vec![0.0; len * n_states], log_offsets: vec![0.0; len] }
	}

	/// Number of time steps.
	pub fn len(&self) -> usize {
		self.log_offsets.len()
	}

	pub fn is_empty(&self) -> bool {
		self.log_offsets.is_empty()
	}

	pub fn n_states(&self) -> usize {
		self.n_states
	}

	/// Scaled values of step `t`.
	pub fn row(&self, t: usize) -> &[f64] {
		&self.values[t * self.n_states..(t + 1) * self.n_states]
	}

	fn row_mut(&mut self, t: usize) -> &mut [f64] {
		&mut self.values[t * self.n_states..(t + 1) * self.n_states]
	}

	/// Scaled value of state `i` at step `t`.
	#[inline]
	pub fn value(&self, t: usize, i: usize) -> f64 {
		self.values[t * self.n_states + i]
	}

	/// Natural log of the scale shared by every value of step `t`.
	pub fn log_offset(&self, t: usize) -> f64 {
		self.log_offsets[t]
	}

	/// Copies step `t` into `out`, divided by its largest value.
	///
	/// Rows are only rescaled once their mass nears underflow, so two rows
	/// multiplied together may still underflow; unit rows cannot. A vanished
	/// row stays all zero.
	pub fn unit_row(&self, t: usize, out: &mut [f64]) {
		let row = self.row(t);
		let max = row.iter().copied().fold(0.0, f64::max);
		for (o, &v) in out.iter_mut().zip(row) {
			*o = if max > 0.0 { v / max } else { 0.0 };
		}
	}

	/// Sum of the scaled values of step `t`.
	pub fn column_sum(&self, t: usize) -> f64 {
		self.row(t).iter().sum()
	}

	/// First step whose mass is zero or not finite, if any.
	pub fn degenerate_step(&self) -> Option<usize> {
		(0..self.len()).find(|&t| {
			let sum = self.column_sum(t);
			!(sum > 0.0 && sum.is_finite())
		})
	}

	/// `ln Σ_i true_value(T-1, i)`.
	///
	/// On a forward table this is the log-likelihood of the sequence.
	/// Returns negative infinity for an empty or vanished table.
	pub fn log_total(&self) -> f64 {
		match self.len() {
			0 => f64::NEG_INFINITY,
			len => self.column_sum(len - 1).ln() + self.log_offsets[len - 1],
		}
	}

	/// Rescales step `t` if it is about to underflow.
	fn rescale(&mut self, t: usize) {
		let sum = self.column_sum(t);
		if sum > 0.0 && sum < RESCALE_FLOOR {
			for v in self.row_mut(t) {
				*v /= sum;
			}
			self.log_offsets[t] += sum.ln();
		}
	}
}

/// Runs the forward pass.
///
/// - `α[0][i] = π[i] · B[i][s0]` (or `B[i][s0]` without an initial
///   distribution)
/// - `α[t][i] = B[i][s_t] · Σ_j α[t-1][j] · A[j][i]`
///
/// Cost is O(T·N²).
///
/// # Errors
/// `EmptySequence` or `SymbolOutOfRange`.
pub fn forward(hmm: &Hmm, sequence: &[usize]) -> Result<Lattice> {
	check(hmm, sequence)?;
	let n = hmm.n_states();
	let mut alpha = Lattice::zeros(sequence.len(), n);

	let s0 = sequence[0];
	for i in 0..n {
		alpha.values[i] = hmm.start_weight(i) * hmm.emission(i, s0);
	}
	alpha.rescale(0);

	for t in 1..sequence.len() {
		alpha.log_offsets[t] = alpha.log_offsets[t - 1];
		let symbol = sequence[t];
		for i in 0..n {
			let mut p = 0.0;
			for j in 0..n {
				p += alpha.value(t - 1, j) * hmm.transition(j, i);
			}
			alpha.values[t * n + i] = p * hmm.emission(i, symbol);
		}
		alpha.rescale(t);
	}

	Ok(alpha)
}

/// Runs the backward pass.
///
/// - `β[T-1][i] = 1`
/// - `β[t][i] = Σ_j A[i][j] · B[j][s_{t+1}] · β[t+1][j]`
///
/// # Errors
/// `EmptySequence` or `SymbolOutOfRange`.
pub fn backward(hmm: &Hmm, sequence: &[usize]) -> Result<Lattice> {
	check(hmm, sequence)?;
	let n = hmm.n_states();
	let len = sequence.len();
	let mut beta = Lattice::zeros(len, n);

	beta.row_mut(len - 1).fill(1.0);

	// Emission-weighted β of the following step, reused for every i
	let mut weighted = vec![0.0; n];
	for t in (0..len - 1).rev() {
		beta.log_offsets[t] = beta.log_offsets[t + 1];
		let symbol = sequence[t + 1];
		for (j, w) in weighted.iter_mut().enumerate() {
			*w = hmm.emission(j, symbol) * beta.value(t + 1, j);
		}
		for i in 0..n {
			beta.values[t * n + i] = hmm
				.transition_row(i)
				.iter()
				.zip(&weighted)
				.map(|(a, w)| a * w)
				.sum();
		}
		beta.rescale(t);
	}

	Ok(beta)
}

fn check(hmm: &Hmm, sequence: &[usize]) -> Result<()> {
	if sequence.is_empty() {
		return Err(HmmError::EmptySequence);
	}
	hmm.check_symbols(sequence)
}

#[cfg(test)]
mod tests {
	use super::*;

	fn two_state() -> Hmm {
		Hmm::from_parts(
			2,
			2,
			vec![0.6, 0.4, 0.3, 0.7],
			vec![0.8, 0.2, 0.1, 0.9],
			Some(vec![0.6, 0.4]),
		)
		.unwrap()
	}

	#[test]
	fn single_step_tables() {
		let hmm = two_state();
		let alpha = forward(&hmm, &[1]).unwrap();
		let beta = backward(&hmm, &[1]).unwrap();

		assert_eq!(alpha.len(), 1);
		assert!(!alpha.is_empty());
		assert_eq!(alpha.n_states(), 2);
		assert!((alpha.value(0, 0) - 0.6 * 0.2).abs() < 1e-15);
		assert!((alpha.value(0, 1) - 0.4 * 0.9).abs() < 1e-15);
		assert_eq!(beta.row(0), &[1.0, 1.0]);
	}

	#[test]
	fn single_step_without_initial() {
		let hmm = Hmm::from_parts(2, 2, vec![0.6, 0.4, 0.3, 0.7], vec![0.8, 0.2, 0.1, 0.9], None).unwrap();
		let alpha = forward(&hmm, &[0]).unwrap();
		assert_eq!(alpha.row(0), &[0.8, 0.1]);
	}

	#[test]
	fn forward_matches_brute_force() {
		// NB exact inference over 2^3 hidden paths.
		let hmm = two_state();
		let obs = [0, 1, 0];

		let mut total = 0.0;
		for path in 0..8usize {
			let states = [path & 1, (path >> 1) & 1, (path >> 2) & 1];
			let mut p = hmm.initial().unwrap()[states[0]] * hmm.emission(states[0], obs[0]);
			for t in 1..3 {
				p *= hmm.transition(states[t - 1], states[t]) * hmm.emission(states[t], obs[t]);
			}
			total += p;
		}

		let alpha = forward(&hmm, &obs).unwrap();
		assert!((alpha.log_total() - total.ln()).abs() < 1e-12);
	}

	#[test]
	fn forward_and_backward_agree() {
		let hmm = two_state();
		let obs = [0, 1, 0, 1, 1, 0];
		let alpha = forward(&hmm, &obs).unwrap();
		let beta = backward(&hmm, &obs).unwrap();

		// P(obs) = Σ_i α[t][i] β[t][i] for every t
		let expected = alpha.log_total();
		for t in 0..obs.len() {
			let s: f64 = (0..2).map(|i| alpha.value(t, i) * beta.value(t, i)).sum();
			let log_p = s.ln() + alpha.log_offset(t) + beta.log_offset(t);
			assert!((log_p - expected).abs() < 1e-10);
		}
	}

	#[test]
	fn long_sequences_do_not_underflow() {
		let hmm = two_state();
		let obs: Vec<usize> = (0..5000).map(|t| t % 2).collect();
		let alpha = forward(&hmm, &obs).unwrap();
		let beta = backward(&hmm, &obs).unwrap();

		assert_eq!(alpha.degenerate_step(), None);
		assert_eq!(beta.degenerate_step(), None);
		assert!(alpha.log_total().is_finite());
		assert!(alpha.log_total() < -1000.0);
		assert!(alpha.log_offset(4999) < 0.0);
	}

	#[test]
	fn unit_rows_survive_tiny_rows() {
		let hmm = two_state();
		let obs: Vec<usize> = (0..400).map(|t| t % 2).collect();
		let alpha = forward(&hmm, &obs).unwrap();

		let mut out = vec![0.0; 2];
		for t in 0..obs.len() {
			alpha.unit_row(t, &mut out);
			let max = out.iter().copied().fold(0.0, f64::max);
			assert_eq!(max, 1.0);
			let row = alpha.row(t);
			assert!((out[0] * row[1] - out[1] * row[0]).abs() <= 1e-12 * row[0].max(row[1]));
		}

		let vanished = Hmm::from_parts(2, 2, vec![0.5, 0.5, 0.5, 0.5], vec![1.0, 0.0, 1.0, 0.0], None).unwrap();
		let alpha = forward(&vanished, &[1]).unwrap();
		alpha.unit_row(0, &mut out);
		assert_eq!(out, [0.0, 0.0]);
	}

	#[test]
	fn invalid_sequences_are_rejected() {
		let hmm = two_state();
		assert!(matches!(forward(&hmm, &[]), Err(HmmError::EmptySequence)));
		assert!(matches!(
			backward(&hmm, &[0, 5]),
			Err(HmmError::SymbolOutOfRange { symbol: 5, position: 1, n_symbols: 2 })
		));
	}
}
