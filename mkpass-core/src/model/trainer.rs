use std::fmt;
use std::sync::mpsc;
use std::thread;

use log::{debug, info, warn};
use rand::Rng;
use rand::rngs::StdRng;

use crate::error::{HmmError, Result};
use super::lattice;
use super::params::{normalize_row, Hmm};
use super::sampler::seeded_rng;

/// Training parameters.
///
/// # Invariants
/// - `noise` is within `[0.0, 1.0]`
#[derive(Clone, Debug)]
pub struct TrainConfig {
	/// Number of E-step workers. `None` uses one per logical CPU.
	pub threads: Option<usize>,

	/// Stop early once the corpus log-likelihood improves by less than this.
	/// `None` always runs the requested number of iterations.
	pub tolerance: Option<f64>,

	/// Amplitude of the uniform perturbation added to `A` and `B` after each
	/// M-step (0.0 = off).
	noise: f64,
}

impl Default for TrainConfig {
	fn default() -> Self {
		Self { threads: None, tolerance: None, noise: 0.0 }
	}
}

impl TrainConfig {
	/// Uses exactly `threads` E-step workers.
	pub fn with_threads(mut self, threads: usize) -> Self {
		self.threads = Some(threads);
		self
	}

	pub fn with_tolerance(mut self, tolerance: f64) -> Self {
		self.tolerance = Some(tolerance);
		self
	}

	pub fn noise(&self) -> f64 {
		self.noise
	}

	/// Sets the perturbation amplitude (0.0..=1.0).
	///
	/// # Errors
	/// Returns `InvalidConfig` if the value is outside the valid range.
	pub fn set_noise(&mut self, noise: f64) -> Result<()> {
		if !(0.0..=1.0).contains(&noise) {
			return Err(HmmError::InvalidConfig(format!("noise must be between 0.0 and 1.0, got {noise}")));
		}
		self.noise = noise;
		Ok(())
	}
}

/// A sequence whose posteriors vanished during an E-step.
///
/// Its contributions from `step` on were skipped; training went on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DegenerateStep {
	/// Index of the sequence in the corpus.
	pub sequence: usize,
	/// First skipped time step.
	pub step: usize,
}

impl From<DegenerateStep> for HmmError {
	fn from(d: DegenerateStep) -> Self {
		HmmError::DegenerateSequence { sequence: d.sequence, step: d.step }
	}
}

impl fmt::Display for DegenerateStep {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", HmmError::from(*self))
	}
}

/// Outcome of a training run.
#[derive(Clone, Debug, Default)]
pub struct TrainReport {
	/// Number of completed iterations.
	pub iterations: usize,
	/// Corpus log-likelihood of the parameters entering each iteration, over
	/// the sequences that were not degenerate. NaN when none could be scored.
	pub log_likelihoods: Vec<f64>,
	/// Whether training stopped early on `tolerance`.
	pub converged: bool,
	/// Every degenerate sequence met, per iteration.
	pub degenerate: Vec<DegenerateStep>,
}

/// Expected counts gathered by the E-step.
///
/// Each worker owns one; partial instances are summed with [`merge`](Self::merge).
#[derive(Clone, Debug)]
struct Expectations {
	n_states: usize,
	n_symbols: usize,
	/// Σ ξ[t][i][j], row-major N×N
	transitions: Vec<f64>,
	/// Σ γ[t][i] over steps emitting v, row-major N×M
	emissions: Vec<f64>,
	/// Σ γ[0][i]
	initial: Vec<f64>,
	log_likelihood: f64,
	/// Sequences that contributed to `log_likelihood`
	scored: usize,
	degenerate: Vec<DegenerateStep>,
}

impl Expectations {
	fn new(n_states: usize, n_symbols: usize) -> Self {
		Self {
			n_states,
			n_symbols,
			transitions: vec![0.0; n_states * n_states],
			emissions: vec![0.0; n_states * n_symbols],
			initial: vec![0.0; n_states],
			log_likelihood: 0.0,
			scored: 0,
			degenerate: Vec::new(),
		}
	}

	/// Runs the E-step over `sequences`, whose first element has corpus index
	/// `offset`. Empty sequences carry no evidence and are skipped.
	fn collect(hmm: &Hmm, sequences: &[Vec<usize>], offset: usize) -> Result<Self> {
		let mut expectations = Self::new(hmm.n_states(), hmm.n_symbols());
		for (k, sequence) in sequences.iter().enumerate() {
			if !sequence.is_empty() {
				expectations.accumulate(hmm, sequence, offset + k)?;
			}
		}
		Ok(expectations)
	}

	/// Adds the posteriors of one sequence.
	///
	/// γ and ξ are renormalised per step. Both lattices are brought to a unit
	/// maximum first, so their product cannot underflow while the sequence
	/// itself has a finite probability. A step whose normaliser is still not
	/// strictly positive is skipped and the sequence is recorded as
	/// degenerate.
	fn accumulate(&mut self, hmm: &Hmm, sequence: &[usize], index: usize) -> Result<()> {
		let alpha = lattice::forward(hmm, sequence)?;
		let beta = lattice::backward(hmm, sequence)?;
		let n = self.n_states;
		let m = self.n_symbols;
		let mut first_skipped: Option<usize> = None;
		let mut skip = |t: usize| first_skipped = Some(first_skipped.map_or(t, |s| s.min(t)));

		let mut a_row = vec![0.0; n];
		let mut b_row = vec![0.0; n];

		// γ
		let mut gamma = vec![0.0; n];
		for (t, &symbol) in sequence.iter().enumerate() {
			alpha.unit_row(t, &mut a_row);
			beta.unit_row(t, &mut b_row);
			let mut norm = 0.0;
			for (i, g) in gamma.iter_mut().enumerate() {
				*g = a_row[i] * b_row[i];
				norm += *g;
			}
			if !is_positive(norm) {
				skip(t);
				continue;
			}
			for (i, g) in gamma.iter().enumerate() {
				let g = g / norm;
				self.emissions[i * m + symbol] += g;
				if t == 0 {
					self.initial[i] += g;
				}
			}
		}

		// ξ
		let mut weighted = vec![0.0; n];
		let mut xi = vec![0.0; n * n];
		for t in 0..sequence.len() - 1 {
			let symbol = sequence[t + 1];
			alpha.unit_row(t, &mut a_row);
			beta.unit_row(t + 1, &mut b_row);
			for (j, w) in weighted.iter_mut().enumerate() {
				*w = hmm.emission(j, symbol) * b_row[j];
			}
			let mut norm = 0.0;
			for i in 0..n {
				let a = a_row[i];
				let row = hmm.transition_row(i);
				for j in 0..n {
					let v = a * row[j] * weighted[j];
					xi[i * n + j] = v;
					norm += v;
				}
			}
			if !is_positive(norm) {
				skip(t);
				continue;
			}
			for (acc, v) in self.transitions.iter_mut().zip(&xi) {
				*acc += v / norm;
			}
		}

		match first_skipped {
			Some(step) => self.degenerate.push(DegenerateStep { sequence: index, step }),
			None => {
				self.log_likelihood += alpha.log_total();
				self.scored += 1;
			}
		}
		Ok(())
	}

	/// Log-likelihood of the scored sequences, NaN if there were none.
	fn corpus_log_likelihood(&self) -> f64 {
		if self.scored == 0 { f64::NAN } else { self.log_likelihood }
	}

	/// Adds another partial accumulator into this one.
	fn merge(&mut self, other: &Self) {
		debug_assert_eq!(self.n_states, other.n_states);
		debug_assert_eq!(self.n_symbols, other.n_symbols);

		for (a, b) in self.transitions.iter_mut().zip(&other.transitions) {
			*a += b;
		}
		for (a, b) in self.emissions.iter_mut().zip(&other.emissions) {
			*a += b;
		}
		for (a, b) in self.initial.iter_mut().zip(&other.initial) {
			*a += b;
		}
		self.log_likelihood += other.log_likelihood;
		self.scored += other.scored;
		self.degenerate.extend_from_slice(&other.degenerate);
	}
}

/// Baum-Welch trainer.
///
/// Owns its own random generator, used only for the optional noise, so a
/// fixed seed and a fixed configuration reproduce a training run exactly.
#[derive(Debug)]
pub struct BaumWelch {
	config: TrainConfig,
	rng: StdRng,
}

impl BaumWelch {
	/// Creates a trainer. `seed == None` seeds from operating-system entropy.
	pub fn new(config: TrainConfig, seed: Option<u64>) -> Self {
		Self { config, rng: seeded_rng(seed) }
	}

	/// Reseeds the trainer's generator.
	pub fn reseed(&mut self, seed: Option<u64>) {
		self.rng = seeded_rng(seed);
	}

	/// Runs `iterations` expectation-maximisation sweeps over `corpus`,
	/// updating `hmm` in place.
	///
	/// Sums are raw counts over all sequences, so longer sequences weigh more.
	///
	/// # Errors
	/// - `EmptyCorpus` if `corpus` has no sequence
	/// - `SymbolOutOfRange` if any symbol is outside `[0, M)`; the model is
	///   left untouched
	///
	/// Degenerate sequences never fail the run; they are logged and listed in
	/// the report.
	pub fn train(&mut self, hmm: &mut Hmm, corpus: &[Vec<usize>], iterations: usize) -> Result<TrainReport> {
		if corpus.is_empty() {
			return Err(HmmError::EmptyCorpus);
		}
		for sequence in corpus {
			hmm.check_symbols(sequence)?;
		}

		let empty = corpus.iter().filter(|s| s.is_empty()).count();
		if empty > 0 {
			debug!("Skipping {} empty sequence(s) out of {}", empty, corpus.len());
		}

		let workers = self.config.threads.unwrap_or_else(num_cpus::get).clamp(1, corpus.len());
		let mut report = TrainReport::default();

		for iteration in 0..iterations {
			let expectations = Self::expectations(hmm, corpus, workers)?;
			for degenerate in &expectations.degenerate {
				warn!("Iteration {}: {}", iteration + 1, degenerate);
			}
			let log_likelihood = expectations.corpus_log_likelihood();
			if log_likelihood.is_nan() {
				warn!("Iteration {}/{}: no sequence could be scored", iteration + 1, iterations);
			} else {
				info!("Iteration {}/{}: log-likelihood {:.6}", iteration + 1, iterations, log_likelihood);
			}

			let previous = report.log_likelihoods.last().copied();
			report.log_likelihoods.push(log_likelihood);
			report.degenerate.extend_from_slice(&expectations.degenerate);

			self.maximize(hmm, &expectations);
			report.iterations += 1;

			if let (Some(tolerance), Some(previous)) = (self.config.tolerance, previous) {
				// NaN never compares below the tolerance
				if (log_likelihood - previous).abs() < tolerance {
					info!("Converged after {} iterations", report.iterations);
					report.converged = true;
					break;
				}
			}
		}

		Ok(report)
	}

	/// E-step over the whole corpus.
	///
	/// The corpus is split into one chunk per worker; each worker accumulates
	/// into its own `Expectations`. Partials are merged in chunk order so the
	/// summation order only depends on the worker count.
	fn expectations(hmm: &Hmm, corpus: &[Vec<usize>], workers: usize) -> Result<Expectations> {
		if workers <= 1 {
			return Expectations::collect(hmm, corpus, 0);
		}

		let chunk_size = corpus.len().div_ceil(workers);
		let (tx, rx) = mpsc::channel();
		thread::scope(|scope| {
			for (chunk_index, chunk) in corpus.chunks(chunk_size).enumerate() {
				let tx = tx.clone();
				scope.spawn(move || {
					let partial = Expectations::collect(hmm, chunk, chunk_index * chunk_size);
					// The receiver outlives the scope
					let _ = tx.send((chunk_index, partial));
				});
			}
		});
		drop(tx);

		let mut partials: Vec<(usize, Result<Expectations>)> = rx.iter().collect();
		partials.sort_by_key(|(chunk_index, _)| *chunk_index);

		let mut total = Expectations::new(hmm.n_states(), hmm.n_symbols());
		for (_, partial) in partials {
			total.merge(&partial?);
		}
		Ok(total)
	}

	/// M-step: replaces `A`, `B` and `π` with their re-estimates.
	///
	/// A row whose expected count is zero (state never occupied) is kept.
	fn maximize(&mut self, hmm: &mut Hmm, expectations: &Expectations) {
		let n = hmm.n_states();
		let m = hmm.n_symbols();

		let mut transitions = reestimate(&expectations.transitions, n, hmm.transitions());
		let mut emissions = reestimate(&expectations.emissions, m, hmm.emissions());
		let initial = hmm.initial().map(|previous| reestimate(&expectations.initial, n, previous));

		if self.config.noise > 0.0 {
			self.perturb(&mut transitions, n);
			self.perturb(&mut emissions, m);
		}

		hmm.replace(transitions, emissions, initial);
	}

	/// Adds uniform `[0, noise)` values to every entry and renormalises.
	fn perturb(&mut self, values: &mut [f64], width: usize) {
		for row in values.chunks_mut(width) {
			for p in row.iter_mut() {
				*p += self.rng.random::<f64>() * self.config.noise;
			}
			normalize_row(row);
		}
	}
}

/// Normalises each row of expected counts, keeping the previous row where
/// the counts sum to zero.
fn reestimate(counts: &[f64], width: usize, previous: &[f64]) -> Vec<f64> {
	let mut values = counts.to_vec();
	for (row, old) in values.chunks_mut(width).zip(previous.chunks(width)) {
		let sum: f64 = row.iter().sum();
		if is_positive(sum) {
			for p in row.iter_mut() {
				*p /= sum;
			}
		} else {
			row.copy_from_slice(old);
		}
	}
	values
}

#[inline]
fn is_positive(value: f64) -> bool {
	value > 0.0 && value.is_finite()
}

#[cfg(test)]
mod tests {
	use super::*;
	use rand::SeedableRng;

	fn assert_valid(hmm: &Hmm) {
		let rows = |values: &[f64], width: usize| {
			for row in values.chunks(width) {
				let sum: f64 = row.iter().sum();
				assert!((sum - 1.0).abs() < 1e-9, "row sums to {sum}");
				assert!(row.iter().all(|p| p.is_finite() && *p >= 0.0));
			}
		};
		rows(hmm.transitions(), hmm.n_states());
		rows(hmm.emissions(), hmm.n_symbols());
		if let Some(initial) = hmm.initial() {
			rows(initial, hmm.n_states());
		}
	}

	fn single_threaded() -> TrainConfig {
		TrainConfig::default().with_threads(1)
	}

	fn random_corpus(rng: &mut StdRng, count: usize, n_symbols: usize) -> Vec<Vec<usize>> {
		(0..count)
			.map(|_| {
				let len = rng.random_range(1..12);
				(0..len).map(|_| rng.random_range(0..n_symbols)).collect()
			})
			.collect()
	}

	#[test]
	fn rows_stay_normalized_every_iteration() {
		let mut rng = StdRng::seed_from_u64(3);
		let corpus = random_corpus(&mut rng, 30, 5);
		let mut hmm = Hmm::random(4, 5, &mut rng).unwrap();
		let mut trainer = BaumWelch::new(single_threaded(), Some(1));

		assert_valid(&hmm);
		for _ in 0..5 {
			trainer.train(&mut hmm, &corpus, 1).unwrap();
			assert_valid(&hmm);
		}
	}

	#[test]
	fn single_symbol_alphabet() {
		let mut rng = StdRng::seed_from_u64(5);
		let mut hmm = Hmm::random(3, 1, &mut rng).unwrap();
		let mut trainer = BaumWelch::new(single_threaded(), Some(5));

		trainer.train(&mut hmm, &[vec![0, 0, 0, 0, 0, 0]], 1).unwrap();

		for state in 0..3 {
			assert_eq!(hmm.emission(state, 0), 1.0);
		}
		assert_valid(&hmm);
	}

	#[test]
	fn zero_iterations_is_a_no_op() {
		let mut rng = StdRng::seed_from_u64(9);
		let mut hmm = Hmm::random(2, 2, &mut rng).unwrap();
		let before = hmm.clone();

		let report = BaumWelch::new(single_threaded(), Some(9))
			.train(&mut hmm, &[vec![0, 1, 1]], 0)
			.unwrap();

		assert_eq!(report.iterations, 0);
		assert_eq!(hmm, before);
	}

	#[test]
	fn log_likelihood_never_decreases() {
		let mut rng = StdRng::seed_from_u64(11);
		let corpus = random_corpus(&mut rng, 20, 3);
		let mut hmm = Hmm::random(3, 3, &mut rng).unwrap();

		let report = BaumWelch::new(single_threaded(), Some(11))
			.train(&mut hmm, &corpus, 15)
			.unwrap();

		assert_eq!(report.log_likelihoods.len(), 15);
		for pair in report.log_likelihoods.windows(2) {
			assert!(pair[1] >= pair[0] - 1e-9, "{} < {}", pair[1], pair[0]);
		}
	}

	#[test]
	fn empty_corpus_is_rejected() {
		let mut hmm = Hmm::uniform(2, 2, true).unwrap();
		let result = BaumWelch::new(single_threaded(), Some(0)).train(&mut hmm, &[], 3);
		assert!(matches!(result, Err(HmmError::EmptyCorpus)));
	}

	#[test]
	fn out_of_range_symbol_leaves_model_untouched() {
		let mut rng = StdRng::seed_from_u64(2);
		let mut hmm = Hmm::random(2, 2, &mut rng).unwrap();
		let before = hmm.clone();

		let result = BaumWelch::new(single_threaded(), Some(2)).train(&mut hmm, &[vec![0, 1], vec![1, 2]], 3);

		assert!(matches!(result, Err(HmmError::SymbolOutOfRange { symbol: 2, position: 1, .. })));
		assert_eq!(hmm, before);
	}

	#[test]
	fn unoccupied_rows_are_kept() {
		let mut rng = StdRng::seed_from_u64(4);
		let mut hmm = Hmm::random(2, 3, &mut rng).unwrap();
		let before = hmm.clone();

		// Only empty sequences: every expected count is zero
		let report = BaumWelch::new(single_threaded(), Some(4))
			.train(&mut hmm, &[vec![], vec![]], 2)
			.unwrap();

		assert_eq!(report.iterations, 2);
		assert_eq!(hmm, before);
	}

	#[test]
	fn degenerate_sequences_are_skipped() {
		// Symbol 1 can never be emitted
		let mut hmm = Hmm::from_parts(2, 2, vec![0.5, 0.5, 0.5, 0.5], vec![1.0, 0.0, 1.0, 0.0], None).unwrap();
		let corpus = vec![vec![0, 0, 0], vec![0, 1]];

		let report = BaumWelch::new(single_threaded(), Some(0)).train(&mut hmm, &corpus, 2).unwrap();

		assert_eq!(report.degenerate.len(), 2);
		assert!(report.degenerate.iter().all(|d| d.sequence == 1 && d.step == 0));
		assert!(report.log_likelihoods.iter().all(|ll| ll.is_finite()));
		assert_valid(&hmm);
		assert_eq!(hmm.emission(0, 0), 1.0);
	}

	#[test]
	fn unscored_iterations_have_no_log_likelihood() {
		let mut hmm = Hmm::from_parts(2, 2, vec![0.5, 0.5, 0.5, 0.5], vec![1.0, 0.0, 1.0, 0.0], None).unwrap();
		let config = single_threaded().with_tolerance(f64::INFINITY);

		let report = BaumWelch::new(config, Some(0)).train(&mut hmm, &[vec![0, 1]], 3).unwrap();

		assert_eq!(report.log_likelihoods.len(), 3);
		assert!(report.log_likelihoods.iter().all(|ll| ll.is_nan()));
		assert!(!report.converged);
		assert_eq!(report.iterations, 3);
	}

	#[test]
	fn sticky_states_switching_late_are_not_degenerate() {
		// Both lattices sit near the rescale floor around the switch
		let mut hmm = Hmm::from_parts(
			2,
			4,
			vec![1.0 - 1e-30, 1e-30, 1e-30, 1.0 - 1e-30],
			vec![0.5, 0.0, 0.5, 0.0, 0.0, 0.5, 0.0, 0.5],
			Some(vec![0.5, 0.5]),
		)
		.unwrap();
		let sequence: Vec<usize> = std::iter::repeat_n(0, 996).chain(std::iter::repeat_n(1, 997)).collect();
		let expected = hmm.log_likelihood(&sequence).unwrap();

		let report = BaumWelch::new(single_threaded(), Some(0)).train(&mut hmm, &[sequence], 1).unwrap();

		assert!(report.degenerate.is_empty(), "{:?}", report.degenerate);
		assert!((report.log_likelihoods[0] - expected).abs() < 1e-9);
		assert!(expected < -1000.0);
		assert_valid(&hmm);
		assert!(hmm.emission(0, 0) > 0.49 && hmm.emission(1, 1) > 0.49);
	}

	#[test]
	fn workers_agree_with_single_thread() {
		let mut rng = StdRng::seed_from_u64(21);
		let corpus = random_corpus(&mut rng, 40, 4);
		let start = Hmm::random(3, 4, &mut rng).unwrap();

		let mut sequential = start.clone();
		BaumWelch::new(single_threaded(), Some(1)).train(&mut sequential, &corpus, 4).unwrap();

		let mut parallel = start;
		let config = TrainConfig::default().with_threads(4);
		BaumWelch::new(config, Some(1)).train(&mut parallel, &corpus, 4).unwrap();

		for (a, b) in sequential.transitions().iter().zip(parallel.transitions()) {
			assert!((a - b).abs() < 1e-10);
		}
		for (a, b) in sequential.emissions().iter().zip(parallel.emissions()) {
			assert!((a - b).abs() < 1e-10);
		}
	}

	#[test]
	fn noise_keeps_rows_normalized() {
		let mut config = single_threaded();
		assert!(config.set_noise(1.5).is_err());
		config.set_noise(0.05).unwrap();

		let mut rng = StdRng::seed_from_u64(8);
		let corpus = random_corpus(&mut rng, 10, 4);
		let mut hmm = Hmm::random(3, 4, &mut rng).unwrap();
		BaumWelch::new(config, Some(8)).train(&mut hmm, &corpus, 3).unwrap();

		assert_valid(&hmm);
	}

	#[test]
	fn tolerance_stops_early() {
		let mut hmm = Hmm::random(2, 2, &mut StdRng::seed_from_u64(6)).unwrap();
		let config = single_threaded().with_tolerance(f64::INFINITY);

		let report = BaumWelch::new(config, Some(6)).train(&mut hmm, &[vec![0, 1, 0, 1]], 50).unwrap();

		assert!(report.converged);
		assert_eq!(report.iterations, 2);
	}
}
