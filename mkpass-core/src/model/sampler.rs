use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::params::Hmm;

/// Builds a generator from `seed`, or from operating-system entropy when no
/// seed is given.
pub(crate) fn seeded_rng(seed: Option<u64>) -> StdRng {
	match seed {
		Some(seed) => StdRng::seed_from_u64(seed),
		None => StdRng::from_os_rng(),
	}
}

/// Draws an index with probability proportional to `weights[index]`.
///
/// Performs an O(n) cumulative scan. If rounding leaves a remainder after
/// the scan, the last index with positive weight is returned.
pub(crate) fn categorical<R: Rng + ?Sized>(weights: &[f64], rng: &mut R) -> usize {
	let total: f64 = weights.iter().sum();
	let mut r = rng.random::<f64>() * total;

	let mut fallback = 0;
	for (index, &weight) in weights.iter().enumerate() {
		if weight <= 0.0 {
			continue;
		}
		if r < weight {
			return index;
		}
		r -= weight;
		fallback = index;
	}
	fallback
}

/// Ancestral sampler over a trained model.
///
/// Holds a shared borrow of the parameters, so any number of samplers can
/// run side by side while no trainer can update the same model.
#[derive(Debug)]
pub struct Sampler<'a> {
	hmm: &'a Hmm,
	rng: StdRng,
}

impl<'a> Sampler<'a> {
	/// Creates a sampler. `seed == None` seeds from operating-system entropy.
	pub fn new(hmm: &'a Hmm, seed: Option<u64>) -> Self {
		Self { hmm, rng: seeded_rng(seed) }
	}

	/// Reseeds the generator; the next sequence restarts from that seed.
	pub fn reseed(&mut self, seed: Option<u64>) {
		self.rng = seeded_rng(seed);
	}

	/// Generates exactly `length` symbols, each in `[0, n_symbols)`.
	///
	/// The start state is drawn from the initial distribution (state 0 when
	/// the model has none). At each step the current state emits a symbol,
	/// then moves to the next state.
	pub fn generate(&mut self, length: usize) -> Vec<usize> {
		let mut state = match self.hmm.initial() {
			Some(initial) => categorical(initial, &mut self.rng),
			None => 0,
		};

		let mut symbols = Vec::with_capacity(length);
		for _ in 0..length {
			symbols.push(categorical(self.hmm.emission_row(state), &mut self.rng));
			state = categorical(self.hmm.transition_row(state), &mut self.rng);
		}
		symbols
	}
}
