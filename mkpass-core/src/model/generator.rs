use std::collections::HashSet;

use log::info;
use serde::{Deserialize, Serialize};

use crate::error::{HmmError, Result};
use super::alphabet::Alphabet;
use super::params::{Hmm, HmmSnapshot};
use super::sampler::{seeded_rng, Sampler};
use super::trainer::{BaumWelch, TrainConfig, TrainReport};

/// Parameters of [`PasswordGenerator::train`].
#[derive(Clone, Debug)]
pub struct GeneratorConfig {
	/// Number of hidden states.
	pub states: usize,

	/// Number of Baum-Welch iterations.
	pub iterations: usize,

	/// Seed for parameter initialisation and training noise.
	/// `None` uses operating-system entropy.
	pub seed: Option<u64>,

	/// Always start generation in state 0 instead of learning an initial
	/// distribution.
	pub fixed_start: bool,

	pub train: TrainConfig,
}

impl Default for GeneratorConfig {
	fn default() -> Self {
		Self { states: 256, iterations: 4, seed: None, fixed_start: false, train: TrainConfig::default() }
	}
}

/// High-level interface learning words and generating new ones.
///
/// # Responsibilities
/// - Map training words to symbol sequences through an [`Alphabet`]
/// - Train a [`Hmm`] with [`BaumWelch`]
/// - Sample new words and map them back to text
#[derive(Clone, Debug)]
pub struct PasswordGenerator {
	alphabet: Alphabet,
	hmm: Hmm,
}

/// On-disk form of a [`PasswordGenerator`].
#[derive(Serialize, Deserialize, Debug)]
pub(crate) struct GeneratorRecord {
	alphabet: Alphabet,
	model: HmmSnapshot,
}

impl PasswordGenerator {
	/// Trains a generator on `words`.
	///
	/// # Behavior
	/// - Duplicate words are ignored
	/// - Characters are lowercased
	/// - A random model is drawn from `config.seed` and trained for
	///   `config.iterations` iterations
	///
	/// # Errors
	/// - `EmptyCorpus` if `words` contains no character at all
	/// - `InvalidDimension` if `config.states` is zero
	pub fn train<I, S>(words: I, config: &GeneratorConfig) -> Result<(Self, TrainReport)>
	where
		I: IntoIterator<Item = S>,
		S: AsRef<str>,
	{
		let mut seen = HashSet::new();
		let words: Vec<String> = words
			.into_iter()
			.map(|w| w.as_ref().to_owned())
			.filter(|w| !w.is_empty() && seen.insert(w.clone()))
			.collect();

		let alphabet = Alphabet::from_words(&words);
		if alphabet.is_empty() {
			return Err(HmmError::EmptyCorpus);
		}
		let corpus = words.iter().map(|w| alphabet.encode(w)).collect::<Result<Vec<_>>>()?;

		info!(
			"Training on {} words, {} symbols, {} states, {} iterations",
			corpus.len(),
			alphabet.len(),
			config.states,
			config.iterations
		);

		let mut rng = seeded_rng(config.seed);
		let mut hmm = if config.fixed_start {
			Hmm::random_fixed_start(config.states, alphabet.len(), &mut rng)?
		} else {
			Hmm::random(config.states, alphabet.len(), &mut rng)?
		};

		// Derived so one seed fixes both initialisation and noise
		let trainer_seed = config.seed.map(|seed| seed.wrapping_add(1));
		let mut trainer = BaumWelch::new(config.train.clone(), trainer_seed);
		let report = trainer.train(&mut hmm, &corpus, config.iterations)?;

		Ok((Self { alphabet, hmm }, report))
	}

	/// Wraps an existing model.
	///
	/// # Errors
	/// Returns `DimensionMismatch` if the model and alphabet sizes differ.
	pub fn from_parts(alphabet: Alphabet, hmm: Hmm) -> Result<Self> {
		if alphabet.len() != hmm.n_symbols() {
			return Err(HmmError::DimensionMismatch {
				what: "alphabet",
				expected: hmm.n_symbols(),
				actual: alphabet.len(),
			});
		}
		Ok(Self { alphabet, hmm })
	}

	pub fn alphabet(&self) -> &Alphabet {
		&self.alphabet
	}

	pub fn hmm(&self) -> &Hmm {
		&self.hmm
	}

	/// Generates one word of exactly `length` characters.
	pub fn generate(&self, length: usize, seed: Option<u64>) -> Result<String> {
		let symbols = Sampler::new(&self.hmm, seed).generate(length);
		self.alphabet.decode(&symbols)
	}

	/// Generates `count` words of `length` characters from a single sampler.
	pub fn generate_many(&self, count: usize, length: usize, seed: Option<u64>) -> Result<Vec<String>> {
		let mut sampler = Sampler::new(&self.hmm, seed);
		(0..count).map(|_| self.alphabet.decode(&sampler.generate(length))).collect()
	}

	/// Log-likelihood of `word` under the model.
	///
	/// # Errors
	/// `UnknownCharacter`, `EmptySequence` or `DegenerateSequence`.
	pub fn score(&self, word: &str) -> Result<f64> {
		let symbols = self.alphabet.encode(word)?;
		self.hmm.log_likelihood(&symbols)
	}

	pub(crate) fn to_record(&self) -> GeneratorRecord {
		GeneratorRecord { alphabet: self.alphabet.clone(), model: self.hmm.snapshot() }
	}

	pub(crate) fn from_record(record: GeneratorRecord) -> Result<Self> {
		Self::from_parts(record.alphabet, Hmm::from_snapshot(record.model)?)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn config() -> GeneratorConfig {
		GeneratorConfig {
			states: 6,
			iterations: 3,
			seed: Some(17),
			train: TrainConfig::default().with_threads(2),
			..GeneratorConfig::default()
		}
	}

	const WORDS: [&str; 6] = ["banana", "Bandana", "cabana", "anana", "banana", "nab"];

	#[test]
	fn trains_and_generates() {
		let (generator, report) = PasswordGenerator::train(WORDS, &config()).unwrap();

		assert_eq!(report.iterations, 3);
		assert_eq!(generator.alphabet().len(), 5);
		assert_eq!(generator.hmm().n_symbols(), 5);

		let words = generator.generate_many(10, 8, Some(1)).unwrap();
		assert_eq!(words.len(), 10);
		for word in words {
			assert_eq!(word.chars().count(), 8);
			assert!(word.chars().all(|c| "bandc".contains(c)));
		}
	}

	#[test]
	fn same_seed_same_generator() {
		let (a, _) = PasswordGenerator::train(WORDS, &config()).unwrap();
		let (b, _) = PasswordGenerator::train(WORDS, &config()).unwrap();

		assert_eq!(a.hmm(), b.hmm());
		assert_eq!(a.generate(12, Some(4)).unwrap(), b.generate(12, Some(4)).unwrap());
	}

	#[test]
	fn scores_known_words_higher_than_unlikely_ones() {
		let (generator, _) = PasswordGenerator::train(WORDS, &config()).unwrap();
		let known = generator.score("banana").unwrap();
		let odd = generator.score("ccccdd").unwrap();
		assert!(known.is_finite());
		assert!(known > odd);
		assert!(matches!(generator.score("xyz"), Err(HmmError::UnknownCharacter('x'))));
	}

	#[test]
	fn empty_word_list_is_rejected() {
		let words: [&str; 2] = ["", ""];
		assert!(matches!(PasswordGenerator::train(words, &config()), Err(HmmError::EmptyCorpus)));
	}

	#[test]
	fn mismatched_parts_are_rejected() {
		let alphabet = Alphabet::from_words(["abc"]);
		let hmm = Hmm::uniform(2, 4, true).unwrap();
		assert!(matches!(
			PasswordGenerator::from_parts(alphabet, hmm),
			Err(HmmError::DimensionMismatch { expected: 4, actual: 3, .. })
		));
	}
}
