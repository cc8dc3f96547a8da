//! Error type shared by the whole crate.

use thiserror::Error;

/// Everything that can go wrong while building, training, sampling or
/// persisting a model.
///
/// `DegenerateSequence` is the only non-fatal kind: the trainer never returns
/// it, it collects it in [`TrainReport`](crate::model::trainer::TrainReport)
/// and keeps going.
#[derive(Debug, Error)]
pub enum HmmError {
	/// A model was requested with zero hidden states or zero symbols.
	#[error("invalid dimension: {n_states} states, {n_symbols} symbols (both must be >= 1)")]
	InvalidDimension { n_states: usize, n_symbols: usize },

	/// Training was requested on a corpus without any sequence.
	#[error("training corpus is empty")]
	EmptyCorpus,

	/// Scoring was requested on a zero-length sequence.
	#[error("sequence is empty")]
	EmptySequence,

	/// A symbol is outside `[0, n_symbols)`.
	#[error("symbol {symbol} at position {position} is out of range (n_symbols = {n_symbols})")]
	SymbolOutOfRange { symbol: usize, position: usize, n_symbols: usize },

	/// The forward or backward column of a sequence vanished at `step`.
	#[error("sequence {sequence} is degenerate at step {step}")]
	DegenerateSequence { sequence: usize, step: usize },

	/// A parameter vector does not have the length its dimensions imply.
	#[error("{what} has length {actual}, expected {expected}")]
	DimensionMismatch { what: &'static str, expected: usize, actual: usize },

	/// A parameter row is not a probability distribution.
	#[error("{what} row {row} is not a distribution (sum = {sum})")]
	InvalidDistribution { what: &'static str, row: usize, sum: f64 },

	/// A configuration value is outside its allowed range.
	#[error("invalid configuration: {0}")]
	InvalidConfig(String),

	/// A character has no index in the alphabet.
	#[error("character {0:?} is not part of the alphabet")]
	UnknownCharacter(char),

	#[error("I/O error: {0}")]
	Io(#[from] std::io::Error),

	#[error("encoding error: {0}")]
	Encoding(#[from] postcard::Error),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, HmmError>;
