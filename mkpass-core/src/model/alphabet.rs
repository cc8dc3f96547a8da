use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{HmmError, Result};

/// Bijection between characters and symbol indices.
///
/// Characters are lowercased and numbered in order of first appearance.
///
/// # Invariants
/// - `chars[index[c]] == c` for every known character
/// - No uppercase character is ever stored
///
/// Serialized as the bare character list; the reverse index is rebuilt on
/// deserialization.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(from = "Vec<char>", into = "Vec<char>")]
pub struct Alphabet {
	chars: Vec<char>,
	index: HashMap<char, usize>,
}

impl Alphabet {
	/// Builds an alphabet from every character of `words`.
	pub fn from_words<I, S>(words: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: AsRef<str>,
	{
		let mut alphabet = Self::default();
		for word in words {
			for c in word.as_ref().chars().flat_map(char::to_lowercase) {
				alphabet.insert(c);
			}
		}
		alphabet
	}

	fn insert(&mut self, c: char) {
		if !self.index.contains_key(&c) {
			self.index.insert(c, self.chars.len());
			self.chars.push(c);
		}
	}

	/// Number of symbols (M).
	pub fn len(&self) -> usize {
		self.chars.len()
	}

	pub fn is_empty(&self) -> bool {
		self.chars.is_empty()
	}

	/// Characters ordered by symbol index.
	pub fn chars(&self) -> &[char] {
		&self.chars
	}

	/// Maps a word to symbols, lowercasing it first.
	///
	/// # Errors
	/// Returns `UnknownCharacter` for a character never seen while building.
	pub fn encode(&self, word: &str) -> Result<Vec<usize>> {
		word.chars()
			.flat_map(char::to_lowercase)
			.map(|c| self.index.get(&c).copied().ok_or(HmmError::UnknownCharacter(c)))
			.collect()
	}

	/// Maps symbols back to a string.
	///
	/// # Errors
	/// Returns `SymbolOutOfRange` for an index outside the alphabet.
	pub fn decode(&self, symbols: &[usize]) -> Result<String> {
		symbols
			.iter()
			.enumerate()
			.map(|(position, &symbol)| {
				self.chars.get(symbol).copied().ok_or(HmmError::SymbolOutOfRange {
					symbol,
					position,
					n_symbols: self.chars.len(),
				})
			})
			.collect()
	}
}

impl From<Vec<char>> for Alphabet {
	fn from(chars: Vec<char>) -> Self {
		let mut alphabet = Self::default();
		for c in chars {
			alphabet.insert(c);
		}
		alphabet
	}
}

impl From<Alphabet> for Vec<char> {
	fn from(alphabet: Alphabet) -> Self {
		alphabet.chars
	}
}
