//! Top-level module for the hidden Markov model system.
//!
//! Components, leaves first:
//! - Model parameters and snapshots (`Hmm`, `HmmSnapshot`)
//! - Forward and backward tables (`Lattice`)
//! - Baum-Welch training (`BaumWelch`)
//! - Ancestral sampling (`Sampler`)
//! - Character codec and high-level generator (`Alphabet`, `PasswordGenerator`)

/// Transition, emission and initial-state parameters.
///
/// Owns the normalisation invariants; only the trainer mutates it.
pub mod params;

/// Forward-backward dynamic programming over the state lattice.
pub mod lattice;

/// Baum-Welch expectation-maximisation.
///
/// Runs the E-step in parallel over chunks of the corpus and
/// re-estimates parameters from the summed expectations.
pub mod trainer;

/// Seedable ancestral sampling of symbol sequences.
pub mod sampler;

/// Bijection between lowercase characters and symbol indices.
pub mod alphabet;

/// High-level interface training a model from words and generating new ones.
pub mod generator;
