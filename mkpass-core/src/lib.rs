//! Hidden Markov Model based word generation library.
//!
//! This crate provides everything needed to learn pronounceable words from a
//! dictionary and sample new ones:
//! - Discrete-output HMM parameters with validated snapshots
//! - Forward-backward lattices with underflow rescaling
//! - Baum-Welch training, parallel over the corpus
//! - Seedable ancestral sampling
//! - A character codec and a password generator wrapping the above
//!
//! The numeric core lives in [`model`]; persistence helpers live in [`io`].

/// Error type and result alias.
pub mod error;

/// HMM parameters, inference, training and sampling.
pub mod model;

/// I/O utilities (dictionary loading, model files, path helpers).
pub mod io;

pub use error::{HmmError, Result};
