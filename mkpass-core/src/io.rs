use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::{env, fs, io};

use crate::error::Result;
use crate::model::generator::{GeneratorRecord, PasswordGenerator};

/// Reads a dictionary file and returns its whitespace-separated words.
pub fn read_words<P: AsRef<Path>>(filename: P) -> io::Result<Vec<String>> {
	let mut contents = String::new();
	File::open(filename)?.read_to_string(&mut contents)?;
	Ok(contents.split_whitespace().map(str::to_owned).collect())
}

/// Writes a trained generator to `path` (postcard encoding).
pub fn save_generator<P: AsRef<Path>>(generator: &PasswordGenerator, path: P) -> Result<()> {
	let bytes = postcard::to_stdvec(&generator.to_record())?;
	fs::write(path, bytes)?;
	Ok(())
}

/// Reads a generator written by [`save_generator`].
///
/// Every model invariant is checked again after decoding.
pub fn load_generator<P: AsRef<Path>>(path: P) -> Result<PasswordGenerator> {
	let bytes = fs::read(path)?;
	let record: GeneratorRecord = postcard::from_bytes(&bytes)?;
	PasswordGenerator::from_record(record)
}

/// Model name of a file: its name with only the last extension removed,
/// so `data/english.bin` is `english` and `a.bin.bin` is `a.bin`.
pub fn get_filename<P: AsRef<Path>>(input_path: P) -> io::Result<String> {
	let stem = input_path
		.as_ref()
		.file_stem()
		.ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "Path has no filename"))?;

	Ok(stem.to_string_lossy().to_string())
}

/// Normalize a folder path.
///
/// - `"."` or `"./"` resolves to the current working directory
/// - Other paths are returned as-is (not canonicalized)
pub fn normalize_folder(input: &str) -> PathBuf {
	if input == "." || input == "./" {
		env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
	} else {
		PathBuf::from(input)
	}
}

/// Lists all files with a given extension in a directory, sorted by name.
///
/// Returns file names only (no paths).
pub fn list_files<P: AsRef<Path>>(dir: P, extension: &str) -> io::Result<Vec<String>> {
	let mut files = Vec::new();

	for entry in fs::read_dir(dir)? {
		let path = entry?.path();
		if path.is_file() && path.extension() == Some(std::ffi::OsStr::new(extension)) {
			if let Some(name) = path.file_name() {
				files.push(name.to_string_lossy().to_string());
			}
		}
	}

	files.sort();
	Ok(files)
}
