//! Train HMM word models and generate pronounceable passwords
//!
//! Usage:
//!   mkpass train words.txt english.bin -n 64 -i 8
//!   mkpass generate english.bin -c 6 -p 5

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use log::{info, warn, LevelFilter};
use mkpass_core::io::{load_generator, read_words, save_generator};
use mkpass_core::model::generator::{GeneratorConfig, PasswordGenerator};
use mkpass_core::model::trainer::TrainConfig;

#[derive(Parser, Debug)]
#[command(author, version, about = "Create pronounceable passwords with a hidden Markov model")]
struct Cli {
    /// Print extra information (repeat for more)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Train a model from a dictionary file
    Train(TrainArgs),
    /// Generate words from a trained model
    Generate(GenerateArgs),
    /// Print the log-likelihood of words under a trained model
    Score(ScoreArgs),
}

#[derive(Args, Debug)]
struct TrainArgs {
    /// A dictionary file to model words on
    dictionary: PathBuf,

    /// A file to output the model to
    model: PathBuf,

    /// The number of hidden states
    #[arg(short = 'n', long, default_value = "256")]
    states: usize,

    /// The number of training iterations
    #[arg(short, long, default_value = "4")]
    iterations: usize,

    /// Seed for initialisation and training noise
    #[arg(long)]
    seed: Option<u64>,

    /// Number of worker threads (defaults to one per CPU)
    #[arg(long)]
    threads: Option<usize>,

    /// Uniform noise added to the parameters after each iteration
    #[arg(long, default_value = "0.0")]
    noise: f64,

    /// Stop once the log-likelihood improves by less than this
    #[arg(long)]
    tolerance: Option<f64>,

    /// Always start in state 0 instead of learning an initial distribution
    #[arg(long)]
    fixed_start: bool,
}

#[derive(Args, Debug)]
struct GenerateArgs {
    /// A file with the trained model
    model: PathBuf,

    /// Number of characters per word
    #[arg(short, long, default_value = "6")]
    chars: usize,

    /// Number of words to output
    #[arg(short, long, default_value = "5")]
    passwords: usize,

    /// Seed for reproducible output
    #[arg(long)]
    seed: Option<u64>,
}

#[derive(Args, Debug)]
struct ScoreArgs {
    /// A file with the trained model
    model: PathBuf,

    /// Words to score
    #[arg(required = true)]
    words: Vec<String>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    env_logger::Builder::new().filter_level(level).parse_default_env().init();

    match cli.command {
        Command::Train(args) => train(args),
        Command::Generate(args) => generate(args),
        Command::Score(args) => score(args),
    }
}

fn train(args: TrainArgs) -> Result<()> {
    let words = read_words(&args.dictionary)
        .with_context(|| format!("Failed to read dictionary {}", args.dictionary.display()))?;
    if words.is_empty() {
        bail!("No words in dictionary {}", args.dictionary.display());
    }

    let mut train_config = TrainConfig::default();
    train_config.threads = args.threads;
    train_config.tolerance = args.tolerance;
    train_config.set_noise(args.noise)?;

    let config = GeneratorConfig {
        states: args.states,
        iterations: args.iterations,
        seed: args.seed,
        fixed_start: args.fixed_start,
        train: train_config,
    };

    let (generator, report) = PasswordGenerator::train(&words, &config)?;
    if !report.degenerate.is_empty() {
        warn!("{} degenerate sequence(s) were skipped during training", report.degenerate.len());
    }
    if let Some(ll) = report.log_likelihoods.last() {
        info!("Final log-likelihood: {:.4} after {} iteration(s)", ll, report.iterations);
    }

    save_generator(&generator, &args.model)
        .with_context(|| format!("Failed to write model {}", args.model.display()))?;
    println!(
        "Model with {} states over {} characters written to {}",
        generator.hmm().n_states(),
        generator.alphabet().len(),
        args.model.display()
    );
    Ok(())
}

fn generate(args: GenerateArgs) -> Result<()> {
    let generator = load_generator(&args.model)
        .with_context(|| format!("Failed to load model {}", args.model.display()))?;

    for word in generator.generate_many(args.passwords, args.chars, args.seed)? {
        println!("{}", word);
    }
    Ok(())
}

fn score(args: ScoreArgs) -> Result<()> {
    let generator = load_generator(&args.model)
        .with_context(|| format!("Failed to load model {}", args.model.display()))?;

    for word in &args.words {
        match generator.score(word) {
            Ok(ll) => println!("{}\t{:.4}", word, ll),
            Err(e) => println!("{}\t{}", word, e),
        }
    }
    Ok(())
}
