use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::corpus::{DEFAULT_PERSIST_THRESHOLD, DEFAULT_SIMILARITY_THRESHOLD};

#[derive(Parser, Debug)]
#[command(
    name = "examforge",
    version,
    about = "Recovery and validation tooling for generated exam problems"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    Recover(RecoverArgs),
    Verify(VerifyArgs),
    Status(StatusArgs),
}

#[derive(Args, Debug, Clone)]
pub struct RecoverArgs {
    #[arg(long, default_value = ".cache/examforge")]
    pub cache_root: PathBuf,

    #[arg(long)]
    pub db_path: Option<PathBuf>,

    /// Raw model output to recover; reads stdin when omitted.
    #[arg(long)]
    pub input: Option<PathBuf>,

    /// Write the recovered record here instead of stdout.
    #[arg(long)]
    pub output: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = ProblemKind::MultipleChoice)]
    pub problem_type: ProblemKind,

    #[arg(long, default_value_t = 5)]
    pub choice_count: usize,

    #[arg(long)]
    pub topic: Option<String>,

    #[arg(long)]
    pub difficulty: Option<String>,

    #[arg(long)]
    pub points: Option<u32>,

    #[arg(long, default_value_t = DEFAULT_SIMILARITY_THRESHOLD)]
    pub similarity_threshold: f64,

    #[arg(long, default_value_t = DEFAULT_PERSIST_THRESHOLD)]
    pub persist_threshold: f64,

    #[arg(long, default_value_t = false)]
    pub skip_verify: bool,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum ProblemKind {
    MultipleChoice,
    ShortAnswer,
}

#[derive(Args, Debug, Clone)]
pub struct VerifyArgs {
    #[arg(long, value_enum)]
    pub kind: ClaimKind,

    /// The equation, function, or integrand under test.
    #[arg(long)]
    pub expression: String,

    /// The claimed solution, derivative, antiderivative, or limit.
    #[arg(long)]
    pub claimed: String,

    /// Approach point for limit claims.
    #[arg(long)]
    pub point: Option<String>,

    /// Lower integration bound; with --upper, the integral is definite.
    #[arg(long)]
    pub lower: Option<String>,

    #[arg(long)]
    pub upper: Option<String>,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum ClaimKind {
    Equation,
    Derivative,
    Integral,
    Limit,
}

impl ClaimKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Equation => "equation",
            Self::Derivative => "derivative",
            Self::Integral => "integral",
            Self::Limit => "limit",
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct StatusArgs {
    #[arg(long, default_value = ".cache/examforge")]
    pub cache_root: PathBuf,

    #[arg(long)]
    pub db_path: Option<PathBuf>,
}
