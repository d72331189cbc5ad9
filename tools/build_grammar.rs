use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::Parser;
use tmgrammar::build::{BuildOptions, SourceRevision, Target, build};

#[derive(Parser)]
#[command(name = "tmgrammar-build")]
#[command(about = "Packages a grammar source as a plist, JSON or CSON artifact")]
struct Args {
    /// Which artifact to produce
    #[arg(value_enum)]
    target: Target,
    /// Grammar source (YAML, JSON or property list)
    #[arg(long, default_value = "src/fixtures/grammars/csharp.tmLanguage.yml")]
    input: PathBuf,
    /// Directory the artifact is written to, created if missing
    #[arg(long, default_value = "grammars")]
    out_dir: PathBuf,
    /// Repository the source lives in, recorded in the JSON artifact
    #[arg(long, default_value = "github.com/dotnet/csharp-tmLanguage")]
    repository: String,
    /// Full commit sha recorded in the JSON artifact, read with git if not given
    #[arg(long)]
    commit: Option<String>,
}

fn revision(args: &Args) -> tmgrammar::TmResult<SourceRevision> {
    match &args.commit {
        Some(commit) => SourceRevision::new(&args.repository, commit),
        None => {
            let dir = args
                .input
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or(Path::new("."));
            SourceRevision::from_git(&args.repository, dir)
        }
    }
}

fn run(args: &Args) -> tmgrammar::TmResult<PathBuf> {
    let mut options = BuildOptions::new(&args.out_dir);
    if args.target == Target::Json {
        options = options.revision(revision(args)?);
    }
    build(&args.input, args.target, &options)
}

fn main() -> ExitCode {
    env_logger::init();
    let args = Args::parse();

    match run(&args) {
        Ok(path) => {
            println!("Wrote {}", path.display());
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}
