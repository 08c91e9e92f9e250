use std::io::{Read, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use serde::Serialize;

use gitkv::{HistoryOptions, KeyVersion, Mode, RepoOptions, Repository};

#[derive(Parser)]
#[command(name = "gitkv", version, about = "Read and write keys in a git repository")]
struct Cli {
    #[command(flatten)]
    repo: RepoArgs,

    /// Increase log verbosity (-v info, -vv debug).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args)]
struct RepoArgs {
    /// Repository URL or path.
    #[arg(short, long, env = "GITKV_REPO", global = true)]
    repo: Option<String>,

    /// Branch to read from and push to.
    #[arg(short, long, env = "GITKV_BRANCH", global = true)]
    branch: Option<String>,

    /// Clone into this directory instead of a temporary one.
    #[arg(long, env = "GITKV_WORKDIR", global = true)]
    workdir: Option<PathBuf>,

    /// Create the local repository or the branch if missing.
    #[arg(long, global = true)]
    create: bool,

    #[arg(long, env = "GITKV_AUTHOR_NAME", global = true)]
    author: Option<String>,

    #[arg(long, env = "GITKV_AUTHOR_EMAIL", global = true)]
    email: Option<String>,
}

#[derive(Subcommand)]
enum Command {
    /// Print the value of a key.
    Cat { key: String },
    /// Set a key from a file or stdin.
    Put {
        key: String,
        /// Read the value from this file instead of stdin.
        #[arg(short, long)]
        file: Option<PathBuf>,
        /// Append instead of replacing.
        #[arg(short, long)]
        append: bool,
        #[arg(short, long)]
        message: Option<String>,
    },
    /// Remove a key.
    Rm {
        key: String,
        #[arg(short, long)]
        message: Option<String>,
    },
    /// Show the versions of a key.
    Log {
        key: String,
        #[arg(short = 'n', long)]
        limit: Option<usize>,
        /// Only commits whose message names the key.
        #[arg(long)]
        grep_key: bool,
        /// Emit JSON lines.
        #[arg(long)]
        json: bool,
    },
}

#[derive(Serialize)]
struct LogRow<'a> {
    commit: &'a str,
    blob: &'a str,
    time: String,
    size: usize,
    message: &'a str,
}

fn json_row(v: &KeyVersion, time: String) -> std::io::Result<String> {
    let row = LogRow {
        commit: &v.commit_hash,
        blob: &v.blob_hash,
        time,
        size: v.data.len(),
        message: &v.message,
    };
    serde_json::to_string(&row).map_err(std::io::Error::from)
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        _ => log::LevelFilter::Debug,
    };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .init();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("gitkv: {}", e);
            if let Some(stage) = e.stage() {
                eprintln!("gitkv: failed during {:?}", stage);
            }
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> gitkv::Result<()> {
    let location = cli
        .repo
        .repo
        .clone()
        .ok_or_else(|| gitkv::Error::invalid_path("no repository given (use --repo or GITKV_REPO)"))?;
    let defaults = RepoOptions::from_env();
    let options = RepoOptions {
        branch: cli.repo.branch.or(defaults.branch),
        workdir: cli.repo.workdir.or(defaults.workdir),
        create: cli.repo.create,
        author: cli.repo.author.or(defaults.author),
        email: cli.repo.email.or(defaults.email),
        message: None,
    };

    match cli.command {
        Command::Cat { key } => {
            let data = gitkv::open(&location, &key, Mode::Read, options, |f| f.read_all())?;
            std::io::stdout().write_all(&data)?;
        }
        Command::Put {
            key,
            file,
            append,
            message,
        } => {
            let data = match file {
                Some(path) => std::fs::read(&path).map_err(|e| gitkv::Error::io(&path, e))?,
                None => {
                    let mut data = Vec::new();
                    std::io::stdin().read_to_end(&mut data)?;
                    data
                }
            };
            let mode = if append { Mode::Append } else { Mode::Write };
            let mut repo = Repository::acquire(&location, RepoOptions { message, ..options })?;
            repo.with_file(&key, mode, |f| f.write_bytes(&data))?;
            print_report(repo.release()?);
        }
        Command::Rm { key, message } => {
            let mut repo = Repository::acquire(&location, RepoOptions { message, ..options })?;
            repo.remove(&key)?;
            print_report(repo.release()?);
        }
        Command::Log {
            key,
            limit,
            grep_key,
            json,
        } => {
            let repo = Repository::acquire(&location, options)?;
            let versions = repo.history(
                &key,
                HistoryOptions {
                    limit,
                    message_contains_key: grep_key,
                    ..Default::default()
                },
            )?;
            let mut out = std::io::stdout().lock();
            for v in &versions {
                let time = chrono::DateTime::from_timestamp(v.time as i64, 0)
                    .map(|t| t.to_rfc3339())
                    .unwrap_or_default();
                let subject = v.message.lines().next().unwrap_or_default();
                if json {
                    writeln!(out, "{}", json_row(v, time)?)?;
                } else {
                    writeln!(out, "{} {} {:>8}  {}", &v.commit_hash[..10], time, v.data.len(), subject)?;
                }
            }
        }
    }
    Ok(())
}

fn print_report(report: Option<gitkv::TransactionReport>) {
    match report {
        Some(r) => match r.commit_hash {
            Some(hash) if r.pushed => eprintln!("pushed {} ({} attempt(s))", hash, r.attempts),
            Some(hash) => eprintln!("committed {} (not pushed: no remote)", hash),
            None => eprintln!("no change"),
        },
        None => eprintln!("nothing to do"),
    }
}
