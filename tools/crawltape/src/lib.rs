pub mod capture;
pub mod catalog;
pub mod clean;
pub mod codec;
pub mod commands;
pub mod config;
pub mod encoding;
pub mod errors;
pub mod fixture;
pub mod logging;
pub mod pipeline;
pub mod replay;
pub mod sampling;
pub mod session;
pub mod store;
pub mod types;
pub mod validation;
pub mod worker;

use clap::{error::ErrorKind, Parser, Subcommand};
use commands::{ParseOptions, Project, Selection, UpdateOptions};
use errors::CrawltapeError;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Parser)]
#[command(name = "crawltape")]
#[command(about = "Record, inspect and replay callback fixtures of extraction workers")]
pub struct Cli {
    /// Project root; defaults to the nearest directory holding crawltape.toml.
    #[arg(long, global = true)]
    pub project: Option<PathBuf>,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Print a fixture as JSON with byte fields decoded.
    Inspect {
        worker: String,
        callback: String,
        /// `3`, `fixture3` or `fixture3.bin`.
        fixture: String,
    },
    /// Re-run callbacks and rewrite fixtures in the current format.
    Update {
        worker: String,
        #[arg(short, long)]
        callback: Option<String>,
        #[arg(short, long)]
        fixture: Option<String>,
        /// Fetch the recorded jobs again and capture into the same slots.
        #[arg(long, default_value_t = false)]
        dynamic: bool,
        /// Fetch the callback's `requests_to_add` into new slots.
        #[arg(long, default_value_t = false)]
        new: bool,
        /// Send the cookies set by the worker's homepage with fetched jobs.
        #[arg(long, default_value_t = false)]
        homepage: bool,
    },
    /// Fetch urls with a worker and print what its callbacks yield per depth.
    Parse {
        worker: String,
        /// Comma-separated urls.
        #[arg(value_delimiter = ',', required = true)]
        urls: Vec<String>,
        /// Callback to parse with instead of the default one.
        #[arg(short, long)]
        callback: Option<String>,
        #[arg(short, long, default_value_t = 1)]
        depth: usize,
        /// Extra job meta as a raw JSON object.
        #[arg(short, long)]
        meta: Option<String>,
        #[arg(long)]
        headers: Option<String>,
        #[arg(long)]
        cookies: Option<String>,
        /// `post` sends POST jobs; anything else is ignored.
        #[arg(long)]
        method: Option<String>,
        /// Run the project's pipeline stages around each callback.
        #[arg(long, default_value_t = false)]
        pipelines: bool,
        /// Let the worker's URL rules pick the callback.
        #[arg(short, long, default_value_t = false)]
        rules: bool,
        #[arg(long, default_value_t = false)]
        homepage: bool,
        #[arg(long, default_value_t = false)]
        noitems: bool,
        #[arg(long, default_value_t = false)]
        nolinks: bool,
        /// Print every depth level separately.
        #[arg(short, long, default_value_t = false)]
        verbose: bool,
    },
    /// Crawl from the worker's start jobs, sampling fixtures as they arrive.
    Crawl {
        worker: String,
        #[arg(short, long, default_value_t = 1)]
        depth: usize,
    },
    /// Create callback directories with a default config.toml.
    Establish {
        worker: String,
        #[arg(short, long)]
        callback: Option<String>,
    },
    /// Replay fixtures and report PASS/FAIL for each.
    Replay {
        worker: String,
        #[arg(short, long)]
        callback: Option<String>,
        #[arg(short, long)]
        fixture: Option<String>,
    },
}

pub fn run() -> Result<i32, CrawltapeError> {
    let args = std::env::args_os().collect::<Vec<_>>();
    let cwd = std::env::current_dir().map_err(|e| CrawltapeError::Io(e.to_string()))?;
    run_with(&args, &cwd, |project| project)
}

/// Run the command line against a project the embedding application fills
/// in with its workers, rules, stages and fetcher.
pub fn run_with(
    args: &[OsString],
    cwd: &Path,
    configure: impl FnOnce(Project) -> Project,
) -> Result<i32, CrawltapeError> {
    let cli = match Cli::try_parse_from(args) {
        Ok(cli) => cli,
        Err(error) => match error.kind() {
            ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => {
                print!("{error}");
                return Ok(0);
            }
            _ => return Err(CrawltapeError::Cli(error.to_string())),
        },
    };

    let root = match &cli.project {
        Some(root) => root.clone(),
        None => Project::discover(cwd)?,
    };
    let project = configure(Project::open(root)?);
    tracing::debug!(root = %project.root.display(), "project opened");

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    match cli.command {
        Command::Inspect {
            worker,
            callback,
            fixture,
        } => commands::inspect(
            &project,
            &Selection::new(worker)
                .callback(Some(callback))
                .fixture(Some(fixture)),
            &mut out,
        ),
        Command::Update {
            worker,
            callback,
            fixture,
            dynamic,
            new,
            homepage,
        } => commands::update(
            &project,
            &Selection::new(worker).callback(callback).fixture(fixture),
            UpdateOptions {
                dynamic,
                new,
                homepage,
            },
            &mut out,
        ),
        Command::Parse {
            worker,
            urls,
            callback,
            depth,
            meta,
            headers,
            cookies,
            method,
            pipelines,
            rules,
            homepage,
            noitems,
            nolinks,
            verbose,
        } => commands::parse(
            &project,
            &worker,
            &ParseOptions {
                urls,
                callback,
                depth,
                meta,
                headers,
                cookies,
                method,
                pipelines,
                rules,
                homepage,
                noitems,
                nolinks,
                verbose,
            },
            &mut out,
        ),
        Command::Crawl { worker, depth } => commands::crawl(&project, &worker, depth, &mut out),
        Command::Establish { worker, callback } => {
            commands::establish(&project, &worker, callback.as_deref(), &mut out)
        }
        Command::Replay {
            worker,
            callback,
            fixture,
        } => commands::replay(
            &project,
            &Selection::new(worker).callback(callback).fixture(fixture),
            &mut out,
        ),
    }
}
