/* 📖 # What does the pathway CLI do?

A thin shell over the path runtime, mostly useful for poking at how strings resolve:

- `pathway stat <path>` prints the resolved url and what the backend reports
- `pathway cat <path>` copies a local, memory or http resource to stdout
- `pathway ls <path>` lists a directory
- `pathway find <dir> <glob>...` walks a local directory
- `pathway watch <path>...` polls paths and reports changes until interrupted

Relative paths resolve against the working directory. `--config` points at a TOML file with
the runtime settings; without it the defaults apply.

Exit codes:
- 0: Success
- 1: Error (bad config, unresolvable path or failed I/O)
*/

use std::io;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};

use pathway_base::PathwayResult;
use pathway_base::tracing::{debug, info, init_tracing};
use pathway_vfs::{Dependency, Path, VfsConfig, VfsRuntime, load_config};

#[derive(Parser)]
#[clap(name = "pathway", about = "Resolve and inspect virtual paths.", version)]
struct Cli {
    /// Runtime configuration file
    #[clap(long, global = true)]
    config: Option<PathBuf>,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print resolution and stat information
    Stat { path: String },
    /// Write the content of a path to stdout
    Cat { path: String },
    /// List the entries of a directory
    Ls { path: String },
    /// Print local files below a directory matching any of the globs
    Find {
        dir: String,
        #[clap(required = true)]
        globs: Vec<String>,
    },
    /// Report when any of the paths changes
    Watch {
        #[clap(required = true)]
        paths: Vec<String>,
        /// Polling interval
        #[clap(long, default_value_t = 1000)]
        interval_ms: u64,
        /// Also compare content digests
        #[clap(long)]
        digest: bool,
    },
}

fn main() {
    if let Err(e) = init_tracing() {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => load_config(path),
        None => Ok(VfsConfig::default()),
    };
    let runtime = match config.and_then(VfsRuntime::new) {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Error: Failed to set up path runtime: {}", e);
            process::exit(1);
        }
    };

    let result = match cli.command {
        Command::Stat { path } => stat(&runtime, &path),
        Command::Cat { path } => cat(&runtime, &path),
        Command::Ls { path } => ls(&runtime, &path),
        Command::Find { dir, globs } => find(&runtime, &dir, &globs),
        Command::Watch {
            paths,
            interval_ms,
            digest,
        } => watch(&runtime, &paths, Duration::from_millis(interval_ms), digest),
    };
    if let Err(e) = result {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

fn stat(runtime: &VfsRuntime, user_path: &str) -> PathwayResult<()> {
    let path = runtime.lookup(user_path)?;
    let stat = path.stat()?;
    println!("url:       {}", path.url());
    println!("native:    {}", path.native_path().display());
    println!("type:      {:?}", stat.file_type);
    println!("length:    {}", stat.length);
    let modified = stat
        .modified
        .map(|time| DateTime::<Utc>::from(time).to_rfc3339());
    println!("modified:  {}", modified.as_deref().unwrap_or("-"));
    println!("readable:  {}", stat.readable);
    println!("writable:  {}", stat.writable);
    if let Some(digest) = path.digest() {
        println!("sha256:    {}", digest);
    }
    Ok(())
}

fn cat(runtime: &VfsRuntime, user_path: &str) -> PathwayResult<()> {
    let path = runtime.lookup(user_path)?;
    let mut stream = path.open_read()?;
    let copied = stream.copy_to(&mut io::stdout().lock())?;
    stream.close()?;
    debug!(path = %path, bytes = copied, "copied to stdout");
    Ok(())
}

fn ls(runtime: &VfsRuntime, user_path: &str) -> PathwayResult<()> {
    let dir = runtime.lookup(user_path)?;
    for name in dir.list()? {
        let marker = if dir.lookup(&name)?.is_directory() {
            "/"
        } else {
            ""
        };
        println!("{}{}", name, marker);
    }
    Ok(())
}

fn find(runtime: &VfsRuntime, user_path: &str, globs: &[String]) -> PathwayResult<()> {
    let dir = runtime.lookup(user_path)?;
    let mut count = 0;
    for path in dir.walk(globs)? {
        println!("{}", path?.native_path().display());
        count += 1;
    }
    debug!(count, "walk finished");
    Ok(())
}

fn watch(
    runtime: &VfsRuntime,
    user_paths: &[String],
    interval: Duration,
    digest: bool,
) -> PathwayResult<()> {
    let container = runtime.dependency_container();
    container.set_check_interval(0);
    let paths = user_paths
        .iter()
        .map(|user_path| runtime.lookup(user_path))
        .collect::<PathwayResult<Vec<Path>>>()?;
    for path in &paths {
        let dependency = if digest {
            path.create_digest_dependency()
        } else {
            path.create_optional_dependency()
        };
        container.add(Arc::new(dependency));
    }
    info!(paths = paths.len(), interval_ms = interval.as_millis() as u64, "watching");
    loop {
        if container.log_modified() {
            println!("{} changed", container.describe());
            container.clear_modified();
        }
        thread::sleep(interval);
    }
}
