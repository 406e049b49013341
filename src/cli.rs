use std::error::Error;
use std::fs;
use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand, error::ErrorKind};
use serde_json::Value;

use crate::config::{LockConfig, RetryPolicy, StoreTarget, SyncConfig, WriteMode};
use crate::constants::store::{DEFAULT_SHEET, DEFAULT_STORE_ID, DEFAULT_STORE_PATH};
use crate::constants::lock::DEFAULT_LOCK_DIR;
use crate::data::{Record, WriteStats};
use crate::dates::DateFieldSet;
use crate::errors::SyncError;
use crate::store::FileGridStore;
use crate::sync::Synchronizer;

#[derive(Debug, Parser)]
#[command(
    name = "tabsync",
    version,
    disable_help_subcommand = true,
    about = "Reconcile JSON record batches into a tabular store",
    after_help = "Set RUST_LOG (for example RUST_LOG=tabsync=debug) to adjust log output on stderr."
)]
struct TabsyncCli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Apply one batch to the store.
    Sync(SyncArgs),
}

#[derive(Debug, Args)]
struct SyncArgs {
    #[arg(value_name = "INPUT", help = "JSON file holding an array of record objects")]
    input: PathBuf,
    #[arg(long, help = "Report what would change without writing or locking")]
    dry_run: bool,
    #[arg(long, help = "Replace the whole store instead of updating date partitions")]
    full_refresh: bool,
    #[arg(
        long,
        value_name = "PATH",
        default_value = DEFAULT_STORE_PATH,
        help = "Local store document to read and write"
    )]
    store_path: PathBuf,
    #[arg(
        long,
        value_name = "ID",
        default_value = DEFAULT_STORE_ID,
        help = "Store identifier used in lock names and logs"
    )]
    store_id: String,
    #[arg(
        long,
        value_name = "NAME",
        default_value = DEFAULT_SHEET,
        help = "Partition (sheet) name inside the store"
    )]
    sheet: String,
    #[arg(
        long = "date-field",
        value_name = "NAME",
        help = "Field treated as a date, repeat in priority order (replaces the defaults)"
    )]
    date_fields: Vec<String>,
    #[arg(
        long,
        value_name = "DIR",
        default_value = DEFAULT_LOCK_DIR,
        help = "Directory holding lock files"
    )]
    lock_dir: PathBuf,
    #[arg(long, value_name = "N", help = "Retries per store call after the first attempt")]
    max_retries: Option<u32>,
}

impl SyncArgs {
    fn to_config(&self) -> SyncConfig {
        let defaults = SyncConfig::default();
        SyncConfig {
            target: StoreTarget {
                store_id: self.store_id.clone(),
                sheet: self.sheet.clone(),
            },
            mode: if self.full_refresh {
                WriteMode::FullRefresh
            } else {
                WriteMode::Incremental
            },
            dry_run: self.dry_run,
            date_fields: if self.date_fields.is_empty() {
                DateFieldSet::default()
            } else {
                DateFieldSet::from_names(&self.date_fields)
            },
            retry: RetryPolicy {
                max_retries: self.max_retries.unwrap_or(defaults.retry.max_retries),
                ..defaults.retry
            },
            lock: LockConfig {
                dir: self.lock_dir.clone(),
                ..defaults.lock.clone()
            },
            ..defaults
        }
    }
}

/// Read a batch file: a JSON array whose elements are all objects.
pub fn load_batch(path: &Path) -> Result<Vec<Record>, SyncError> {
    let bytes = fs::read(path)?;
    let value: Value = serde_json::from_slice(&bytes)?;
    let Value::Array(items) = value else {
        return Err(SyncError::InvalidBatch(format!(
            "{} must contain a JSON array of objects",
            path.display()
        )));
    };
    items
        .into_iter()
        .enumerate()
        .map(|(idx, item)| match item {
            Value::Object(record) => Ok(record),
            other => Err(SyncError::InvalidBatch(format!(
                "element {idx} of {} is not an object: {other}",
                path.display()
            ))),
        })
        .collect()
}

/// Parse `args_iter` (without the program name) and run the command.
///
/// Returns `Ok(None)` when clap printed help or version instead.
pub fn execute<I>(args_iter: I) -> Result<Option<WriteStats>, Box<dyn Error>>
where
    I: Iterator<Item = String>,
{
    let Some(cli) =
        parse_cli::<TabsyncCli, _>(std::iter::once("tabsync".to_string()).chain(args_iter))?
    else {
        return Ok(None);
    };

    match cli.command {
        Command::Sync(args) => {
            let records = load_batch(&args.input)?;
            let synchronizer = Synchronizer::new(args.to_config())?;
            let store = FileGridStore::open(&args.store_path)?;
            let stats = synchronizer.run(&store, &records)?;
            Ok(Some(stats))
        }
    }
}

/// Run the CLI and print the resulting statistics as JSON on stdout.
pub fn run<I>(args_iter: I) -> Result<(), Box<dyn Error>>
where
    I: Iterator<Item = String>,
{
    if let Some(stats) = execute(args_iter)? {
        println!("{}", serde_json::to_string_pretty(&stats)?);
    }
    Ok(())
}

fn parse_cli<T, I>(args: I) -> Result<Option<T>, Box<dyn Error>>
where
    T: Parser,
    I: IntoIterator,
    I::Item: Into<std::ffi::OsString> + Clone,
{
    match T::try_parse_from(args) {
        Ok(cli) => Ok(Some(cli)),
        Err(err) => match err.kind() {
            ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => {
                err.print()?;
                Ok(None)
            }
            _ => Err(err.into()),
        },
    }
}
