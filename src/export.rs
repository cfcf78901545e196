use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Subcommand};
use serde_json::json;

use crate::args::BaseArgs;
use crate::config::{self, Config};
use crate::interrupt::InterruptWatcher;
use crate::storage::http::ReductClient;
use crate::transfer::filter::{EntrySelector, LabelFilter};
use crate::transfer::path::BucketPath;
use crate::transfer::progress::{ProgressReporter, TransferSummary};
use crate::transfer::sink::FolderSink;
use crate::transfer::window::TimeWindow;
use crate::transfer::{self, TransferJob};
use crate::ui::{format_bytes, format_u64_commas, print_command_status, CommandStatus};
use crate::utils::pluralize;

#[derive(Debug, Clone, Args)]
pub struct ExportArgs {
    #[command(subcommand)]
    command: ExportCommand,
}

#[derive(Debug, Clone, Subcommand)]
enum ExportCommand {
    /// Export records of SRC bucket into DEST folder, one file per record.
    ///
    /// SRC has the format ALIAS/BUCKET_NAME. DEST gets a folder per entry;
    /// each record is written to <ENTRY>/<TIMESTAMP><EXT>.
    Folder(FolderArgs),
    /// Copy records of SRC bucket into DEST bucket.
    ///
    /// Both have the format ALIAS/BUCKET_NAME. A missing DEST bucket is
    /// created with the settings of SRC.
    Bucket(BucketArgs),
}

/// Selection flags shared by every transfer command.
#[derive(Debug, Clone, Args)]
pub struct SelectionArgs {
    /// Export records with timestamps newer than this time point, in ISO
    /// format or as a Unix timestamp in microseconds
    #[arg(long)]
    pub start: Option<String>,

    /// Export records with timestamps older than this time point, in ISO
    /// format or as a Unix timestamp in microseconds
    #[arg(long)]
    pub stop: Option<String>,

    /// Export only these entries, separated by comma. Glob patterns are allowed
    #[arg(short = 'e', long, default_value = "")]
    pub entries: String,

    /// Export only records with these labels, e.g. label1=value1,label2=value2
    #[arg(short = 'I', long, default_value = "")]
    pub include: String,

    /// Skip records with these labels, e.g. label1=value1,label2=value2
    #[arg(short = 'E', long, default_value = "")]
    pub exclude: String,

    /// Maximum number of records to export from each entry
    #[arg(short = 'l', long)]
    pub limit: Option<u64>,
}

impl SelectionArgs {
    /// Validate every flag before anything touches the network.
    pub fn job(&self, src: &str, base: &BaseArgs) -> Result<TransferJob> {
        let source: BucketPath = src.parse()?;
        Ok(TransferJob {
            source,
            window: TimeWindow::parse(self.start.as_deref(), self.stop.as_deref())?,
            entries: EntrySelector::parse(&self.entries)?,
            labels: LabelFilter::parse(&self.include, &self.exclude)?,
            parallel: base.parallel,
            timeout: base.request_timeout(),
            limit: self.limit,
        })
    }
}

#[derive(Debug, Clone, Args)]
pub struct FolderArgs {
    /// Source bucket, format: ALIAS/BUCKET_NAME
    src: String,

    /// Destination folder
    dest: PathBuf,

    #[command(flatten)]
    selection: SelectionArgs,

    /// Extension for exported files; guessed from the content type when not set
    #[arg(long)]
    ext: Option<String>,

    /// Write a JSON file with the metadata of each record next to it
    #[arg(long, overrides_with = "no_with_metadata")]
    with_metadata: bool,

    /// Do not write metadata files (default)
    #[arg(long, overrides_with = "with_metadata")]
    no_with_metadata: bool,
}

#[derive(Debug, Clone, Args)]
pub struct BucketArgs {
    /// Source bucket, format: ALIAS/BUCKET_NAME
    pub src: String,

    /// Destination bucket, format: ALIAS/BUCKET_NAME
    pub dest: String,

    #[command(flatten)]
    pub selection: SelectionArgs,
}

pub async fn run(base: BaseArgs, args: ExportArgs) -> Result<()> {
    match args.command {
        ExportCommand::Folder(folder) => run_folder(&base, folder).await,
        ExportCommand::Bucket(bucket) => run_bucket(&base, bucket).await,
    }
}

fn load_config(base: &BaseArgs) -> Result<Config> {
    config::load_file(&config::resolve_path(base.config.as_deref())?)
}

fn connect(base: &BaseArgs, config: &Config, alias: &str) -> Result<ReductClient> {
    ReductClient::new(config.alias(alias)?, base.request_timeout())
}

async fn run_folder(base: &BaseArgs, args: FolderArgs) -> Result<()> {
    let job = args.selection.job(&args.src, base)?;
    let config = load_config(base)?;
    let client = connect(base, &config, &job.source.alias)?;
    let sink = FolderSink::new(
        &args.dest,
        args.ext.as_deref(),
        args.with_metadata && !args.no_with_metadata,
    );

    let watcher = InterruptWatcher::install();
    let (progress, reporter) = ProgressReporter::new(!base.json).spawn();
    let result = transfer::export_to_folder(&client, &job, sink, watcher.token(), progress).await;
    let summary = reporter.finish().await?;
    result?;

    print_summary(base.json, &job, &args.dest.display().to_string(), &summary)
}

pub async fn run_bucket(base: &BaseArgs, args: BucketArgs) -> Result<()> {
    let job = args.selection.job(&args.src, base)?;
    let dest: BucketPath = args.dest.parse()?;
    let config = load_config(base)?;
    let source = connect(base, &config, &job.source.alias)?;
    let target = connect(base, &config, &dest.alias)?;

    let watcher = InterruptWatcher::install();
    let (progress, reporter) = ProgressReporter::new(!base.json).spawn();
    let result = transfer::export_to_bucket(
        &source,
        &target,
        &dest.bucket,
        &job,
        watcher.token(),
        progress,
    )
    .await;
    let summary = reporter.finish().await?;
    result?;

    print_summary(base.json, &job, &dest.to_string(), &summary)
}

fn print_summary(
    json_output: bool,
    job: &TransferJob,
    dest: &str,
    summary: &TransferSummary,
) -> Result<()> {
    let interrupted = summary.interrupted();
    if json_output {
        println!(
            "{}",
            serde_json::to_string_pretty(&json!({
                "status": if interrupted { "interrupted" } else { "completed" },
                "source": job.source.to_string(),
                "dest": dest,
                "records": summary.records(),
                "bytes": summary.bytes(),
                "resume_from": summary.resume_from(),
                "entries": summary.entries,
            }))?
        );
        return Ok(());
    }

    for entry in &summary.entries {
        println!("{}", entry.line());
    }

    let copied = format!(
        "{} {} ({})",
        format_u64_commas(summary.records()),
        pluralize(summary.records(), "record", None),
        format_bytes(summary.bytes() as f64)
    );
    if interrupted {
        print_command_status(
            CommandStatus::Warning,
            &format!("Transfer from {} to {dest} interrupted after {copied}", job.source),
        );
        match summary.resume_from() {
            Some(start) => eprintln!("  Resume: rerun the same command with --start {start}"),
            None => eprintln!("  Resume: rerun the same command"),
        }
    } else {
        print_command_status(
            CommandStatus::Success,
            &format!("Copied {copied} from {} to {dest}", job.source),
        );
    }
    Ok(())
}
