use anyhow::{bail, Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use viewership_etl::{
    init_tracing_once, load_providers, DayResult, LocalStore, ObjectStore, ReportDate, S3Credentials, S3Store,
    ViewershipETL,
};

/// Fetch provider viewership extracts and build daily merged reports.
#[derive(Parser, Debug)]
#[command(name = "viewership-etl", version, about)]
struct Cli {
    /// Store region
    #[arg(short = 'r', long, env = "VIEWERSHIP_REGION", required_unless_present = "store_dir")]
    region: Option<String>,

    /// Bucket holding the extracts
    #[arg(short = 'b', long, env = "VIEWERSHIP_BUCKET", required_unless_present = "store_dir")]
    bucket: Option<String>,

    #[arg(long, env = "AWS_ACCESS_KEY_ID", hide_env_values = true)]
    access_key_id: Option<String>,

    #[arg(long, env = "AWS_SECRET_ACCESS_KEY", hide_env_values = true)]
    secret_access_key: Option<String>,

    #[arg(long, env = "AWS_SESSION_TOKEN", hide_env_values = true)]
    session_token: Option<String>,

    /// S3-compatible endpoint URL (path-style addressing)
    #[arg(long)]
    endpoint: Option<String>,

    /// Serve keys from a local directory instead of the bucket
    #[arg(long)]
    store_dir: Option<PathBuf>,

    /// First reporting day (YYYYMMDD, YYYY-MM-DD or YYYY/MM/DD); defaults to today
    #[arg(long)]
    from: Option<ReportDate>,

    /// Last reporting day; defaults to today
    #[arg(long)]
    to: Option<ReportDate>,

    /// Provider list: one `code,name` row per provider
    #[arg(short = 'm', long, default_value = "mso-list.csv")]
    providers: PathBuf,

    #[arg(short = 'M', long, default_value_t = 3)]
    max_attempts: u32,

    #[arg(short = 'c', long, default_value_t = 10)]
    concurrency: usize,

    /// Later days' files scanned for each reporting day
    #[arg(short = 'd', long, default_value_t = 1)]
    days_after: u32,

    #[arg(short = 'v', long)]
    verbose: bool,

    #[arg(long, default_value = "./viewership_work")]
    work_dir: PathBuf,

    #[arg(long, default_value = ".")]
    out_dir: PathBuf,

    #[arg(long, default_value = "cdw-viewership-reports")]
    prefix: String,

    #[arg(long, default_value_t = 10)]
    retry_delay_secs: u64,

    /// Write the run summary as JSON
    #[arg(long)]
    summary: Option<PathBuf>,

    #[arg(long)]
    no_progress: bool,

    /// Verify canonical files after the run
    #[arg(long)]
    check: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing_once(cli.verbose);

    if cli.max_attempts == 0 {
        bail!("max attempts must be greater than zero");
    }
    if cli.concurrency == 0 {
        bail!("concurrency must be greater than zero");
    }
    if let (Some(from), Some(to)) = (cli.from, cli.to) {
        if from > to {
            bail!("--from {} is after --to {}", from.dashed(), to.dashed());
        }
    }

    let providers = load_providers(&cli.providers)?;
    let store: Box<dyn ObjectStore> = match (&cli.store_dir, &cli.region, &cli.bucket) {
        (Some(dir), _, _) => Box::new(LocalStore::new(dir)),
        (None, Some(region), Some(bucket)) => {
            let (Some(access_key_id), Some(secret_access_key)) = (cli.access_key_id.clone(), cli.secret_access_key.clone())
            else {
                bail!("bucket access needs AWS_ACCESS_KEY_ID and AWS_SECRET_ACCESS_KEY");
            };
            let creds = S3Credentials { access_key_id, secret_access_key, session_token: cli.session_token.clone() };
            let s3 = match &cli.endpoint {
                Some(url) => S3Store::with_endpoint(url, region, bucket, creds),
                None => S3Store::new(region, bucket, creds),
            };
            Box::new(s3.context("configure bucket access")?)
        }
        _ => bail!("either --store-dir or both --region and --bucket are required"),
    };

    let etl = ViewershipETL::new()
        .providers(providers)
        .date_range(cli.from, cli.to)
        .days_after(cli.days_after)
        .concurrency(cli.concurrency)
        .max_attempts(cli.max_attempts)
        .retry_delay(Duration::from_secs(cli.retry_delay_secs))
        .key_prefix(cli.prefix.clone())
        .work_dir(&cli.work_dir)
        .output_dir(&cli.out_dir)
        .progress(!cli.no_progress)
        .verbose(cli.verbose);

    let summary = etl.run(store.as_ref())?;

    if cli.check {
        let problems = etl.check_canonical_integrity()?;
        if problems.is_empty() {
            tracing::info!("All canonical files are readable and time-ordered.");
        } else {
            for (path, why) in &problems {
                tracing::warn!("Canonical file {} failed verification: {}", path.display(), why);
            }
        }
    }

    if let Some(path) = &cli.summary {
        summary.write_json(path)?;
        tracing::info!("Wrote run summary to {}", path.display());
    }

    let failed_days = summary.days.iter().filter(|d| matches!(d, DayResult::Failed { .. })).count();
    println!(
        "Fetched {} files ({} failed); {} of {} reports written",
        summary.fetched,
        summary.failed.len(),
        summary.days.len() - failed_days,
        summary.days.len()
    );
    Ok(())
}
