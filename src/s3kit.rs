use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use console::style;
use futures::stream::{self, StreamExt};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use serde::Serialize;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{error, info};

use s3template::StorageConfig;
use s3template::s3::{CorsRule, HttpMethod, ListRequest, S3Template, parse_metadata};

#[derive(Parser, Debug)]
#[command(
    name = "s3kit",
    version = env!("CARGO_PKG_VERSION"),
    about = "Everyday bucket and object chores against any S3-compatible service",
    long_about = "Creates, lists and removes buckets, uploads files with generated \
                  date-partitioned keys, and hands out presigned URLs. Configure via .env or \
                  environment variables.",
    after_help = "Examples:\n  \
                  s3kit upload ./report.pdf --dir reports   # Upload with a generated key\n  \
                  s3kit upload ./big.iso --mode managed     # Concurrent multipart upload\n  \
                  s3kit ls uploads/2024/                    # List one page of objects\n  \
                  s3kit presign /uploads/2024/01/02/x-a.png --put --expires 600\n\n\
                  Configuration (.env):\n  \
                  S3_ENDPOINT=http://127.0.0.1:9000\n  \
                  S3_ACCESS_KEY=minioadmin\n  \
                  S3_SECRET_KEY=minioadmin\n  \
                  S3_BUCKET=media"
)]
struct Cli {
    /// Bucket to operate on instead of S3_BUCKET
    #[arg(long, short = 'b', global = true)]
    bucket: Option<String>,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List all buckets
    Buckets,
    /// Create a bucket
    Mb { name: String },
    /// Delete a bucket with every object and version in it
    Rb {
        name: String,
        /// Skip the confirmation prompt
        #[arg(long)]
        force: bool,
    },
    /// List objects
    Ls {
        /// Key prefix
        #[arg(default_value = "")]
        prefix: String,
        /// Use the V1 (marker based) listing
        #[arg(long)]
        v1: bool,
        /// Follow every page instead of printing only the first
        #[arg(long)]
        all: bool,
        /// Page size
        #[arg(long, default_value = "1000")]
        max_keys: i32,
    },
    /// Store a string as a new object
    PutText {
        name: String,
        content: String,
        /// Remote directory for the generated key
        #[arg(long)]
        dir: Option<String>,
    },
    /// Upload one or more files with generated keys
    Upload {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
        #[arg(long, value_enum, default_value = "simple")]
        mode: UploadMode,
        /// Remote directory for the generated keys
        #[arg(long)]
        dir: Option<String>,
        /// Custom metadata (key=value pairs, comma-separated)
        #[arg(long)]
        metadata: Option<String>,
        /// Override Content-Type for uploaded files
        #[arg(long)]
        content_type: Option<String>,
        /// Maximum number of files uploaded at once
        #[arg(long, short = 'c', default_value = "4")]
        max_concurrent: usize,
    },
    /// Download an object
    Get {
        key: String,
        /// Write to this file instead of stdout
        #[arg(long, short = 'o')]
        output: Option<PathBuf>,
    },
    /// Copy an object
    Cp {
        src_key: String,
        /// Destination key, defaults to the source key
        dest_key: Option<String>,
        /// Destination bucket, defaults to the source bucket
        #[arg(long)]
        to_bucket: Option<String>,
    },
    /// Delete objects
    Rm {
        #[arg(required = true)]
        keys: Vec<String>,
        /// Delete a single version of one key
        #[arg(long, conflicts_with = "batch")]
        version_id: Option<String>,
        /// Delete all keys in one request (versioned buckets only)
        #[arg(long)]
        batch: bool,
    },
    /// Generate a presigned URL
    Presign {
        key: String,
        /// Sign an upload (PUT) instead of a download
        #[arg(long)]
        put: bool,
        /// Validity in seconds (max 7 days)
        #[arg(long, default_value = "1800")]
        expires: u64,
    },
    /// Print the URL of an object in the default bucket
    Url { key: String },
    /// Show, set or delete the bucket CORS rules
    Cors {
        /// Apply a permissive rule
        #[arg(long, conflicts_with = "delete")]
        set: bool,
        #[arg(long)]
        delete: bool,
    },
    /// Show or delete the bucket policy
    Policy {
        #[arg(long)]
        delete: bool,
    },
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
enum UploadMode {
    /// One PUT per file
    Simple,
    /// Sequential 5 MiB parts
    Multipart,
    /// Single PUT or concurrent parts depending on size
    Managed,
}

#[derive(Debug, Serialize)]
struct UploadOutcome {
    path: String,
    key: Option<String>,
    error: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file early to get LOG_LEVEL
    dotenv::dotenv().ok();

    let log_level = std::env::var("LOG_LEVEL")
        .ok()
        .or_else(|| std::env::var("RUST_LOG").ok())
        .unwrap_or_else(|| "info".to_string());

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .or_else(|_| tracing_subscriber::EnvFilter::try_new(&log_level))
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_level(true)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let config = StorageConfig::from_env()?;
    let s3 = S3Template::connect(config)
        .await
        .map_err(|e| anyhow::anyhow!(e.user_message()))
        .context("connecting to object storage")?;

    let bucket = cli
        .bucket
        .clone()
        .unwrap_or_else(|| s3.default_bucket_name().to_string());

    run(&s3, &bucket, cli.json, cli.command).await
}

async fn run(s3: &S3Template, bucket: &str, json: bool, command: Command) -> Result<()> {
    match command {
        Command::Buckets => {
            let buckets = s3.list_buckets().await?;
            if json {
                return print_json(&buckets);
            }
            for b in buckets {
                let created = b
                    .creation_date
                    .map(|d| d.format("%Y-%m-%d %H:%M:%S").to_string())
                    .unwrap_or_default();
                println!("{:<20} {}", style(created).dim(), style(&b.name).cyan());
            }
        }
        Command::Mb { name } => {
            let created = s3.create_bucket(&name).await?;
            if json {
                return print_json(&created);
            }
            println!("{} bucket {}", style("✓").green(), style(name.to_lowercase()).cyan());
        }
        Command::Rb { name, force } => {
            if !force && !confirm(&format!("Delete bucket {} and everything in it?", name))? {
                println!("{}", style("Aborted").yellow());
                return Ok(());
            }
            s3.delete_bucket(&name).await?;
            println!("{} removed bucket {}", style("✓").green(), style(&name).cyan());
        }
        Command::Ls {
            prefix,
            v1,
            all,
            max_keys,
        } => {
            let objects = if all {
                s3.object_summaries_with_prefix(bucket, &prefix, max_keys).await?
            } else if v1 {
                let request = page_request(bucket, &prefix, max_keys);
                s3.list_objects_with(&request).await?.objects
            } else {
                let request = page_request(bucket, &prefix, max_keys);
                s3.list_objects_v2_with(&request).await?.objects
            };

            if json {
                return print_json(&objects);
            }
            for o in &objects {
                let modified = o
                    .last_modified
                    .map(|d| d.format("%Y-%m-%d %H:%M:%S").to_string())
                    .unwrap_or_default();
                println!(
                    "{:<20} {:>12} {}",
                    style(modified).dim(),
                    format_size(o.size),
                    o.key
                );
            }
            println!("{}", style(format!("{} object(s)", objects.len())).bold());
        }
        Command::PutText { name, content, dir } => {
            let key = s3
                .upload_text(bucket, &name, dir.as_deref(), &content)
                .await?;
            if json {
                return print_json(&serde_json::json!({ "bucket": bucket, "key": key }));
            }
            println!("{} s3://{}{}", style("✓").green(), bucket, key);
        }
        Command::Upload {
            paths,
            mode,
            dir,
            metadata,
            content_type,
            max_concurrent,
        } => {
            let mut object_metadata = metadata.as_deref().map(parse_metadata);
            if let Some(content_type) = content_type {
                object_metadata.get_or_insert_with(Default::default).content_type =
                    Some(content_type);
            }
            if object_metadata.is_some() && mode != UploadMode::Simple {
                println!(
                    "{}",
                    style("Metadata is only applied in simple mode, ignoring it").yellow()
                );
            }

            let multi = MultiProgress::new();
            let outcomes: Vec<UploadOutcome> = stream::iter(paths)
                .map(|path| {
                    let pb = multi.add(new_progress_bar());
                    let metadata = object_metadata.clone();
                    let dir = dir.clone();
                    async move {
                        let dir = dir.as_deref();
                        let result = upload_one(s3, bucket, &path, mode, dir, metadata, &pb).await;
                        pb.finish_and_clear();
                        match result {
                            Ok(key) => UploadOutcome {
                                path: path.display().to_string(),
                                key: Some(key),
                                error: None,
                            },
                            Err(e) => {
                                error!("Upload failed for {}: {}", path.display(), e);
                                UploadOutcome {
                                    path: path.display().to_string(),
                                    key: None,
                                    error: Some(e.user_message()),
                                }
                            }
                        }
                    }
                })
                .buffer_unordered(max_concurrent.max(1))
                .collect()
                .await;

            if json {
                return print_json(&outcomes);
            }
            print_upload_summary(bucket, &outcomes);
            if outcomes.iter().any(|o| o.error.is_some()) {
                anyhow::bail!("some uploads failed");
            }
        }
        Command::Get { key, output } => {
            let object = s3.get_object(bucket, &key).await?;
            match output {
                Some(path) => {
                    tokio::fs::write(&path, &object.content)
                        .await
                        .with_context(|| format!("writing {}", path.display()))?;
                    info!(
                        "Saved s3://{}{} to {} ({})",
                        bucket,
                        key,
                        path.display(),
                        format_size(object.content_length)
                    );
                }
                None => std::io::stdout().write_all(&object.content)?,
            }
        }
        Command::Cp {
            src_key,
            dest_key,
            to_bucket,
        } => {
            let dest_bucket = to_bucket.as_deref().unwrap_or(bucket);
            let dest_key = dest_key.as_deref().unwrap_or(&src_key);
            let result = s3
                .copy_object(bucket, &src_key, dest_bucket, dest_key)
                .await?;
            if json {
                return print_json(&result);
            }
            println!(
                "{} s3://{}/{} → s3://{}/{}",
                style("✓").green(),
                bucket,
                src_key,
                dest_bucket.to_lowercase(),
                dest_key
            );
        }
        Command::Rm {
            keys,
            version_id,
            batch,
        } => {
            if batch {
                match s3.delete_objects_by_keys(bucket, &keys, false).await? {
                    Some(result) if json => return print_json(&result),
                    Some(result) => println!(
                        "{} deleted {} object(s), {} error(s)",
                        style("✓").green(),
                        result.deleted.len(),
                        result.errors.len()
                    ),
                    None => println!(
                        "{}",
                        style(format!(
                            "Bucket {} does not have versioning enabled, nothing deleted",
                            bucket
                        ))
                        .yellow()
                    ),
                }
                return Ok(());
            }

            for key in &keys {
                match &version_id {
                    Some(version_id) => s3.delete_version(bucket, key, version_id).await?,
                    None => s3.delete_object(bucket, key).await?,
                }
                println!("{} deleted {}", style("✓").green(), key);
            }
        }
        Command::Presign { key, put, expires } => {
            let method = if put { HttpMethod::Put } else { HttpMethod::Get };
            let url = s3
                .presigned_url(bucket, &key, Duration::from_secs(expires), method)
                .await?;
            if json {
                return print_json(&url);
            }
            println!("{}", url.url);
            println!(
                "{}",
                style(format!("{} until {}", url.method, url.expires_at.to_rfc3339())).dim()
            );
        }
        Command::Url { key } => println!("{}", s3.object_url(&key).await?),
        Command::Cors { set, delete } => {
            if set {
                s3.set_bucket_cors(bucket, &[CorsRule::permissive()]).await?;
                println!("{} applied permissive CORS to {}", style("✓").green(), bucket);
            } else if delete {
                s3.delete_bucket_cors(bucket).await?;
                println!("{} removed CORS from {}", style("✓").green(), bucket);
            } else {
                let rules = s3.get_bucket_cors(bucket).await?;
                print_json(&rules)?;
            }
        }
        Command::Policy { delete } => {
            if delete {
                s3.delete_bucket_policy(bucket).await?;
                println!("{} removed policy from {}", style("✓").green(), bucket);
            } else {
                match s3.get_bucket_policy(bucket).await? {
                    Some(policy) => println!("{}", policy),
                    None => println!("{}", style("No bucket policy").dim()),
                }
            }
        }
    }

    Ok(())
}

async fn upload_one(
    s3: &S3Template,
    bucket: &str,
    path: &Path,
    mode: UploadMode,
    dir: Option<&str>,
    metadata: Option<s3template::s3::ObjectMetadata>,
    pb: &ProgressBar,
) -> s3template::s3::Result<String> {
    match mode {
        UploadMode::Simple => s3.upload_file(bucket, path, dir, metadata, Some(pb)).await,
        UploadMode::Multipart => s3.multipart_upload(bucket, path, dir, Some(pb)).await,
        UploadMode::Managed => s3.managed_upload(bucket, path, dir, Some(pb)).await,
    }
}

fn page_request(bucket: &str, prefix: &str, max_keys: i32) -> ListRequest {
    let request = ListRequest::new(bucket).prefix(prefix);
    if max_keys > 0 {
        request.max_keys(max_keys)
    } else {
        request
    }
}

fn new_progress_bar() -> ProgressBar {
    let pb = ProgressBar::new(0);
    if let Ok(progress_style) = ProgressStyle::default_bar()
        .template("{spinner:.green} [{bar:40.cyan/blue}] {bytes}/{total_bytes} {msg}")
    {
        pb.set_style(progress_style.progress_chars("#>-"));
    }
    pb
}

fn print_upload_summary(bucket: &str, outcomes: &[UploadOutcome]) {
    for outcome in outcomes {
        match (&outcome.key, &outcome.error) {
            (Some(key), _) => {
                println!("{} {}", style("✓").green(), style(&outcome.path).green());
                println!("  {} s3://{}{}", style("→").blue(), bucket, style(key).dim());
            }
            (None, Some(error)) => println!(
                "{} {} - {}",
                style("✗").red(),
                style(&outcome.path).red(),
                style(error).red()
            ),
            (None, None) => {}
        }
    }

    let failed = outcomes.iter().filter(|o| o.error.is_some()).count();
    println!("\n{}", style("═".repeat(70)).dim());
    println!(
        "{}",
        style(format!(
            "Summary: {} uploaded, {} failed",
            outcomes.len() - failed,
            failed
        ))
        .bold()
    );
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn confirm(prompt: &str) -> Result<bool> {
    print!("{} [y/N] ", style(prompt).yellow());
    std::io::stdout().flush()?;
    let mut answer = String::new();
    std::io::stdin().read_line(&mut answer)?;
    Ok(matches!(answer.trim(), "y" | "Y" | "yes"))
}

/// Format file size for display
fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}
