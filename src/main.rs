//! Table exchange command-line entry point
//!
//! Usage:
//! ```bash
//! export TABLE_EXCHANGE_URI=https://tables.example.org:5400
//! export TABLE_EXCHANGE_TOKEN=your_token_here   # or --username/--password
//!
//! table-exchange fetch t4590865 --columns audio.m4a,countdown.m4a --limit 3 --out ./audio
//! table-exchange copy t4590865 p4899451 --name "Copy of t4590865" --remove audio.m4a
//! table-exchange write contents.csv p4899451 --name "Contents"
//! table-exchange upload p4899451 test1.wav test2.wav --name "Voice files" --column fileID
//! table-exchange concat p4899451 left.csv right.csv --name "Joined"
//! ```

use anyhow::{bail, Context};
use polars::prelude::*;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use table_exchange::config::{CopyOptions, ExchangeConfig, FetchOptions, UploadOptions};
use table_exchange::exchange;
use table_exchange::remote::{GrpcTableService, Session};
use tracing_subscriber::EnvFilter;

/// Positional arguments plus `--flag value` pairs
struct Args {
    command: String,
    positional: Vec<String>,
    flags: HashMap<String, String>,
}

impl Args {
    fn parse(args: &[String]) -> anyhow::Result<Self> {
        let mut positional = Vec::new();
        let mut flags = HashMap::new();

        let mut i = 1;
        while i < args.len() {
            match args[i].strip_prefix("--") {
                Some(name) if i + 1 < args.len() => {
                    flags.insert(name.to_string(), args[i + 1].clone());
                    i += 2;
                }
                Some(name) => bail!("Flag --{} needs a value", name),
                None => {
                    positional.push(args[i].clone());
                    i += 1;
                }
            }
        }

        if positional.is_empty() {
            bail!("Missing command (fetch, copy, write, upload, concat)");
        }
        let command = positional.remove(0);

        Ok(Args {
            command,
            positional,
            flags,
        })
    }

    fn flag(&self, name: &str) -> Option<&str> {
        self.flags.get(name).map(String::as_str)
    }

    fn list(&self, name: &str) -> Vec<String> {
        self.flag(name)
            .map(|v| {
                v.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default()
    }

    fn positional(&self, index: usize, what: &str) -> anyhow::Result<&str> {
        self.positional
            .get(index)
            .map(String::as_str)
            .with_context(|| format!("{} requires <{}>", self.command, what))
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    println!("Table Exchange v{}", env!("CARGO_PKG_VERSION"));

    let args: Vec<String> = std::env::args().collect();
    if let Err(e) = run(&args).await {
        eprintln!("✗ {:#}", e);
        eprintln!("\nNote: To connect, set environment variables:");
        eprintln!("  export TABLE_EXCHANGE_URI=https://tables.example.org:5400");
        eprintln!("  export TABLE_EXCHANGE_TOKEN=your_token_here");
        std::process::exit(1);
    }
}

async fn run(raw_args: &[String]) -> anyhow::Result<()> {
    let args = Args::parse(raw_args)?;
    let config = load_config(&args)?;

    println!("Connecting to {}...", config.service_uri);
    let service = GrpcTableService::connect(&config).await?;
    let mut session = Session::open(service, &config.credentials()).await?;
    println!("✓ Logged in\n");

    let outcome = run_command(&args, &config, &mut session).await;

    // Log out even when the command failed; report the command's error first
    let closed = session.close().await;
    outcome?;
    closed?;
    Ok(())
}

fn load_config(args: &Args) -> anyhow::Result<ExchangeConfig> {
    let mut config = match args.flag("config") {
        Some(path) => ExchangeConfig::from_file_and_env(Path::new(path))?,
        None => ExchangeConfig::from_env()?,
    };

    if let Some(uri) = args.flag("uri") {
        config.service_uri = uri.to_string();
    }
    if let Some(token) = args.flag("token") {
        config.token = Some(token.to_string());
    }
    if let Some(username) = args.flag("username") {
        config.username = username.to_string();
    }
    if let Some(password) = args.flag("password") {
        config.password = password.to_string();
    }
    Ok(config)
}

async fn run_command(
    args: &Args,
    config: &ExchangeConfig,
    session: &mut Session<GrpcTableService>,
) -> anyhow::Result<()> {
    match args.command.as_str() {
        "fetch" => {
            let table_id = args.positional(0, "table_id")?;
            let options = FetchOptions {
                file_columns: args.list("columns"),
                row_limit: args
                    .flag("limit")
                    .map(str::parse::<usize>)
                    .transpose()
                    .context("--limit must be a row count")?,
                output_directory: args.flag("out").map(PathBuf::from).unwrap_or_else(|| ".".into()),
            };

            let mut fetched = exchange::fetch_table_and_files(session, table_id, &options).await?;
            println!(
                "✓ Fetched {}: {} rows, {} columns",
                table_id,
                fetched.data.height(),
                fetched.data.width()
            );
            for (column, files) in options.file_columns.iter().zip(&fetched.downloaded_files) {
                let downloaded = files.iter().flatten().filter(|p| !p.as_os_str().is_empty()).count();
                println!("  {}: {} of {} rows downloaded", column, downloaded, files.len());
            }

            if let Some(csv) = args.flag("csv") {
                write_csv(&mut fetched.data, Path::new(csv))?;
                println!("  Saved table to {}", csv);
            }
        }
        "copy" => {
            let table_id = args.positional(0, "table_id")?;
            let project_id = args.positional(1, "project_id")?;
            let options = CopyOptions {
                table_name: args.flag("name").unwrap_or_default().to_string(),
                remove_columns: args.list("remove"),
            };

            let copied = exchange::copy_table(session, table_id, project_id, &options).await?;
            println!(
                "✓ Copied {} to {} ('{}' in {}, {} columns)",
                table_id,
                copied.table_id,
                copied.table_name,
                copied.project_id,
                copied.data.width()
            );
        }
        "write" => {
            let csv = args.positional(0, "csv")?;
            let project_id = args.positional(1, "project_id")?;
            let data = read_csv(Path::new(csv))?;

            let schema =
                exchange::write_table(session, &data, project_id, args.flag("name").unwrap_or_default())
                    .await?;
            println!("✓ Wrote {} rows to {}", data.height(), schema.id);
        }
        "upload" => {
            let project_id = args.positional(0, "project_id")?;
            let files: Vec<PathBuf> = args.positional[1..].iter().map(PathBuf::from).collect();
            if files.is_empty() {
                bail!("upload requires at least one file");
            }
            let mut options = UploadOptions {
                table_name: args.flag("name").unwrap_or_default().to_string(),
                ..Default::default()
            };
            if let Some(column) = args.flag("column") {
                options.file_column_name = column.to_string();
            }

            println!("Uploading {} files ({} byte chunks)...", files.len(), config.upload_chunk_size);
            let uploaded =
                exchange::upload_files_as_table(session, &files, project_id, &options).await?;
            println!("✓ Stored {} file handles in {}", uploaded.handles.len(), uploaded.table_id);
        }
        "concat" => {
            let project_id = args.positional(0, "project_id")?;
            let tables = args.positional[1..]
                .iter()
                .map(|p| read_csv(Path::new(p)))
                .collect::<anyhow::Result<Vec<_>>>()?;

            let joined = exchange::concatenate_and_store(
                session,
                &tables,
                project_id,
                args.flag("name").unwrap_or_default(),
            )
            .await?;
            println!(
                "✓ Stored {} tables as {} ({} rows, {} columns)",
                tables.len(),
                joined.table_id,
                joined.data.height(),
                joined.data.width()
            );
        }
        other => bail!("Unknown command '{}'", other),
    }

    Ok(())
}

fn read_csv(path: &Path) -> anyhow::Result<DataFrame> {
    CsvReadOptions::default()
        .with_has_header(true)
        .try_into_reader_with_file_path(Some(path.to_path_buf()))
        .and_then(|reader| reader.finish())
        .with_context(|| format!("Failed to read {}", path.display()))
}

fn write_csv(df: &mut DataFrame, path: &Path) -> anyhow::Result<()> {
    let mut file = std::fs::File::create(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    CsvWriter::new(&mut file).finish(df)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(line: &str) -> Vec<String> {
        std::iter::once("table-exchange")
            .chain(line.split_whitespace())
            .map(String::from)
            .collect()
    }

    #[test]
    fn test_parse_command_positionals_and_flags() {
        let parsed = Args::parse(&args("fetch t45 --columns a.m4a,b.m4a --limit 3")).unwrap();
        assert_eq!(parsed.command, "fetch");
        assert_eq!(parsed.positional, vec!["t45"]);
        assert_eq!(parsed.list("columns"), vec!["a.m4a", "b.m4a"]);
        assert_eq!(parsed.flag("limit"), Some("3"));
        assert!(parsed.list("remove").is_empty());
    }

    #[test]
    fn test_parse_errors() {
        assert!(Args::parse(&args("")).is_err());
        assert!(Args::parse(&args("copy t1 p1 --name")).is_err());

        let parsed = Args::parse(&args("copy t1")).unwrap();
        assert!(parsed.positional(1, "project_id").is_err());
    }

    #[test]
    fn test_config_flag_goes_through_validation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("exchange.json");

        std::fs::write(&path, r#"{"upload_chunk_size": 0}"#).unwrap();
        let parsed = Args::parse(&args(&format!("fetch t1 --config {}", path.display()))).unwrap();
        assert!(load_config(&parsed).is_err());

        std::fs::write(&path, r#"{"service_uri": "http://10.0.0.5:50051"}"#).unwrap();
        let line = format!("fetch t1 --config {} --username ana", path.display());
        let config = load_config(&Args::parse(&args(&line)).unwrap()).unwrap();
        assert_eq!(config.username, "ana");
    }
}
