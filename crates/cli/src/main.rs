//! CLI entry point for cutout
//!
//! Loads the configuration, submits the given images as one batch, waits for
//! the queue to drain and writes the results next to each other.

use clap::Parser;
use cutout::{
    collect_inputs, Config, ItemStatus, OutputFormat, ProcessingMode, RawFile, Session, Trigger,
};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Remove image backgrounds through a local or hosted service
#[derive(Parser, Debug)]
#[command(name = "cutout")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Image files or directories to process
    inputs: Vec<PathBuf>,

    /// Path to the configuration file (config.toml)
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Processing mode (local or remote), overrides the config file
    #[arg(short, long)]
    mode: Option<ProcessingMode>,

    /// Output format (png, webp or jpg), overrides the config file
    #[arg(short, long)]
    format: Option<OutputFormat>,

    /// API key for remote processing
    #[arg(long, env = "CUTOUT_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Persist the API key for later runs
    #[arg(long, default_value = "false")]
    remember_key: bool,

    /// Delete the persisted API key
    #[arg(long, default_value = "false")]
    forget_key: bool,

    /// Directory the results are written to
    #[arg(short, long, default_value = ".")]
    out_dir: PathBuf,

    /// Keep the status server running after the batch finishes
    #[arg(long, default_value = "false")]
    serve: bool,

    /// Skip the service health probe
    #[arg(long, default_value = "false")]
    skip_checks: bool,

    /// Print the project's star count
    #[arg(long, default_value = "false")]
    stars: bool,

    /// Print the remaining quota of the API key
    #[arg(long, default_value = "false")]
    usage: bool,
}

fn load_config(args: &Args) -> Result<Config, cutout::config::ConfigError> {
    let mut config = Config::load_or_default(&args.config)?;
    if let Some(mode) = args.mode {
        config.processing.mode = mode;
    }
    if let Some(format) = args.format {
        config.processing.output_format = format;
    }
    Ok(config)
}

fn read_inputs(args: &Args) -> Vec<RawFile> {
    collect_inputs(&args.inputs)
        .into_iter()
        .filter_map(|path| match RawFile::from_path(&path) {
            Ok(file) => Some(file),
            Err(e) => {
                tracing::warn!(path = %path.display(), "cannot read input: {}", e);
                None
            }
        })
        .collect()
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cutout=info,cutout_cli=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    let config = match load_config(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load config: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let session = match Session::new(config) {
        Ok(session) => session,
        Err(e) => {
            eprintln!("Failed to initialize: {}", e);
            return ExitCode::FAILURE;
        }
    };

    if args.forget_key {
        if let Err(e) = session.forget_api_key().await {
            eprintln!("Failed to forget API key: {}", e);
            return ExitCode::FAILURE;
        }
        println!("Stored API key removed");
    }

    if let Some(ref api_key) = args.api_key {
        session.engine().set_api_key(api_key.clone()).await;
    }

    if args.remember_key {
        match session.remember_api_key().await {
            Ok(true) => println!("API key remembered"),
            Ok(false) => println!("No API key to remember"),
            Err(e) => {
                eprintln!("Failed to remember API key: {}", e);
                return ExitCode::FAILURE;
            }
        }
    }

    if args.stars {
        match session.popularity().await {
            Some(record) => println!("★ {}", record.count),
            None => println!("★ unavailable"),
        }
    }

    if args.usage {
        match session.usage().await {
            Some(Ok(usage)) => println!("{}", usage),
            Some(Err(e)) => eprintln!("Usage lookup failed: {}", e),
            None => eprintln!("Usage lookup needs an API key"),
        }
    }

    if args.inputs.is_empty() {
        if args.forget_key || args.remember_key || args.stars || args.usage {
            return ExitCode::SUCCESS;
        }
        eprintln!("No inputs given");
        return ExitCode::FAILURE;
    }

    let mode = session.mode().await;
    let checks = if args.skip_checks {
        println!("WARNING: Skipping service health probe (--skip-checks enabled)");
        cutout::startup::check_config(session.config())
            .and_then(|_| cutout::startup::check_service_url(session.config(), mode))
    } else {
        session.preflight().await
    };
    if let Err(e) = checks {
        eprintln!("Startup check failed: {}", e);
        return ExitCode::FAILURE;
    }

    let server = if args.serve {
        println!(
            "Status server on http://{}/queue",
            session.config().server.bind
        );
        Some(session.start_status_server())
    } else {
        None
    };

    let files = read_inputs(&args);
    println!("Processing {} file(s) in {} mode", files.len(), mode);

    let submission = match session.submit(files).await {
        Ok(submission) => submission,
        Err(e) => {
            eprintln!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    match submission.trigger {
        Ok(Trigger::Started(handle)) => {
            if let Err(e) = handle.await {
                eprintln!("Processing task failed: {}", e);
                return ExitCode::FAILURE;
            }
        }
        Ok(Trigger::AlreadyRunning) | Ok(Trigger::Idle) => {}
        Err(e) => {
            eprintln!("{}", e);
            return ExitCode::FAILURE;
        }
    }

    let snapshot = session.snapshot().await;
    for item in &snapshot.items {
        match item.status {
            ItemStatus::Error => println!(
                "  {:<10} {} ({})",
                item.status_label,
                item.name,
                item.error.as_deref().unwrap_or_default()
            ),
            _ => println!("  {:<10} {}", item.status_label, item.name),
        }
    }
    println!("{}", snapshot.summary);

    match session.export_all(&args.out_dir).await {
        Ok(paths) => {
            for path in paths {
                println!("  wrote {}", path.display());
            }
        }
        Err(e) => {
            eprintln!("{}", e);
            return ExitCode::FAILURE;
        }
    }

    if let Some(server) = server {
        println!("Press Ctrl-C to stop the status server");
        tokio::select! {
            _ = server => {}
            _ = tokio::signal::ctrl_c() => {}
        }
    }

    if snapshot.counts.error > 0 {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}
