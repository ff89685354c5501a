use clap::Parser;
use radius_client::{AuditLogger, Config, FailoverCoordinator, PlaintextSecrets};
use std::process;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// nps-auth - administrator login against Microsoft NPS (RADIUS + MS-CHAPv2)
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(name = "nps-auth")]
struct Cli {
    /// Path to configuration file
    #[arg(value_name = "CONFIG", default_value = "nps-auth.json")]
    config_path: String,

    /// Account to authenticate
    #[arg(short, long, required_unless_present = "validate")]
    username: Option<String>,

    /// Password (prefer the environment variable over the command line)
    #[arg(short, long, env = "NPS_AUTH_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Validate configuration and exit
    #[arg(long)]
    validate: bool,
}

fn init_tracing(log_level: &str) {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level)))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Load or create configuration (without logging first)
    let config = match Config::from_file(&cli.config_path) {
        Ok(cfg) => cfg,
        Err(e) => {
            init_tracing("info");

            if cli.validate || std::path::Path::new(&cli.config_path).exists() {
                eprintln!("❌ Configuration validation failed!");
                eprintln!("   Error: {}", e);
                process::exit(1);
            }

            warn!("Could not load config file from: {}", cli.config_path);
            info!("Creating example configuration at: {}", cli.config_path);

            if let Err(e) = Config::example().to_file(&cli.config_path) {
                error!("Error creating example config: {}", e);
                process::exit(1);
            }

            info!("Please edit {} and run again", cli.config_path);
            process::exit(0);
        }
    };

    if cli.validate {
        println!("✓ Configuration validated successfully!");
        println!();
        println!("Configuration summary:");
        println!("  Primary: {}:{}", config.primary.host, config.primary.port);
        match config.secondary {
            Some(ref secondary) => println!("  Secondary: {}:{}", secondary.host, secondary.port),
            None => println!("  Secondary: (none)"),
        }
        println!("  NAS-Identifier: {}", config.nas_identifier);
        println!("  Timeout: {} ms x {} sends", config.timeout_ms, config.retries);
        println!("  Message-Authenticator: {}", config.message_authenticator);
        println!(
            "  MS-CHAP2-Success: verify={} require={}",
            config.verify_mschap2_success, config.require_mschap2_success
        );
        println!("  Log level: {}", config.log_level.as_deref().unwrap_or("info"));
        if let Some(ref path) = config.audit_log_path {
            println!("  Audit log: {}", path);
        }
        process::exit(0);
    }

    init_tracing(config.log_level.as_deref().unwrap_or("info"));

    let Some(username) = cli.username else {
        error!("--username is required");
        process::exit(2);
    };
    let Some(password) = cli.password else {
        error!("No password given (use --password or NPS_AUTH_PASSWORD)");
        process::exit(2);
    };

    let audit = match AuditLogger::new(config.audit_log_path.clone()) {
        Ok(logger) => logger,
        Err(e) => {
            error!("Failed to open audit log: {}", e);
            process::exit(1);
        }
    };
    if let Some(path) = audit.file_path() {
        info!("Audit logging enabled: {}", path);
    }

    let coordinator = FailoverCoordinator::new(Arc::new(PlaintextSecrets)).with_audit(Arc::new(audit));
    let outcome = coordinator.authenticate(&config, &username, &password).await;

    match serde_json::to_string_pretty(&outcome) {
        Ok(json) => println!("{}", json),
        Err(e) => {
            error!("Failed to serialize result: {}", e);
            process::exit(1);
        }
    }

    process::exit(if outcome.result.success { 0 } else { 1 });
}
