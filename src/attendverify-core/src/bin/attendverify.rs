//! attendverify CLI - run attendance verification strategies from a shell.
//!
//! Useful for checking a host's sensors, trying a geofence against known
//! coordinates, and scoring badge identifiers.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use attendverify_core::badge::{score_badge, validate_format};
use attendverify_core::strategy::{GeofenceStrategy, VerificationStrategy};
use attendverify_core::types::Coordinates;
use attendverify_core::{
    Acknowledgement, CommitOutcome, EngineConfig, HttpsClient, LocalTokenIssuer,
    SessionController, StoreInfo, StrategyKind, StrategyRegistry, TokenIssuer,
    VerificationContext, VerifyError,
};
use attendverify_sensors::{GeoPosition, SensorSuite, SimulatedPositionProvider};
use clap::{Parser, Subcommand};
use serde_json::{json, Value};

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// attendverify - presence verification for attendance clock events.
///
/// Each strategy gathers a different kind of evidence that a worker is at
/// the assigned store: satellite position, a rotating code, a proximity
/// tag, the device environment, or a badge id.
#[derive(Parser)]
#[command(name = "attendverify")]
#[command(version = VERSION)]
#[command(about = "Presence verification for attendance clock events")]
#[command(long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Output format (text, json)
    #[arg(short, long, default_value = "text")]
    format: String,

    /// Engine configuration file (JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// List strategies and whether this host can offer them
    Strategies,

    /// Check a position against a store geofence
    Geofence {
        /// Store latitude
        #[arg(long, allow_hyphen_values = true)]
        store_lat: f64,

        /// Store longitude
        #[arg(long, allow_hyphen_values = true)]
        store_lng: f64,

        /// Worker latitude
        #[arg(long, allow_hyphen_values = true)]
        lat: f64,

        /// Worker longitude
        #[arg(long, allow_hyphen_values = true)]
        lng: f64,

        /// Reported accuracy in meters
        #[arg(long, default_value = "10")]
        accuracy: f64,

        /// Geofence radius in meters (overrides the configuration)
        #[arg(long)]
        radius: Option<f64>,
    },

    /// Check a badge id's format and strength
    Badge {
        /// The badge identifier
        id: String,
    },

    /// Auto-detect the best strategy on this host
    Detect {
        /// Store latitude
        #[arg(long, allow_hyphen_values = true)]
        store_lat: f64,

        /// Store longitude
        #[arg(long, allow_hyphen_values = true)]
        store_lng: f64,

        /// gpsd address (host:port)
        #[arg(long)]
        gpsd: Option<String>,

        /// Also clock in with the detected strategy, acknowledging warnings
        #[arg(long)]
        clock_in: bool,
    },
}

fn print_json(value: &Value) {
    match serde_json::to_string_pretty(value) {
        Ok(text) => println!("{text}"),
        Err(e) => eprintln!("Error: cannot render output: {e}"),
    }
}

fn load_config(path: Option<&PathBuf>) -> Result<EngineConfig, VerifyError> {
    let config = match path {
        Some(path) => EngineConfig::from_json_file(path)?,
        None => EngineConfig::default(),
    };
    config.check()?;
    Ok(config)
}

fn store_at(lat: f64, lng: f64) -> StoreInfo {
    StoreInfo {
        id: "cli-store".into(),
        name: "Store".into(),
        coordinates: Some(Coordinates { lat, lng }),
        address: None,
    }
}

fn token_issuer(config: &EngineConfig) -> Result<(Arc<dyn TokenIssuer>, bool), VerifyError> {
    match HttpsClient::from_config(&config.endpoints)? {
        Some(client) => {
            let secure = client.is_secure();
            Ok((Arc::new(client), secure))
        },
        None => Ok((
            Arc::new(LocalTokenIssuer::new(
                config.token.prefix.clone(),
                config.token.lifetime,
            )),
            true,
        )),
    }
}

async fn run_strategies(config: &EngineConfig, json_output: bool) -> Result<(), VerifyError> {
    let (issuer, secure) = token_issuer(config)?;
    let sensors = SensorSuite::detect(secure, None).await;
    let registry = StrategyRegistry::standard(config, &sensors, issuer);
    let available: Vec<StrategyKind> = registry.available().iter().map(|d| d.kind).collect();

    if json_output {
        let strategies: Vec<Value> = registry
            .descriptors()
            .into_iter()
            .map(|d| {
                json!({
                    "descriptor": d,
                    "available": available.contains(&d.kind),
                    "permissions": registry
                        .required_permissions(d.kind)
                        .unwrap_or_default()
                        .iter()
                        .map(ToString::to_string)
                        .collect::<Vec<_>>(),
                })
            })
            .collect();
        print_json(&json!({ "strategies": strategies }));
        return Ok(());
    }

    println!("STRATEGIES");
    println!("----------\n");
    for d in registry.descriptors() {
        let mark = if available.contains(&d.kind) { "+" } else { "-" };
        println!(
            "  [{mark}] {:<16} {:<8} {}",
            d.kind.as_str(),
            d.display_name,
            d.description
        );
    }
    println!();
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn run_geofence(
    mut config: EngineConfig,
    store_lat: f64,
    store_lng: f64,
    lat: f64,
    lng: f64,
    accuracy: f64,
    radius: Option<f64>,
    json_output: bool,
) -> Result<bool, VerifyError> {
    if let Some(radius) = radius {
        config.geofence.radius_m = radius;
        config.check()?;
    }
    let position = Arc::new(SimulatedPositionProvider::new(GeoPosition::new(
        lat, lng, accuracy,
    )));
    let strategy = GeofenceStrategy::new(config.geofence.clone(), position);
    let ctx = VerificationContext::new("cli", Some(store_at(store_lat, store_lng)));

    let prepared = strategy.prepare(&ctx).await;
    if !prepared.success {
        return Err(VerifyError::capability(
            prepared.error.unwrap_or_else(|| "prepare failed".into()),
        ));
    }
    let outcome = strategy.validate(&ctx).await;
    strategy.cleanup().await;

    if json_output {
        print_json(&json!(outcome));
    } else {
        let verdict = match (outcome.is_valid, outcome.warnings.is_empty()) {
            (false, _) => "BLOCKED",
            (true, true) => "INSIDE",
            (true, false) => "OUTSIDE (override required)",
        };
        println!("Geofence: {verdict}");
        if let Some(distance) = outcome.metadata.get("distance") {
            println!("  distance: {distance} m (radius {} m)", config.geofence.radius_m);
        }
        for warning in &outcome.warnings {
            println!("  warning: {warning}");
        }
        if let Some(error) = &outcome.error {
            println!("  error: {error}");
        }
    }
    Ok(outcome.is_valid)
}

fn run_badge(config: &EngineConfig, id: &str, json_output: bool) -> bool {
    let format = validate_format(id, config.badge.min_len, config.badge.max_len);
    let strength = score_badge(id);

    if json_output {
        print_json(&json!({
            "id": id,
            "valid": format.is_ok(),
            "format": format.as_ref().ok(),
            "error": format.as_ref().err(),
            "strength": strength,
        }));
    } else {
        match &format {
            Ok(name) => println!("Badge {id}: {name} format"),
            Err(reason) => println!("Badge {id}: rejected ({reason})"),
        }
        println!(
            "  strength: {:?} ({}/100){}",
            strength.level,
            strength.score,
            if strength.flags.is_empty() {
                String::new()
            } else {
                format!(" [{}]", strength.flags.join(", "))
            }
        );
    }
    format.is_ok()
}

async fn run_detect(
    config: &EngineConfig,
    store_lat: f64,
    store_lng: f64,
    gpsd: Option<String>,
    clock_in: bool,
    json_output: bool,
) -> Result<bool, VerifyError> {
    let (issuer, secure) = token_issuer(config)?;
    let sensors = SensorSuite::detect(secure, gpsd.as_deref()).await;
    let registry = StrategyRegistry::standard(config, &sensors, issuer);
    let mut controller = SessionController::new(registry);
    let ctx = VerificationContext::new("cli", Some(store_at(store_lat, store_lng)));

    let prepared = controller.select_strategy(StrategyKind::Auto, &ctx).await?;
    let committed = if clock_in && prepared.success {
        Some(
            controller
                .clock_in(&ctx, Acknowledgement::confirmed())
                .await?,
        )
    } else {
        None
    };

    if json_output {
        print_json(&json!({
            "prepare": prepared,
            "payload": committed.as_ref().and_then(CommitOutcome::payload),
            "state": controller.state(),
        }));
    } else {
        match prepared.metadata.get("selectedStrategy") {
            Some(Value::String(kind)) => println!("Selected: {kind}"),
            _ => println!("Selected: none"),
        }
        if let Some(confidence) = prepared.metadata.get("confidence") {
            println!("  confidence: {confidence}");
        }
        if let Some(Value::Array(reasons)) = prepared.metadata.get("detectionReasons") {
            for reason in reasons {
                println!("  - {}", reason.as_str().unwrap_or_default());
            }
        }
        if let Some(payload) = committed.as_ref().and_then(CommitOutcome::payload) {
            println!(
                "Clocked in via {:?} at {}",
                payload.tracking_method, payload.timestamp
            );
        }
    }
    controller.end_session().await;
    Ok(prepared.success)
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let json_output = cli.format == "json";

    // Initialize logging (suppress for JSON output)
    if json_output {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::ERROR)
            .with_target(false)
            .init();
    } else if cli.verbose {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_target(false)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::WARN)
            .with_target(false)
            .init();
    }

    let config = match load_config(cli.config.as_ref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e}");
            return ExitCode::from(2);
        },
    };

    let result = match cli.command {
        Some(Commands::Geofence {
            store_lat,
            store_lng,
            lat,
            lng,
            accuracy,
            radius,
        }) => {
            run_geofence(
                config,
                store_lat,
                store_lng,
                lat,
                lng,
                accuracy,
                radius,
                json_output,
            )
            .await
        },
        Some(Commands::Badge { id }) => Ok(run_badge(&config, &id, json_output)),
        Some(Commands::Detect {
            store_lat,
            store_lng,
            gpsd,
            clock_in,
        }) => run_detect(&config, store_lat, store_lng, gpsd, clock_in, json_output).await,
        Some(Commands::Strategies) | None => run_strategies(&config, json_output).await.map(|()| true),
    };

    match result {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            if json_output {
                print_json(&json!({ "error": e.to_string() }));
            } else {
                eprintln!("Error: {e}");
            }
            ExitCode::FAILURE
        },
    }
}
