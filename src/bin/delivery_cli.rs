use std::{sync::Arc, time::Duration};

use anyhow::{anyhow, Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand};
use serde::Serialize;
use sushi_delivery_api::{
    config::{self, AppConfig},
    delivery::{
        build_quote_engine, ClientEstimator, DebouncedEstimator, EstimateState, HttpQuoteSource,
        QuoteEngine, QuoteResponse, QuoteSource, SourceError,
    },
};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = config::load_config().context("failed to load application config")?;
    config::init_tracing(config.log_level(), config.log_json, false);

    match cli.command {
        Commands::Quote(args) => handle_quote(&config, args, cli.json).await,
        Commands::Estimate(args) => handle_estimate(&config, args, cli.json),
        Commands::Remote(args) => handle_remote(args, cli.json).await,
        Commands::Simulate(args) => handle_simulate(&config, args, cli.json).await,
    }
}

#[derive(Parser)]
#[command(
    name = "delivery-cli",
    about = "Quote delivery fees and ETAs from the command line",
    version
)]
struct Cli {
    #[arg(
        long,
        global = true,
        action = ArgAction::SetTrue,
        help = "Render command output as pretty JSON"
    )]
    json: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Quote an address with the configured engine
    Quote(AddressArgs),
    /// Zone-table estimate with no network access
    Estimate(AddressArgs),
    /// Ask a running server for a quote
    Remote(RemoteArgs),
    /// Replay checkout keystrokes through the debounced estimator
    Simulate(SimulateArgs),
}

#[derive(Args)]
struct AddressArgs {
    /// Customer address or postcode, e.g. "SW1A 1AA"
    address: String,
}

#[derive(Args)]
struct RemoteArgs {
    address: String,
    #[arg(long, default_value = "http://localhost:3000")]
    server: String,
    #[arg(long, default_value_t = 10)]
    timeout_secs: u64,
}

#[derive(Args)]
struct SimulateArgs {
    /// Successive field values, e.g. "S" "SW1" "SW1A 1AA"
    #[arg(required = true)]
    inputs: Vec<String>,
    /// Pause between inputs in milliseconds
    #[arg(long, default_value_t = 150)]
    pause_ms: u64,
}

async fn handle_quote(config: &AppConfig, args: AddressArgs, json: bool) -> Result<()> {
    let engine = build_quote_engine(&config.delivery).context("failed to build quote engine")?;
    match engine.quote(&args.address).await {
        Ok(quote) => {
            if json {
                print_json(&quote)
            } else {
                println!(
                    "{} ({} zone, {} estimate): £{} • ready in {} min",
                    quote.destination_address,
                    quote.zone,
                    quote.tier.as_str(),
                    quote.cost,
                    quote.total_duration_minutes
                );
                if let (Some(km), Some(travel)) = (quote.distance_km, quote.travel_minutes) {
                    println!("  {:.2} km, {} min on the road", km, travel);
                }
                Ok(())
            }
        }
        Err(err) => Err(err.into()),
    }
}

fn handle_estimate(config: &AppConfig, args: AddressArgs, json: bool) -> Result<()> {
    let table = config
        .delivery
        .zone_table()
        .map_err(|e| anyhow!("invalid zone table: {}", e))?;
    let estimator = ClientEstimator::new(table, config.delivery.cooking_minutes);

    let Some(estimate) = estimator.estimate(&args.address) else {
        return Err(anyhow!(
            "Sorry, we do not deliver to this address. Please enter a different address."
        ));
    };
    if json {
        print_json(&estimate)
    } else {
        println!(
            "{} zone: £{} • about {} min",
            estimate.zone, estimate.cost, estimate.total_duration_minutes
        );
        Ok(())
    }
}

async fn handle_remote(args: RemoteArgs, json: bool) -> Result<()> {
    let source = HttpQuoteSource::new(&args.server, Duration::from_secs(args.timeout_secs))?;
    match source.fetch_quote(&args.address).await {
        Ok(quote) => render_response(&quote, json),
        Err(SourceError::Rejected(reason)) => Err(anyhow!(reason)),
        Err(err @ SourceError::Unreachable(_)) => Err(anyhow!(err)),
    }
}

async fn handle_simulate(config: &AppConfig, args: SimulateArgs, json: bool) -> Result<()> {
    let engine: QuoteEngine =
        build_quote_engine(&config.delivery).context("failed to build quote engine")?;
    let estimator = ClientEstimator::for_engine(&engine);
    let field = DebouncedEstimator::new(estimator, Arc::new(engine), config.delivery.debounce());
    let mut updates = field.subscribe();

    for input in &args.inputs {
        field.input(input);
        render_state(input, &field.current(), json)?;
        tokio::time::sleep(Duration::from_millis(args.pause_ms)).await;
    }

    let settled = updates
        .wait_for(|state| {
            !matches!(
                state,
                EstimateState::Provisional(_) | EstimateState::Checking
            )
        })
        .await
        .context("estimator stopped before settling")?
        .clone();
    let last = args.inputs.last().map(String::as_str).unwrap_or_default();
    render_state(last, &settled, json)
}

fn render_state(input: &str, state: &EstimateState, json: bool) -> Result<()> {
    if json {
        #[derive(Serialize)]
        struct Line<'a> {
            input: &'a str,
            #[serde(flatten)]
            state: &'a EstimateState,
        }
        println!("{}", serde_json::to_string(&Line { input, state })?);
        return Ok(());
    }

    let text = match state {
        EstimateState::Idle => "-".to_string(),
        EstimateState::Incomplete => "Calculating...".to_string(),
        EstimateState::Provisional(est) => {
            format!("~£{} • {} min (checking)", est.cost, est.total_duration_minutes)
        }
        EstimateState::Checking => "Checking address...".to_string(),
        EstimateState::Confirmed(quote) => {
            format!("£{} • {} min", quote.cost, quote.duration_min)
        }
        EstimateState::Fallback(est) => {
            format!("£{} • {} min (estimated)", est.cost, est.total_duration_minutes)
        }
        EstimateState::Unavailable(reason) => reason.clone(),
    };
    println!("{:>12} → {}", input, text);
    Ok(())
}

fn render_response(quote: &QuoteResponse, json: bool) -> Result<()> {
    if json {
        return print_json(quote);
    }
    println!("{} → {}: £{}", quote.from, quote.to, quote.cost);
    println!(
        "  ready in {} min ({} cooking{})",
        quote.duration_min,
        quote.cooking_min,
        quote
            .travel_min
            .map(|t| format!(", {} travel", t))
            .unwrap_or_default()
    );
    if let Some(km) = &quote.distance_km {
        println!("  distance {} km", km);
    }
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
