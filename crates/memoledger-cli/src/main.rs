//! memoledger command line
//!
//! Runs the purchase walkthrough against the in-memory ledger, computes
//! totals and checks configuration files.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use memoledger_core::{
    compute_total, format_amount, parse_amount, Address, Amount, LedgerConfig, MemoryLedger,
    SchemaVersion,
};
use memoledger_sync::{gather_metrics, LedgerClient, PurchaseForm, StaticProvider};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "memoledger")]
#[command(about = "Pay a memo ledger and mirror its purchase history", version)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Deploy an in-memory ledger, buy a few coffees, then withdraw as owner
    Demo {
        /// Memo schema version: v0, v1 or v2
        #[arg(short, long, default_value = "v2")]
        schema: SchemaVersion,

        /// Configuration file (JSON); defaults are used when absent
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Print prometheus metrics when done
        #[arg(long)]
        metrics: bool,
    },

    /// Compute the exact total of a price and an optional tip
    Total {
        /// Base price in major units, e.g. 0.001
        price: String,

        /// Tip in major units
        #[arg(short, long)]
        tip: Option<String>,

        /// Decimal places of the ledger currency
        #[arg(short, long, default_value = "18")]
        decimals: u32,
    },

    /// Load, validate and print a configuration
    Config {
        /// Configuration file (JSON); prints the defaults when absent
        path: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt().with_env_filter(level).init();

    match cli.command {
        Command::Demo {
            schema,
            config,
            metrics,
        } => {
            let config = load_config(config)?.with_schema_version(schema);
            run_demo(config).await?;
            if metrics {
                println!("{}", gather_metrics());
            }
        }
        Command::Total {
            price,
            tip,
            decimals,
        } => {
            let total = compute_total(&price, tip.as_deref(), decimals)
                .with_context(|| format!("cannot total {} + {}", price, tip.unwrap_or_default()))?;
            println!("{} ({} minor units)", format_amount(total, decimals), total.minor_units());
        }
        Command::Config { path } => {
            let config = load_config(path)?;
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
    }

    Ok(())
}

fn load_config(path: Option<PathBuf>) -> Result<LedgerConfig> {
    let config = match path {
        Some(path) => LedgerConfig::from_json_file(&path)
            .with_context(|| format!("failed to load {}", path.display()))?,
        None => LedgerConfig::default(),
    };
    config.validate().context("invalid configuration")?;
    Ok(config)
}

async fn run_demo(config: LedgerConfig) -> Result<()> {
    let decimals = config.decimals;
    let owner = Address::from_low_u64(1);
    let tippers = [
        (Address::from_low_u64(2), "Carolina", "You're the best!", "Coffee"),
        (Address::from_low_u64(3), "Vitto", "Best coffee in town", "Large Coffee"),
        (Address::from_low_u64(4), "Kay", "I love my Proof of Knowledge", "Coffee"),
    ];

    info!("Running walkthrough with schema {}", config.schema_version);
    let ledger = Arc::new(MemoryLedger::deploy(owner, config.schema_version));
    let starting_funds = parse_amount("10", decimals)?;
    for (account, ..) in &tippers {
        ledger.fund(*account, starting_funds);
    }
    println!("Ledger deployed, owned by {}", owner);

    let watched: Vec<Address> = std::iter::once(owner)
        .chain(tippers.iter().map(|(account, ..)| *account))
        .collect();

    println!("== start ==");
    print_balances(&ledger, &watched, decimals);

    for (account, name, message, product) in &tippers {
        let client = client_for(&config, &ledger, *account)?;
        client.connect().await?;

        let product = match config.product(product) {
            Some(product) => product.clone(),
            None => bail!("product {:?} missing from the catalog", product),
        };
        let mut form = PurchaseForm::for_product(&product)
            .with_name(*name)
            .with_message(*message);
        let receipt = client.purchase(&mut form).await?;
        println!(
            "{} bought a {} for {} ({})",
            name,
            product.label,
            format_amount(receipt.total, decimals),
            receipt.tx_hash
        );
        client.disconnect().await;
    }

    println!("== bought coffee ==");
    print_balances(&ledger, &watched, decimals);

    let owner_client = client_for(&config, &ledger, owner)?;
    owner_client.connect().await?;
    let receipt = owner_client.withdraw().await?;
    println!("Owner withdrew {}", format_amount(receipt.total, decimals));

    println!("== withdraw tips ==");
    print_balances(&ledger, &watched, decimals);

    // Let the last events land before reading the log
    tokio::time::sleep(Duration::from_millis(50)).await;
    owner_client.refresh().await?;

    println!("== memos ({} purchases) ==", owner_client.purchase_count());
    for memo in owner_client.snapshot() {
        let product = memo.product_label.as_deref().unwrap_or("-");
        println!(
            "At {}, {} ({}) paid {} for {}: \"{}\"",
            memo.timestamp,
            memo.display_name,
            memo.payer,
            format_amount(memo.total_paid, decimals),
            product,
            memo.message
        );
    }

    let rejected = owner_client.rejected_records();
    if !rejected.is_empty() {
        println!("{} memos could not be decoded", rejected.len());
    }

    owner_client.disconnect().await;
    Ok(())
}

fn client_for(
    config: &LedgerConfig,
    ledger: &Arc<MemoryLedger>,
    account: Address,
) -> Result<LedgerClient> {
    let provider = Arc::new(StaticProvider::new(vec![account]));
    Ok(LedgerClient::new(config.clone(), ledger.clone(), Some(provider))?)
}

fn print_balances(ledger: &MemoryLedger, accounts: &[Address], decimals: u32) {
    for (i, account) in accounts.iter().enumerate() {
        print_balance(&format!("Address {} ({})", i, account), ledger.balance_of(*account), decimals);
    }
    print_balance("Contract", ledger.contract_balance(), decimals);
}

fn print_balance(label: &str, balance: Amount, decimals: u32) {
    println!("  {} balance: {}", label, format_amount(balance, decimals));
}
