mod cli;

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use colored::*;
use indicatif::ProgressBar;
use tracing::{error, info};

use cli::{Cli, Commands};
use rent_harvester::claim::HarvestEngine;
use rent_harvester::config::{Config, FeePolicy};
use rent_harvester::error::HarvestError;
use rent_harvester::node::{LedgerNode, NodeHttpClient};
use rent_harvester::signer::{ContextClaimProver, NodeWalletSigner, Signer};
use rent_harvester::storage::Database;
use rent_harvester::telegram::AutoNotifier;
use rent_harvester::{utils, Result};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rent_harvester=debug,info".into()),
        )
        .init();

    let cli = Cli::parse();

    let config = match Config::load_from(&cli.config) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Init => initialize(&config),

        Commands::Scan { verbose, limit } => {
            info!("Scanning the box index...");
            scan_index(&config, verbose, limit).await
        }

        Commands::Run { dry_run } => {
            info!("Running a single harvest cycle...");
            run_once(&config, dry_run).await
        }

        Commands::Auto { interval, dry_run } => {
            info!("Starting harvest service (interval: {}s)", interval);
            run_auto_service(&config, interval, dry_run).await
        }

        Commands::Status => show_status(&config),

        Commands::Stats { format } => show_stats(&config, &format),

        Commands::Reset { yes } => reset_cursor(&config, yes),
    };

    if let Err(e) = result {
        error!("{}", format!("Error: {}", e).red());
        std::process::exit(1);
    }
}

fn build_node(config: &Config) -> Result<Arc<NodeHttpClient>> {
    Ok(Arc::new(NodeHttpClient::new(
        &config.node.url,
        config.node.timeout_secs,
        config.node.rate_limit_delay_ms,
    )?))
}

/// Pick the signer matching the fee policy: pure claim transactions need no
/// key material at all, wallet top-ups go through the node wallet.
fn build_signer(config: &Config) -> Result<Arc<dyn Signer>> {
    match config.claim.fee_policy {
        FeePolicy::RentFundsFee => Ok(Arc::new(ContextClaimProver)),
        FeePolicy::WalletUtxos => {
            let api_key = config.node.api_key.as_deref().ok_or_else(|| {
                HarvestError::Config(
                    "the wallet-utxos fee policy requires node.api_key".to_string(),
                )
            })?;
            Ok(Arc::new(NodeWalletSigner::new(
                &config.node.url,
                api_key,
                config.node.timeout_secs,
            )?))
        }
    }
}

fn build_engine(config: &Config, dry_run: bool) -> Result<HarvestEngine<NodeHttpClient>> {
    let node = build_node(config)?;
    let signer = build_signer(config)?;
    HarvestEngine::new(node, signer, config.clone(), dry_run)
}

fn initialize(config: &Config) -> Result<()> {
    println!("{}", "Initializing rent harvester...".green());
    let _db = Database::new(&config.database.path)?;
    println!("{}", "✓ Database initialized".green());
    println!("{}", "✓ Configuration loaded".green());
    println!("\n{}", "Configuration:".cyan());
    println!("  Node URL:        {}", config.node.url);
    println!("  Change address:  {}", config.wallet.change_address);
    println!("  Fee policy:      {:?}", config.claim.fee_policy);
    println!("  Min age:         {} blocks", config.rent.min_age_blocks);
    println!("  Max batch size:  {}", config.claim.max_batch_size);
    println!("  Dry run:         {}", config.claim.dry_run);

    println!("\n{}", "Ready to use! Try running:".cyan());
    println!("  {} to fill the queue", "rent-harvester scan --verbose".yellow());
    println!("  {} to claim once", "rent-harvester run".yellow());
    println!("  {} for the unattended service", "rent-harvester auto".yellow());
    Ok(())
}

async fn scan_index(config: &Config, verbose: bool, limit: Option<usize>) -> Result<()> {
    println!("{}", "Scanning the box index for rent candidates...".cyan());

    let mut config = config.clone();
    if let Some(limit) = limit {
        config.scan.target_count = limit;
    }

    let node = build_node(&config)?;
    let height = node.current_height().await?;
    let mut engine = build_engine(&config, true)?;

    let spinner = ProgressBar::new_spinner();
    spinner.set_message(format!("Walking the index at height {}...", height));
    spinner.enable_steady_tick(Duration::from_millis(120));

    let summary = engine.scan_once(height).await?;
    spinner.finish_and_clear();

    println!("\n{}", "=== Scan Results ===".cyan().bold());
    println!("Accepted this pass:  {}", summary.accepted.to_string().green());
    println!("Rejected on value:   {}", summary.value_rejected);
    println!("Beyond look-ahead:   {}", summary.skipped_far_future);
    println!("Queue depth now:     {}", summary.queued_total);
    if summary.exhausted {
        println!("{}", "Index exhausted; the cursor wrapped to the start".yellow());
    }

    let status = engine.status();
    if let Some(next) = status.next_eligible_height {
        println!("Next promotion at height {}", next);
    }

    if verbose {
        let db = Database::new(&config.database.path)?;
        let queued = db.boxes_by_status(rent_harvester::storage::BoxStatus::Queued)?;
        if !queued.is_empty() {
            println!("\n{}", "Queued Boxes:".yellow());
            utils::print_table_border(92);
            utils::print_table_row(&["Box Id", "Height", "Value", "Rent"], &[20, 10, 24, 24]);
            utils::print_table_border(92);
            for b in &queued {
                utils::print_table_row(
                    &[
                        &utils::format_id(&b.chain_box.box_id),
                        &b.chain_box.creation_height.to_string(),
                        &utils::format_coins_plain(u128::from(b.chain_box.value)),
                        &utils::format_coins_plain(b.rent_fee),
                    ],
                    &[20, 10, 24, 24],
                );
            }
            utils::print_table_border(92);
        }
    }

    Ok(())
}

async fn run_once(config: &Config, dry_run: bool) -> Result<()> {
    let mut engine = build_engine(config, dry_run)?;
    let result = engine.run_cycle().await;
    result.print_summary();
    Ok(())
}

async fn run_auto_service(config: &Config, interval: u64, dry_run: bool) -> Result<()> {
    println!("{}", "Starting automated harvest service...".green());
    println!("Interval: {} seconds", interval);
    println!("Dry run: {}", dry_run || config.claim.dry_run);

    let notifier = AutoNotifier::new(config);
    if notifier.is_some() {
        println!("{}", "✓ Telegram notifications enabled".green());
    }

    let mut engine = build_engine(config, dry_run)?;

    // One cycle at a time: the next one starts only after this one finishes,
    // so a slow cycle absorbs its trigger instead of overlapping it.
    loop {
        info!("Running harvest cycle...");
        let result = engine.run_cycle().await;

        if result.successful_tx_count > 0 || result.failed_tx_count > 0 {
            result.print_summary();
        }

        if let Some(ref n) = notifier {
            n.notify_cycle_complete(&result).await;
            for tx in &result.transactions {
                n.notify_high_value_claim(&tx.tx_id, tx.rent).await;
            }
        }

        tokio::time::sleep(Duration::from_secs(interval)).await;
    }
}

fn show_status(config: &Config) -> Result<()> {
    let db = Database::new(&config.database.path)?;
    let queued = db.boxes_by_status(rent_harvester::storage::BoxStatus::Queued)?;
    let claimable = db.boxes_by_status(rent_harvester::storage::BoxStatus::Claimable)?;
    let cursor = db.load_cursor()?;

    println!("{}", "=== Harvester Status ===".cyan().bold());
    println!("Queued boxes:     {}", queued.len());
    println!("Claimable boxes:  {}", claimable.len());
    println!("Scan offset:      {}", cursor.offset);
    println!("Last scan height: {}", cursor.last_scan_height);

    if let Some(next) = queued
        .iter()
        .map(|b| u64::from(b.chain_box.creation_height) + u64::from(config.rent.min_age_blocks) + 1)
        .min()
    {
        let ids: Vec<String> = queued
            .iter()
            .filter(|b| {
                u64::from(b.chain_box.creation_height) + u64::from(config.rent.min_age_blocks) + 1
                    == next
            })
            .map(|b| utils::format_id(&b.chain_box.box_id))
            .collect();
        println!("Next promotion at height {} ({})", next, ids.join(", "));
    }

    Ok(())
}

fn show_stats(config: &Config, format: &str) -> Result<()> {
    let db = Database::new(&config.database.path)?;
    let stats = db.stats()?;

    if format == "json" {
        let json = serde_json::json!({
            "queued_boxes": stats.queued_boxes,
            "claimable_boxes": stats.claimable_boxes,
            "in_flight_boxes": stats.in_flight_boxes,
            "confirmed_boxes": stats.confirmed_boxes,
            "error_boxes": stats.error_boxes,
            "total_txs": stats.total_txs,
            "pending_txs": stats.pending_txs,
            "confirmed_txs": stats.confirmed_txs,
            "failed_txs": stats.failed_txs,
            "total_rent_collected": stats.total_rent_collected.to_string(),
            "total_fees_paid": stats.total_fees_paid.to_string(),
            "wallet_balance": stats.wallet_balance.map(|b| b.to_string()),
        });
        println!("{}", serde_json::to_string_pretty(&json)?);
        return Ok(());
    }

    println!("{}", "=== Storage-Rent Harvest Statistics ===".cyan().bold());
    println!("\nBoxes:");
    println!("  Queued:     {}", stats.queued_boxes);
    println!("  Claimable:  {}", stats.claimable_boxes.to_string().green());
    println!("  In flight:  {}", stats.in_flight_boxes);
    println!("  Confirmed:  {}", stats.confirmed_boxes.to_string().cyan());
    println!("  Error:      {}", stats.error_boxes.to_string().yellow());

    println!("\nTransactions:");
    println!("  Total:      {}", stats.total_txs);
    println!("  Pending:    {}", stats.pending_txs);
    println!("  Confirmed:  {}", stats.confirmed_txs);
    println!("  Failed:     {}", stats.failed_txs);
    println!("  Rent:       {}", utils::format_coins(stats.total_rent_collected));
    println!("  Fees:       {}", utils::format_coins(stats.total_fees_paid));

    if let Some(balance) = stats.wallet_balance {
        println!("\nWallet balance: {}", utils::format_coins(balance));
    }

    let history = db.recent_transactions(10)?;
    if !history.is_empty() {
        println!("\n{}", "Recent Claim Transactions:".yellow());
        utils::print_table_border(100);
        utils::print_table_row(
            &["Timestamp", "Tx Id", "Boxes", "Rent", "Status"],
            &[22, 20, 6, 24, 10],
        );
        utils::print_table_border(100);

        for tx in history {
            utils::print_table_row(
                &[
                    &utils::format_timestamp(&tx.created_at),
                    &utils::format_id(&tx.tx_id),
                    &tx.box_ids.len().to_string(),
                    &utils::format_coins_plain(tx.total_rent),
                    &tx.status.to_string(),
                ],
                &[22, 20, 6, 24, 10],
            );
        }
        utils::print_table_border(100);
    }

    Ok(())
}

fn reset_cursor(config: &Config, yes: bool) -> Result<()> {
    if !yes && !utils::confirm_action("Reset the scan cursor and rescan the whole index?") {
        println!("Cancelled");
        return Ok(());
    }

    let db = Database::new(&config.database.path)?;
    db.reset_cursor()?;
    println!("{}", "✓ Scan cursor reset; the next cycle starts from the beginning".green());
    Ok(())
}
