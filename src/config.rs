use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub node: NodeConfig,
    pub wallet: WalletConfig,
    pub rent: RentConfig,
    pub scan: ScanConfig,
    pub claim: ClaimConfig,
    pub monitor: MonitorConfig,
    pub database: DatabaseConfig,
    pub telegram: Option<TelegramConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct NodeConfig {
    pub url: String,
    pub api_key: Option<String>,
    pub timeout_secs: u64,
    pub rate_limit_delay_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct WalletConfig {
    /// Address credited with collected rent and debited for fee top-ups.
    pub change_address: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RentConfig {
    pub fee_per_byte: u64,
    pub min_value_per_byte: u64,
    pub min_age_blocks: u32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ScanConfig {
    pub page_size: usize,
    pub target_count: usize,
    pub rescan_interval_blocks: u32,
    pub look_ahead_blocks: u32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ClaimConfig {
    pub max_batch_size: usize,
    pub network_fee: u64,
    pub fee_policy: FeePolicy,
    pub batch_delay_secs: u64,
    pub dry_run: bool,
}

/// How the network fee of a claim transaction is sourced.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum FeePolicy {
    /// Deduct the fee from collected rent; the batch fails if rent cannot
    /// cover it.
    RentFundsFee,
    /// Cover a fee shortfall by pulling spendable wallet boxes.
    WalletUtxos,
}

#[derive(Debug, Deserialize, Clone)]
pub struct MonitorConfig {
    pub poll_interval_secs: u64,
    pub max_attempts: u32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub path: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TelegramConfig {
    pub bot_token: String,
    pub chat_ids: Vec<i64>,
    pub notifications_enabled: bool,
    /// Claims above this many nanounits trigger a dedicated alert.
    pub alert_threshold_nano: u64,
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from("config/default")
    }

    pub fn load_from(path: &str) -> anyhow::Result<Self> {
        dotenv::dotenv().ok();

        let config = config::Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(config::Environment::with_prefix("HARVESTER").separator("__"))
            .build()?;

        Ok(config.try_deserialize()?)
    }
}
