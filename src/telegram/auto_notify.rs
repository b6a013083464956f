use teloxide::payloads::SendMessageSetters;
use teloxide::requests::Requester;
use teloxide::types::{ChatId, ParseMode};
use teloxide::Bot;
use tracing::{error, info};

use crate::claim::engine::CycleResult;
use crate::config::Config;
use crate::utils::{format_coins_plain, format_id};

/// Push notifications for the unattended service. Constructed from the
/// optional telegram config section; absent config means no notifier and no
/// behavioral difference anywhere else.
pub struct AutoNotifier {
    bot: Bot,
    chat_ids: Vec<i64>,
    alert_threshold_nano: u64,
}

impl AutoNotifier {
    pub fn new(config: &Config) -> Option<Self> {
        let telegram = config.telegram.as_ref()?;

        if !telegram.notifications_enabled {
            info!("Telegram notifications are disabled in config");
            return None;
        }
        if telegram.chat_ids.is_empty() {
            info!("No chats configured for notifications");
            return None;
        }

        info!(
            "Auto-notifier initialized for {} chat(s)",
            telegram.chat_ids.len()
        );

        Some(Self {
            bot: Bot::new(telegram.bot_token.clone()),
            chat_ids: telegram.chat_ids.clone(),
            alert_threshold_nano: telegram.alert_threshold_nano,
        })
    }

    /// Summary after each cycle that did something or went wrong.
    pub async fn notify_cycle_complete(&self, result: &CycleResult) {
        if result.successful_tx_count == 0
            && result.failed_tx_count == 0
            && result.errors.is_empty()
        {
            return; // quiet cycles stay quiet
        }

        let emoji = if result.errors.is_empty() { "🌾" } else { "⚠️" };
        let mut message = format!(
            "{} *Harvest Cycle Complete*\n\n\
            📦 Boxes claimed: {}\n\
            ✅ Transactions: {}\n\
            ❌ Failed: {}\n\
            💰 Rent collected: *{}*\n\
            🔥 Fees paid: {}",
            emoji,
            result.processed_boxes,
            result.successful_tx_count,
            result.failed_tx_count,
            format_coins_plain(result.total_rent_collected),
            format_coins_plain(result.total_fees_paid),
        );

        if !result.errors.is_empty() {
            message.push_str(&format!("\n\n⚠️ {} error(s), check the logs", result.errors.len()));
        }

        self.send_to_all(&message).await;
    }

    /// Alert for a single claim above the configured threshold.
    pub async fn notify_high_value_claim(&self, tx_id: &str, rent: u128) {
        if rent < u128::from(self.alert_threshold_nano) {
            return;
        }

        let message = format!(
            "💎 *High-Value Claim*\n\n\
            Transaction: `{}`\n\
            Rent collected: *{}*",
            format_id(tx_id),
            format_coins_plain(rent),
        );

        self.send_to_all(&message).await;
    }

    pub async fn notify_error(&self, error_msg: &str) {
        let message = format!(
            "⚠️ *Error Occurred*\n\n\
            {}\n\n\
            _Please check the system logs_",
            error_msg
        );

        self.send_to_all(&message).await;
    }

    async fn send_to_all(&self, message: &str) {
        for chat_id in &self.chat_ids {
            if let Err(e) = self
                .bot
                .send_message(ChatId(*chat_id), message)
                .parse_mode(ParseMode::Markdown)
                .await
            {
                error!("Failed to send notification to chat {}: {}", chat_id, e);
            }
        }
    }
}
