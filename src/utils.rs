use colored::Colorize;

const NANOS_PER_COIN: u128 = 1_000_000_000;

/// Format a nanounit amount as a decimal coin string with color.
/// Integer arithmetic only; money never passes through floats.
pub fn format_coins(nanos: u128) -> String {
    format!("{}.{:09} ERG", nanos / NANOS_PER_COIN, nanos % NANOS_PER_COIN)
        .yellow()
        .to_string()
}

/// Plain (uncolored) variant for logs and notifications.
pub fn format_coins_plain(nanos: u128) -> String {
    format!("{}.{:09} ERG", nanos / NANOS_PER_COIN, nanos % NANOS_PER_COIN)
}

/// Format a box or transaction id truncated for display.
pub fn format_id(id: &str) -> String {
    if id.len() <= 12 {
        id.to_string()
    } else {
        format!("{}...{}", &id[..6], &id[id.len() - 6..])
    }
}

/// Format timestamp in human-readable format.
pub fn format_timestamp(timestamp: &chrono::DateTime<chrono::Utc>) -> String {
    timestamp.format("%Y-%m-%d %H:%M:%S UTC").to_string()
}

/// Minimum-delay rate limiter shared by node calls.
pub struct RateLimiter {
    delay: std::time::Duration,
    last_call: std::sync::Mutex<Option<std::time::Instant>>,
}

impl RateLimiter {
    pub fn new(delay_ms: u64) -> Self {
        Self {
            delay: std::time::Duration::from_millis(delay_ms),
            last_call: std::sync::Mutex::new(None),
        }
    }

    pub async fn wait(&self) {
        let remaining = {
            let mut last = self.last_call.lock().unwrap();
            match *last {
                Some(last_time) => {
                    let elapsed = last_time.elapsed();
                    if elapsed < self.delay {
                        Some(self.delay - elapsed)
                    } else {
                        *last = Some(std::time::Instant::now());
                        None
                    }
                }
                None => {
                    *last = Some(std::time::Instant::now());
                    None
                }
            }
        };

        if let Some(remaining) = remaining {
            tokio::time::sleep(remaining).await;
            *self.last_call.lock().unwrap() = Some(std::time::Instant::now());
        }
    }
}

/// Prompt user for yes/no confirmation.
pub fn confirm_action(prompt: &str) -> bool {
    use std::io::{self, Write};

    print!("{} (y/N): ", prompt);
    let _ = io::stdout().flush();

    let mut input = String::new();
    if io::stdin().read_line(&mut input).is_err() {
        return false;
    }

    matches!(input.trim().to_lowercase().as_str(), "y" | "yes")
}

/// Print a formatted table border.
pub fn print_table_border(width: usize) {
    println!("{}", "=".repeat(width));
}

/// Print a table row with columns.
pub fn print_table_row(columns: &[&str], widths: &[usize]) {
    let mut row = String::new();
    for (i, col) in columns.iter().enumerate() {
        if i < widths.len() {
            row.push_str(&format!("{:<width$}  ", col, width = widths[i]));
        }
    }
    println!("{}", row.trim_end());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_coins_plain() {
        assert_eq!(format_coins_plain(1_000_000_000), "1.000000000 ERG");
        assert_eq!(format_coins_plain(131_250_000), "0.131250000 ERG");
        assert_eq!(format_coins_plain(0), "0.000000000 ERG");
    }

    #[test]
    fn test_format_id() {
        assert_eq!(format_id("short"), "short");
        let long = "aabbccddeeff00112233445566778899";
        assert_eq!(format_id(long), "aabbcc...778899");
    }
}
