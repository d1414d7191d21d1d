//! Tracing setup and log-field helpers.

use crate::config::{LogFormat, LoggingConfig};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Installs the global subscriber. `RUST_LOG` takes precedence over the
/// configured level.
pub fn init_tracing(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.to_lowercase()));

    let registry = tracing_subscriber::registry().with(filter);
    let result = match config.format {
        LogFormat::Json => registry
            .with(fmt::layer().json().with_current_span(true).with_target(true))
            .try_init(),
        LogFormat::Plain => registry.with(fmt::layer().with_target(true)).try_init(),
    };

    if let Err(e) = result {
        eprintln!("tracing subscriber already initialised: {}", e);
    }
}

/// Keeps the last three digits of a subscriber number.
pub fn mask_phone_number(phone: &str) -> String {
    let digits: Vec<char> = phone.chars().collect();
    if digits.len() <= 3 {
        return "*".repeat(digits.len());
    }
    let visible: String = digits[digits.len() - 3..].iter().collect();
    format!("{}{}", "*".repeat(digits.len() - 3), visible)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phone_numbers_are_masked() {
        assert_eq!(mask_phone_number("0712345678"), "*******678");
        assert_eq!(mask_phone_number("12"), "**");
        assert_eq!(mask_phone_number(""), "");
    }
}
