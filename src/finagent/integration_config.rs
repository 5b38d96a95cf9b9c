//! Enabled-source resolution per data type, with environment-variable overrides.
//!
//! Mirrors the source system's `integration_config.py`: a fixed preferred-order table per data
//! type, and a per-integration enabled flag that an `ENABLE_<UPPER>` environment variable always
//! wins over.

use std::collections::HashMap;
use std::env;

/// One of the external finance data sources.
pub const YAHOO_FINANCE: &str = "yahoo_finance";
pub const ALPHA_VANTAGE: &str = "alpha_vantage";
pub const FMP: &str = "fmp";

/// Preferred source order for a single data type, matching spec §4.4's table exactly.
pub struct DataSourceMapping {
    pub preferred: &'static [&'static str],
    pub description: &'static str,
}

fn data_source_mapping() -> HashMap<&'static str, DataSourceMapping> {
    let mut mapping = HashMap::new();
    mapping.insert(
        "stock_price",
        DataSourceMapping {
            preferred: &[YAHOO_FINANCE, ALPHA_VANTAGE, FMP],
            description: "Real-time stock price data",
        },
    );
    mapping.insert(
        "company_info",
        DataSourceMapping {
            preferred: &[YAHOO_FINANCE, FMP, ALPHA_VANTAGE],
            description: "Company profile and information",
        },
    );
    mapping.insert(
        "financial_statements",
        DataSourceMapping {
            preferred: &[FMP, YAHOO_FINANCE],
            description: "Income statement, balance sheet, cash flow",
        },
    );
    mapping.insert(
        "news",
        DataSourceMapping {
            preferred: &[YAHOO_FINANCE, FMP],
            description: "Company news and press releases",
        },
    );
    mapping.insert(
        "historical_data",
        DataSourceMapping {
            preferred: &[YAHOO_FINANCE],
            description: "Historical price data",
        },
    );
    mapping.insert(
        "technical_indicators",
        DataSourceMapping {
            preferred: &[ALPHA_VANTAGE],
            description: "Technical analysis indicators",
        },
    );
    mapping
}

/// Per-integration enable/disable state with environment-variable override resolution.
///
/// Construct with [`IntegrationConfig::new`], supplying the base enabled state for each
/// integration (defaults to all enabled if omitted). `ENABLE_<INTEGRATION_UPPER>` always wins
/// over whatever base state was supplied.
pub struct IntegrationConfig {
    base_enabled: HashMap<String, bool>,
    mapping: HashMap<&'static str, DataSourceMapping>,
}

impl IntegrationConfig {
    pub fn new() -> Self {
        let mut base_enabled = HashMap::new();
        base_enabled.insert(YAHOO_FINANCE.to_string(), true);
        base_enabled.insert(ALPHA_VANTAGE.to_string(), true);
        base_enabled.insert(FMP.to_string(), true);
        IntegrationConfig {
            base_enabled,
            mapping: data_source_mapping(),
        }
    }

    /// Override the base (pre-env-var) enabled state for one integration, e.g. to disable an
    /// integration whose API key is absent from [`crate::config::CoreConfig`].
    pub fn with_base_enabled(mut self, integration: &str, enabled: bool) -> Self {
        self.base_enabled.insert(integration.to_string(), enabled);
        self
    }

    /// `ENABLE_<UPPER>` env var wins over the base config; default true for unknown names.
    pub fn is_enabled(&self, integration_name: &str) -> bool {
        let env_var = format!("ENABLE_{}", integration_name.to_uppercase());
        if let Ok(value) = env::var(&env_var) {
            return matches!(value.to_lowercase().as_str(), "true" | "1" | "yes" | "on");
        }
        *self.base_enabled.get(integration_name).unwrap_or(&true)
    }

    /// Intersect the preferred order for `data_type` with the enabled set, preserving order.
    pub fn enabled_sources_for_data_type(&self, data_type: &str) -> Vec<&'static str> {
        match self.mapping.get(data_type) {
            Some(entry) => entry
                .preferred
                .iter()
                .copied()
                .filter(|source| self.is_enabled(source))
                .collect(),
            None => {
                log::warn!("unknown data type: {}", data_type);
                Vec::new()
            }
        }
    }

    pub fn data_source_mapping(&self) -> &HashMap<&'static str, DataSourceMapping> {
        &self.mapping
    }
}

impl Default for IntegrationConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Environment variable mutation races across tests in the same process; these tests
    // serialize via a lock so ENABLE_* overrides don't leak between each other.
    lazy_static::lazy_static! {
        static ref ENV_LOCK: Mutex<()> = Mutex::new(());
    }

    #[test]
    fn stock_price_preferred_order_matches_spec_table() {
        let _guard = ENV_LOCK.lock().unwrap();
        let config = IntegrationConfig::new();
        assert_eq!(
            config.enabled_sources_for_data_type("stock_price"),
            vec![YAHOO_FINANCE, ALPHA_VANTAGE, FMP]
        );
    }

    #[test]
    fn env_override_disables_an_otherwise_enabled_source() {
        let _guard = ENV_LOCK.lock().unwrap();
        env::set_var("ENABLE_ALPHA_VANTAGE", "false");
        let config = IntegrationConfig::new();
        assert_eq!(
            config.enabled_sources_for_data_type("stock_price"),
            vec![YAHOO_FINANCE, FMP]
        );
        env::remove_var("ENABLE_ALPHA_VANTAGE");
    }

    #[test]
    fn env_override_wins_over_base_disabled_state() {
        let _guard = ENV_LOCK.lock().unwrap();
        env::set_var("ENABLE_FMP", "true");
        let config = IntegrationConfig::new().with_base_enabled(FMP, false);
        assert!(config.is_enabled(FMP));
        env::remove_var("ENABLE_FMP");
    }

    #[test]
    fn unknown_data_type_yields_empty_sources() {
        let _guard = ENV_LOCK.lock().unwrap();
        let config = IntegrationConfig::new();
        assert!(config.enabled_sources_for_data_type("nonexistent").is_empty());
    }
}
