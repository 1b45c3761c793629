//! Client configuration

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::amount::{parse_amount, MAX_DECIMALS};
use crate::error::{LedgerError, Result};
use crate::schema::{SchemaDescriptor, SchemaVersion};
use crate::types::{Address, Amount};

/// A fixed-price item offered by the storefront
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    /// Label recorded on-ledger with the purchase
    pub label: String,
    /// Decimal price in the ledger's major unit
    pub price: String,
}

impl Product {
    pub fn new(label: impl Into<String>, price: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            price: price.into(),
        }
    }
}

/// Ledger client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Ledger network endpoint
    pub endpoint: String,
    /// Deployed contract address
    pub contract_address: Address,
    /// Tuple layout of the deployed contract
    pub schema_version: SchemaVersion,
    /// Fractional digits of the ledger currency
    pub decimals: u32,
    /// Name recorded when the user leaves it empty
    pub default_display_name: String,
    /// Message recorded when the user leaves it empty
    pub default_message: String,
    /// Stop waiting for confirmation after this many seconds (none = wait forever)
    pub confirmation_timeout_secs: Option<u64>,
    /// How many trailing records are checked for duplicate deliveries
    pub dedup_window: usize,
    /// Storefront catalog
    pub products: Vec<Product>,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        LedgerConfig {
            endpoint: "http://127.0.0.1:8545".to_string(),
            contract_address: Address::ZERO,
            schema_version: SchemaVersion::V2,
            decimals: 18,
            default_display_name: "Anonymous".to_string(),
            default_message: "None.".to_string(),
            confirmation_timeout_secs: None,
            dedup_window: 64,
            products: vec![
                Product::new("Coffee", "0.001"),
                Product::new("Large Coffee", "0.003"),
            ],
        }
    }
}

impl LedgerConfig {
    /// Load configuration from a JSON file; missing keys take defaults
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        let config: LedgerConfig = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Check internal consistency
    pub fn validate(&self) -> Result<()> {
        if self.decimals > MAX_DECIMALS {
            return Err(LedgerError::Config(format!(
                "decimals must be at most {}, got {}",
                MAX_DECIMALS, self.decimals
            )));
        }
        if self.dedup_window == 0 {
            return Err(LedgerError::Config("dedup_window must be at least 1".to_string()));
        }
        if self.endpoint.trim().is_empty() {
            return Err(LedgerError::Config("endpoint must not be empty".to_string()));
        }
        if self.confirmation_timeout_secs == Some(0) {
            return Err(LedgerError::Config(
                "confirmation_timeout_secs must be positive when set".to_string(),
            ));
        }
        for product in &self.products {
            parse_amount(&product.price, self.decimals).map_err(|e| {
                LedgerError::Config(format!("product `{}`: {}", product.label, e))
            })?;
        }
        Ok(())
    }

    pub fn schema(&self) -> SchemaDescriptor {
        SchemaDescriptor::for_version(self.schema_version)
    }

    pub fn confirmation_timeout(&self) -> Option<Duration> {
        self.confirmation_timeout_secs.map(Duration::from_secs)
    }

    /// Look up a catalog entry by label (case-insensitive)
    pub fn product(&self, label: &str) -> Option<&Product> {
        self.products
            .iter()
            .find(|p| p.label.eq_ignore_ascii_case(label))
    }

    /// Catalog price of a product in minor units
    pub fn product_price(&self, label: &str) -> Result<Amount> {
        let product = self
            .product(label)
            .ok_or_else(|| LedgerError::Config(format!("unknown product `{}`", label)))?;
        parse_amount(&product.price, self.decimals)
    }

    pub fn with_schema_version(mut self, version: SchemaVersion) -> Self {
        self.schema_version = version;
        self
    }

    pub fn with_contract_address(mut self, address: Address) -> Self {
        self.contract_address = address;
        self
    }

    pub fn with_confirmation_timeout(mut self, timeout: Duration) -> Self {
        self.confirmation_timeout_secs = Some(timeout.as_secs().max(1));
        self
    }
}
