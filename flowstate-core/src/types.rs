//! Core domain types for flowstate
//!
//! These types describe the raw rows handed to the pipeline by a
//! [`RowSource`](crate::source::RowSource).
//!
//! ## Terminology
//!
//! | Term | Definition |
//! |------|------------|
//! | **Chain** | Which execution environment produced a row (Cadence or EVM) |
//! | **Entity** | Whatever a row counts: a transaction id, an account address |
//! | **Dataset** | A family of rows (transactions, account activity, staking actions) |
//! | **Measure** | Optional numeric payload of a row (fee paid, amount staked) |

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================
// Chain
// ============================================

/// Execution environment a row belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Chain {
    /// Native Cadence transactions and accounts
    Cadence,
    /// EVM-equivalent transactions and accounts
    Evm,
}

impl Chain {
    /// All chains in display order.
    pub const ALL: [Chain; 2] = [Chain::Cadence, Chain::Evm];

    pub fn as_str(&self) -> &'static str {
        match self {
            Chain::Cadence => "cadence",
            Chain::Evm => "evm",
        }
    }

    /// Display name used in reports.
    pub fn display_name(&self) -> &'static str {
        match self {
            Chain::Cadence => "Cadence",
            Chain::Evm => "EVM",
        }
    }
}

impl std::str::FromStr for Chain {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "cadence" => Ok(Chain::Cadence),
            "evm" => Ok(Chain::Evm),
            _ => Err(format!("unknown chain: {}", s)),
        }
    }
}

impl std::fmt::Display for Chain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.display_name())
    }
}

// ============================================
// Dataset
// ============================================

/// Family of rows a query targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dataset {
    /// One row per transaction; `entity_id` is the transaction id/hash,
    /// `measure` the fee paid.
    Transactions,
    /// One row per account action; `entity_id` is the account address.
    Accounts,
    /// One row per staking action; `measure` is the amount staked.
    Staking,
}

impl Dataset {
    pub fn as_str(&self) -> &'static str {
        match self {
            Dataset::Transactions => "transactions",
            Dataset::Accounts => "accounts",
            Dataset::Staking => "staking",
        }
    }
}

impl std::str::FromStr for Dataset {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "transactions" => Ok(Dataset::Transactions),
            "accounts" => Ok(Dataset::Accounts),
            "staking" => Ok(Dataset::Staking),
            _ => Err(format!("unknown dataset: {}", s)),
        }
    }
}

// ============================================
// Event
// ============================================

/// A single raw row.
///
/// Rows are immutable once fetched. Distinct counts are taken over
/// `entity_id` within a bucket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Transaction id, account address, ...
    pub entity_id: String,
    /// When the row happened (block timestamp)
    pub timestamp: DateTime<Utc>,
    /// Chain the row came from
    pub category: Chain,
    /// Fee amount, staked amount, ...
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub measure: Option<f64>,
    /// Whether the transaction succeeded, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub succeeded: Option<bool>,
}

impl Event {
    /// Create a row with no measure and unknown outcome.
    pub fn new(entity_id: impl Into<String>, timestamp: DateTime<Utc>, category: Chain) -> Self {
        Self {
            entity_id: entity_id.into(),
            timestamp,
            category,
            measure: None,
            succeeded: None,
        }
    }

    /// Attach a measure.
    pub fn with_measure(mut self, measure: f64) -> Self {
        self.measure = Some(measure);
        self
    }

    /// Attach a success flag.
    pub fn with_succeeded(mut self, succeeded: bool) -> Self {
        self.succeeded = Some(succeeded);
        self
    }
}
