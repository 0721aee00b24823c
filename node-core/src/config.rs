//! Reading the node core's tunables from a TOML file.
//!
//! Every field is optional in the file; missing fields fall back to the
//! defaults in [`crate::constants`].
//!
//! ```toml
//! [pay]
//! max-attempts = 5
//! max-parallel = 2
//! deadline-ms = 30000
//!
//! [reconcile]
//! spend-confirmations = 3
//!
//! [invoice]
//! wait-timeout-ms = 5000
//! ```

use std::{fs, path::Path, time::Duration};

use anyhow::{Context, ensure};
use common::backoff::Backoff;
use serde::Deserialize;

use crate::constants::{
    DEFAULT_INVOICE_WAIT_TIMEOUT, DEFAULT_MAX_PARALLEL_ROUTES,
    DEFAULT_MAX_PAY_ATTEMPTS, DEFAULT_PAY_DEADLINE,
    DEFAULT_PAY_INITIAL_BACKOFF_MS, DEFAULT_PAY_MAX_BACKOFF_MS,
    DEFAULT_SPEND_CONFIRMATIONS,
};

/// Fully resolved node core configuration.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct CoreConfig {
    pub pay: PayConfig,
    pub reconcile: ReconcileConfig,
    pub invoice: InvoiceConfig,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PayConfig {
    pub max_attempts: u32,
    pub max_parallel: usize,
    /// `None` disables the overall deadline.
    pub deadline: Option<Duration>,
    pub backoff: Backoff,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ReconcileConfig {
    pub spend_confirmations: u32,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct InvoiceConfig {
    pub wait_timeout: Duration,
}

impl Default for PayConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_PAY_ATTEMPTS,
            max_parallel: DEFAULT_MAX_PARALLEL_ROUTES,
            deadline: Some(DEFAULT_PAY_DEADLINE),
            backoff: Backoff {
                initial_wait_ms: DEFAULT_PAY_INITIAL_BACKOFF_MS,
                maximum_wait_ms: DEFAULT_PAY_MAX_BACKOFF_MS,
            },
        }
    }
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            spend_confirmations: DEFAULT_SPEND_CONFIRMATIONS,
        }
    }
}

impl Default for InvoiceConfig {
    fn default() -> Self {
        Self {
            wait_timeout: DEFAULT_INVOICE_WAIT_TIMEOUT,
        }
    }
}

impl CoreConfig {
    /// Read and resolve a [`CoreConfig`] from a TOML file at `path`.
    pub fn read(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let toml_str = fs::read_to_string(path)
            .with_context(|| format!("{path:?}"))
            .context("Failed to read config file")?;
        Self::from_toml_str(&toml_str)
    }

    pub fn from_toml_str(toml_str: &str) -> anyhow::Result<Self> {
        let raw = toml::from_str::<RawConfig>(toml_str)
            .context("Failed to deserialize config")?;
        Self::try_from(raw)
    }
}

impl TryFrom<RawConfig> for CoreConfig {
    type Error = anyhow::Error;

    fn try_from(raw: RawConfig) -> anyhow::Result<Self> {
        let RawConfig {
            pay,
            reconcile,
            invoice,
        } = raw;

        let pay_default = PayConfig::default();
        let max_attempts = pay.max_attempts.unwrap_or(pay_default.max_attempts);
        let max_parallel = pay.max_parallel.unwrap_or(pay_default.max_parallel);
        ensure!(max_attempts > 0, "pay.max-attempts must be positive");
        ensure!(max_parallel > 0, "pay.max-parallel must be positive");

        // A zero deadline means "no deadline".
        let deadline = match pay.deadline_ms {
            Some(0) => None,
            Some(ms) => Some(Duration::from_millis(ms)),
            None => pay_default.deadline,
        };

        let initial_wait_ms = pay
            .initial_backoff_ms
            .unwrap_or(pay_default.backoff.initial_wait_ms);
        let maximum_wait_ms = pay
            .max_backoff_ms
            .unwrap_or(pay_default.backoff.maximum_wait_ms);
        ensure!(
            initial_wait_ms <= maximum_wait_ms,
            "pay.initial-backoff-ms ({initial_wait_ms}) exceeds \
             pay.max-backoff-ms ({maximum_wait_ms})"
        );

        let spend_confirmations = reconcile
            .spend_confirmations
            .unwrap_or(DEFAULT_SPEND_CONFIRMATIONS);

        let wait_timeout = invoice
            .wait_timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_INVOICE_WAIT_TIMEOUT);

        Ok(Self {
            pay: PayConfig {
                max_attempts,
                max_parallel,
                deadline,
                backoff: Backoff {
                    initial_wait_ms,
                    maximum_wait_ms,
                },
            },
            reconcile: ReconcileConfig {
                spend_confirmations,
            },
            invoice: InvoiceConfig { wait_timeout },
        })
    }
}

// --- Raw (file) representation --- //

#[derive(Default, Deserialize, Debug)]
#[serde(default, deny_unknown_fields)]
struct RawConfig {
    pay: RawPay,
    reconcile: RawReconcile,
    invoice: RawInvoice,
}

#[derive(Default, Deserialize, Debug)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
struct RawPay {
    max_attempts: Option<u32>,
    max_parallel: Option<usize>,
    deadline_ms: Option<u64>,
    initial_backoff_ms: Option<u64>,
    max_backoff_ms: Option<u64>,
}

#[derive(Default, Deserialize, Debug)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
struct RawReconcile {
    spend_confirmations: Option<u32>,
}

#[derive(Default, Deserialize, Debug)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
struct RawInvoice {
    wait_timeout_ms: Option<u64>,
}
