//! Configuration and validation: the one place that turns user-facing
//! strings/numbers into the validated, immutable pieces every other
//! component borrows.

use serde::{Deserialize, Serialize};

use crate::bank::{Bank, BankGeometry, BankTiming};
use crate::command::CommandReorderingPolicy;
use crate::controller::Controller;
use crate::decode::{AddressDecoder, AddressPolicy};
use crate::scheduler::RequestReorderingPolicy;
use crate::timing::TimingTable;

/// Fatal configuration failures: fail fast at construction. A plain enum
/// with a manual `Display`/`Error` impl rather than `thiserror`.
#[derive(Debug)]
pub enum ConfigError {
    UnknownTimingParameter(String),
    InvalidTimingValue { name: String, value: String },
    UnknownAddressPolicy(String),
    InvalidGeometry(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::UnknownTimingParameter(name) => {
                write!(f, "unknown mem_spec timing parameter '{name}'")
            }
            ConfigError::InvalidTimingValue { name, value } => {
                write!(f, "invalid cycle count '{value}' for timing parameter '{name}'")
            }
            ConfigError::UnknownAddressPolicy(tag) => {
                write!(f, "unknown address_policy '{tag}'")
            }
            ConfigError::InvalidGeometry(msg) => write!(f, "invalid bank geometry: {msg}"),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Per-bank geometry/timing overrides. One set of parameters applies
/// uniformly to every bank in this crate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BankConfig {
    pub num_rows: u32,
    pub num_columns: u32,
    pub column_element_size: u32,
    pub delay_open: u32,
    pub delay_close: u32,
    pub delay_read: u32,
    pub delay_write: u32,
    pub burst_length: u16,
}

impl Default for BankConfig {
    fn default() -> Self {
        Self {
            num_rows: 65536,
            num_columns: 1024,
            column_element_size: 8,
            delay_open: 50,
            delay_close: 50,
            delay_read: 20,
            delay_write: 20,
            burst_length: 4,
        }
    }
}

/// Plain-data configuration, deserializable from e.g. a JSON file handed
/// to the demo driver. `Config::build` is the sole path to a `Controller`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub num_banks: u32,
    pub num_banks_per_group: u32,
    pub num_memory_controllers: u32,
    pub write_allocate: bool,
    pub request_reordering_policy: String,
    pub command_reordering_policy: String,
    pub address_policy: String,
    pub unused_lsbs: u32,
    /// Ordered "NAME:cycles" pairs; see `TimingTable::set`.
    pub mem_spec: Vec<String>,
    pub bank: BankConfig,
    /// Forwarded to the demo driver's `tracing_subscriber` setup only;
    /// the library itself never reads environment or log state.
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            num_banks: 8,
            num_banks_per_group: 4,
            num_memory_controllers: 1,
            write_allocate: true,
            request_reordering_policy: "fifo".to_string(),
            command_reordering_policy: "fifo".to_string(),
            address_policy: "close_page".to_string(),
            unused_lsbs: 5,
            mem_spec: Vec::new(),
            bank: BankConfig::default(),
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    /// Parses `mem_spec` into a `TimingTable`. Unknown names are fatal;
    /// missing names default to 0.
    fn build_timing_table(&self) -> Result<TimingTable, ConfigError> {
        let mut table = TimingTable::default();
        for entry in &self.mem_spec {
            let (name, value) = entry.split_once(':').ok_or_else(|| {
                ConfigError::InvalidTimingValue {
                    name: entry.clone(),
                    value: String::new(),
                }
            })?;
            let cycles: u16 = value
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidTimingValue {
                    name: name.to_string(),
                    value: value.to_string(),
                })?;
            if !table.set(name.trim(), cycles) {
                return Err(ConfigError::UnknownTimingParameter(name.trim().to_string()));
            }
        }
        Ok(table)
    }

    /// Validates and wires up a complete `Controller`. Consumes `self`
    /// since every field is folded into the built components.
    pub fn build(self) -> Result<Controller, ConfigError> {
        let table = self.build_timing_table()?;

        let address_policy = AddressPolicy::from_str_tag(&self.address_policy)
            .ok_or_else(|| ConfigError::UnknownAddressPolicy(self.address_policy.clone()))?;

        let request_policy = RequestReorderingPolicy::from_str_tag(&self.request_reordering_policy)
            .unwrap_or_else(|| {
                tracing::warn!(
                    policy = %self.request_reordering_policy,
                    "unknown request_reordering_policy, falling back to fifo"
                );
                RequestReorderingPolicy::FifoRr
            });

        let command_policy = CommandReorderingPolicy::from_str_tag(&self.command_reordering_policy)
            .unwrap_or_else(|| {
                tracing::warn!(
                    policy = %self.command_reordering_policy,
                    "unknown command_reordering_policy, falling back to fifo"
                );
                CommandReorderingPolicy::Fifo
            });

        let decoder = AddressDecoder::new(
            address_policy,
            self.num_banks,
            self.num_banks_per_group,
            self.bank.num_rows,
            self.bank.num_columns,
            self.num_memory_controllers,
            self.unused_lsbs,
        )?;

        let geometry = BankGeometry {
            num_rows: self.bank.num_rows,
            num_columns: self.bank.num_columns,
            column_element_size: self.bank.column_element_size,
        };
        let timing = BankTiming {
            delay_open: self.bank.delay_open,
            delay_close: self.bank.delay_close,
            delay_read: self.bank.delay_read,
            delay_write: self.bank.delay_write,
            burst_length: self.bank.burst_length,
        };
        let banks: Vec<Bank> = (0..self.num_banks)
            .map(|id| Bank::new(id, geometry.clone(), timing.clone()))
            .collect();

        tracing::info!(
            num_banks = self.num_banks,
            address_policy = %self.address_policy,
            request_reordering_policy = %self.request_reordering_policy,
            command_reordering_policy = %self.command_reordering_policy,
            write_allocate = self.write_allocate,
            "controller configured"
        );

        Ok(Controller::new(
            banks,
            decoder,
            table,
            request_policy,
            command_policy,
            self.write_allocate,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_mem_spec_name_is_fatal() {
        let mut cfg = Config::default();
        cfg.mem_spec.push("BOGUS:10".to_string());
        let err = cfg.build().unwrap_err();
        assert!(matches!(err, ConfigError::UnknownTimingParameter(n) if n == "BOGUS"));
    }

    #[test]
    fn unknown_address_policy_is_fatal() {
        let mut cfg = Config::default();
        cfg.address_policy = "bogus".to_string();
        let err = cfg.build().unwrap_err();
        assert!(matches!(err, ConfigError::UnknownAddressPolicy(_)));
    }

    #[test]
    fn unknown_optional_policy_falls_back_to_default() {
        let mut cfg = Config::default();
        cfg.request_reordering_policy = "bogus".to_string();
        cfg.command_reordering_policy = "also_bogus".to_string();
        let controller = cfg.build().expect("falls back instead of erroring");
        assert!(controller.is_idle());
    }

    #[test]
    fn valid_mem_spec_sets_named_parameters() {
        let mut cfg = Config::default();
        cfg.mem_spec.push("RCDRD:12".to_string());
        cfg.mem_spec.push("rp : 13".to_string());
        let table = cfg.build_timing_table().unwrap();
        assert_eq!(table.rcdrd, 12);
        assert_eq!(table.rp, 13);
    }
}
