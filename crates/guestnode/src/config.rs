// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration for guestnode.

use std::str::FromStr;
use std::time::Duration;

use crate::extract::DEFAULT_DYNAMIC_SCAN_LIMIT;
use crate::provider::ProviderKind;
use crate::rendezvous::RendezvousConfig;

/// Guestnode configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Worker executable launched once per host-capacity slot
    pub worker_program: String,
    /// Fixed worker arguments placed after the dynamic properties
    pub worker_args: Vec<String>,
    /// Providers to probe, in registration order
    pub providers: Vec<ProviderKind>,
    /// Sleep between two unsuccessful probe passes
    pub probe_interval: Duration,
    /// Loopback rendezvous tuning (timeouts and circuit breakers)
    pub rendezvous: RendezvousConfig,
    /// Upper bound on `dynamic.<n>` lookups
    pub dynamic_scan_limit: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            worker_program: "java".to_string(),
            worker_args: Vec::new(),
            providers: ProviderKind::ALL.to_vec(),
            probe_interval: Duration::from_secs(10),
            rendezvous: RendezvousConfig::default(),
            dynamic_scan_limit: DEFAULT_DYNAMIC_SCAN_LIMIT,
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    ///
    /// Unset variables fall back to [`Config::default`].
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let worker_program = lookup("GUESTNODE_WORKER_PROGRAM")
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or(defaults.worker_program);

        let worker_args = lookup("GUESTNODE_WORKER_ARGS")
            .map(|v| v.split_whitespace().map(str::to_string).collect())
            .unwrap_or(defaults.worker_args);

        let providers = match lookup("GUESTNODE_PROVIDERS") {
            Some(list) => parse_providers(&list)?,
            None => defaults.providers,
        };

        let probe_interval = Duration::from_secs(parse_var(
            &lookup,
            "GUESTNODE_PROBE_INTERVAL_SECS",
            defaults.probe_interval.as_secs(),
        )?);

        let rendezvous = RendezvousConfig {
            accept_timeout: Duration::from_secs(parse_var(
                &lookup,
                "GUESTNODE_ACCEPT_TIMEOUT_SECS",
                defaults.rendezvous.accept_timeout.as_secs(),
            )?),
            recv_timeout: Duration::from_secs(parse_var(
                &lookup,
                "GUESTNODE_RECV_TIMEOUT_SECS",
                defaults.rendezvous.recv_timeout.as_secs(),
            )?),
            accept_max_attempts: parse_attempts(
                &lookup,
                "GUESTNODE_ACCEPT_MAX_ATTEMPTS",
                defaults.rendezvous.accept_max_attempts,
            )?,
            recv_max_attempts: parse_attempts(
                &lookup,
                "GUESTNODE_RECV_MAX_ATTEMPTS",
                defaults.rendezvous.recv_max_attempts,
            )?,
            buffer_size: defaults.rendezvous.buffer_size,
        };

        let dynamic_scan_limit = parse_var(
            &lookup,
            "GUESTNODE_DYNAMIC_SCAN_LIMIT",
            defaults.dynamic_scan_limit,
        )?;

        Ok(Self {
            worker_program,
            worker_args,
            providers,
            probe_interval,
            rendezvous,
            dynamic_scan_limit,
        })
    }
}

fn parse_var<F, T>(lookup: &F, var: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(var) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue { var, value: raw }),
        None => Ok(default),
    }
}

fn parse_attempts<F>(lookup: &F, var: &'static str, default: u32) -> Result<u32, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let attempts = parse_var(lookup, var, default)?;
    if attempts == 0 {
        return Err(ConfigError::InvalidValue {
            var,
            value: "0".to_string(),
        });
    }
    Ok(attempts)
}

fn parse_providers(list: &str) -> Result<Vec<ProviderKind>, ConfigError> {
    let providers = list
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.parse().map_err(ConfigError::UnknownProvider))
        .collect::<Result<Vec<_>, _>>()?;

    if providers.is_empty() {
        return Err(ConfigError::NoProviders);
    }
    Ok(providers)
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A variable holds a value that cannot be parsed.
    #[error("Invalid value for {var}: {value:?}")]
    InvalidValue {
        /// Variable name.
        var: &'static str,
        /// Raw value found in the environment.
        value: String,
    },
    /// A provider name is not recognised.
    #[error("Unknown provider: {0}")]
    UnknownProvider(String),
    /// The provider list is empty.
    #[error("At least one provider must be configured")]
    NoProviders,
}
