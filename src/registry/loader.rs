//! Target validation and the reloadable target registry

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use regex::Regex;

use super::config::{resolve_or, ConfigError, TargetConfig};
use super::target::{ActiveHours, ExpectedResponse, Protocol, Target};

/// Longest accepted check interval
pub const MAX_INTERVAL: Duration = Duration::from_secs(7 * 24 * 3600);
/// Longest accepted check timeout
pub const MAX_TIMEOUT: Duration = Duration::from_secs(3600);

/// Validate target entries into an ordered list of [`Target`]s.
///
/// Order follows the config file. Names must be unique.
pub fn load(configs: &[TargetConfig]) -> Result<Vec<Target>, ConfigError> {
    let mut seen = HashSet::new();
    let mut targets = Vec::with_capacity(configs.len());

    for (index, config) in configs.iter().enumerate() {
        let target = validate(index, config)?;
        if !seen.insert(target.name.clone()) {
            return Err(ConfigError::DuplicateTarget(target.name));
        }
        targets.push(target);
    }

    Ok(targets)
}

fn validate(index: usize, config: &TargetConfig) -> Result<Target, ConfigError> {
    let name = config.name.trim();
    if name.is_empty() {
        return Err(ConfigError::MissingField {
            scope: format!("targets[{index}]"),
            field: "name",
        });
    }
    let scope = format!("target '{name}'");

    let address = config.address.trim();
    if address.is_empty() {
        return Err(ConfigError::MissingField {
            scope,
            field: "address",
        });
    }

    let protocol = match &config.protocol {
        Some(p) => Protocol::parse(p).ok_or_else(|| ConfigError::UnknownProtocol {
            scope: scope.clone(),
            protocol: p.clone(),
        })?,
        None => Protocol::Http,
    };
    validate_address(&scope, address, protocol)?;

    let interval = resolve_or(
        &config.interval,
        &format!("{scope}.interval"),
        Duration::from_secs(60),
    )?;
    if interval.is_zero() {
        return Err(ConfigError::NonPositive {
            scope,
            field: "interval",
        });
    }
    if interval > MAX_INTERVAL {
        return Err(ConfigError::TooLong {
            scope,
            field: "interval",
            max: MAX_INTERVAL,
        });
    }

    let timeout = resolve_or(
        &config.timeout,
        &format!("{scope}.timeout"),
        Duration::from_secs(10),
    )?;
    if timeout.is_zero() {
        return Err(ConfigError::NonPositive {
            scope,
            field: "timeout",
        });
    }
    if timeout > MAX_TIMEOUT {
        return Err(ConfigError::TooLong {
            scope,
            field: "timeout",
            max: MAX_TIMEOUT,
        });
    }

    let failure_threshold = config.failure_threshold.unwrap_or(1);
    if failure_threshold == 0 {
        return Err(ConfigError::NonPositive {
            scope,
            field: "failure_threshold",
        });
    }

    let expect = match &config.expect {
        Some(expect) => {
            if protocol == Protocol::Tcp
                && (!expect.status.is_empty()
                    || expect.body_contains.is_some()
                    || expect.body_regex.is_some())
            {
                return Err(ConfigError::InvalidCriteria {
                    scope,
                    reason: "tcp targets cannot have response criteria".to_string(),
                });
            }
            let body_regex = match &expect.body_regex {
                Some(pattern) => Some(Regex::new(pattern).map_err(|e| {
                    ConfigError::InvalidCriteria {
                        scope: scope.clone(),
                        reason: e.to_string(),
                    }
                })?),
                None => None,
            };
            ExpectedResponse {
                status: expect.status.clone(),
                body_contains: expect.body_contains.clone(),
                body_regex,
            }
        }
        None => ExpectedResponse::default(),
    };

    let active_hours = match &config.active_hours {
        Some(hours) => Some(
            ActiveHours::new(hours.utc_offset_hours, hours.weekdays_only, &hours.windows)
                .map_err(|reason| ConfigError::InvalidSchedule {
                    scope: scope.clone(),
                    reason,
                })?,
        ),
        None => None,
    };

    Ok(Target {
        name: name.to_string(),
        address: address.to_string(),
        protocol,
        timeout,
        interval,
        failure_threshold,
        expect,
        active_hours,
    })
}

fn validate_address(scope: &str, address: &str, protocol: Protocol) -> Result<(), ConfigError> {
    let invalid = |reason: &str| ConfigError::InvalidAddress {
        scope: scope.to_string(),
        address: address.to_string(),
        reason: reason.to_string(),
    };

    match protocol {
        Protocol::Http => {
            let url = reqwest::Url::parse(address).map_err(|e| invalid(&e.to_string()))?;
            if !matches!(url.scheme(), "http" | "https") {
                return Err(invalid("scheme must be http or https"));
            }
            if url.host_str().is_none() {
                return Err(invalid("missing host"));
            }
        }
        Protocol::Tcp => {
            let (host, port) = address
                .rsplit_once(':')
                .ok_or_else(|| invalid("expected host:port"))?;
            if host.is_empty() {
                return Err(invalid("missing host"));
            }
            if port.parse::<u16>().is_err() {
                return Err(invalid("port must be 0-65535"));
            }
        }
    }
    Ok(())
}

/// Changes between two target lists
#[derive(Debug, Default)]
pub struct RegistryDiff {
    /// Targets that did not exist before
    pub added: Vec<Arc<Target>>,
    /// Names of targets that are gone
    pub removed: Vec<String>,
    /// Targets whose definition changed
    pub changed: Vec<Arc<Target>>,
}

impl RegistryDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.changed.is_empty()
    }
}

/// Holds the current target list.
///
/// Readers get a cheap snapshot; `reload` swaps the whole list at once.
pub struct TargetRegistry {
    targets: RwLock<Arc<Vec<Arc<Target>>>>,
}

impl TargetRegistry {
    pub fn new(targets: Vec<Target>) -> Self {
        Self {
            targets: RwLock::new(Arc::new(targets.into_iter().map(Arc::new).collect())),
        }
    }

    /// Validate entries and build a registry
    pub fn load(configs: &[TargetConfig]) -> Result<Self, ConfigError> {
        Ok(Self::new(load(configs)?))
    }

    /// Snapshot of all targets in config order
    pub fn targets(&self) -> Arc<Vec<Arc<Target>>> {
        Arc::clone(&self.targets.read())
    }

    /// Look up a target by name
    pub fn get(&self, name: &str) -> Option<Arc<Target>> {
        self.targets.read().iter().find(|t| t.name == name).cloned()
    }

    pub fn len(&self) -> usize {
        self.targets.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.read().is_empty()
    }

    /// Validate new entries and replace the list.
    ///
    /// On error the current list is left untouched.
    pub fn reload(&self, configs: &[TargetConfig]) -> Result<RegistryDiff, ConfigError> {
        let fresh = load(configs)?;
        Ok(self.replace(fresh))
    }

    /// Replace the list with already-validated targets
    pub fn replace(&self, fresh: Vec<Target>) -> RegistryDiff {
        let mut guard = self.targets.write();

        let previous: HashMap<&str, &Arc<Target>> =
            guard.iter().map(|t| (t.name.as_str(), t)).collect();
        let mut diff = RegistryDiff::default();
        let mut next = Vec::with_capacity(fresh.len());

        for target in fresh {
            match previous.get(target.name.as_str()) {
                // Keep the old Arc so unchanged targets compare pointer-equal
                Some(old) if ***old == target => next.push(Arc::clone(old)),
                Some(_) => {
                    let target = Arc::new(target);
                    diff.changed.push(Arc::clone(&target));
                    next.push(target);
                }
                None => {
                    let target = Arc::new(target);
                    diff.added.push(Arc::clone(&target));
                    next.push(target);
                }
            }
        }

        let kept: HashSet<&str> = next.iter().map(|t| t.name.as_str()).collect();
        diff.removed = guard
            .iter()
            .filter(|t| !kept.contains(t.name.as_str()))
            .map(|t| t.name.clone())
            .collect();
        drop(kept);
        drop(previous);

        *guard = Arc::new(next);
        diff
    }
}
