//! Live registry of backend services discovered at runtime.
//!
//! Services announce themselves by publishing [`RegistrationEvent`]s at a fixed
//! heartbeat interval. An instance that stays silent for longer than its
//! heartbeat plus [`GRACE`] is dropped by [`ServiceRegistry::sweep`], and a
//! service without instances is dropped with it. Dropped instances come back
//! only through a fresh registration.
//!
//! All state sits behind one `RwLock`. Critical sections touch the map only;
//! regex compilation happens before the write lock is taken.

pub mod listener;

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::RegistryError;

/// Slack added to a service's heartbeat interval before an instance expires.
pub const GRACE: Duration = Duration::from_secs(10);

/// Announcement published by a service instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RegistrationEvent {
    pub name: String,
    pub path_pattern: String,
    pub address: String,
    /// Heartbeat interval in seconds.
    pub heartbeat: u64,
}

impl RegistrationEvent {
    pub fn from_json(payload: &[u8]) -> Result<Self, RegistryError> {
        let event: Self = serde_json::from_slice(payload)
            .map_err(|e| RegistryError::MalformedEvent(e.to_string()))?;
        if event.name.is_empty() || event.address.is_empty() {
            return Err(RegistryError::MalformedEvent(
                "Name and Address must be non-empty".to_string(),
            ));
        }
        Ok(event)
    }
}

/// What a registration changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterOutcome {
    NewService,
    NewInstance,
    Heartbeat,
}

#[derive(Debug)]
struct Instance {
    address: String,
    last_heartbeat: Instant,
}

/// A named backend with one or more live instances.
#[derive(Debug)]
pub struct Service {
    name: String,
    pattern: Regex,
    heartbeat: Duration,
    instances: Vec<Instance>,
    next: AtomicUsize,
}

impl Service {
    fn new(event: &RegistrationEvent, pattern: Regex, now: Instant) -> Self {
        Self {
            name: event.name.clone(),
            pattern,
            heartbeat: Duration::from_secs(event.heartbeat),
            instances: vec![Instance {
                address: event.address.clone(),
                last_heartbeat: now,
            }],
            next: AtomicUsize::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pattern(&self) -> &str {
        self.pattern.as_str()
    }

    pub fn heartbeat(&self) -> Duration {
        self.heartbeat
    }

    /// Instance addresses in discovery order.
    pub fn addresses(&self) -> Vec<String> {
        self.instances.iter().map(|i| i.address.clone()).collect()
    }

    /// Round-robin pick.
    fn next_address(&self) -> Option<&str> {
        if self.instances.is_empty() {
            return None;
        }
        let n = self.next.fetch_add(1, Ordering::Relaxed);
        Some(self.instances[n % self.instances.len()].address.as_str())
    }

    /// An interval too large to add [`GRACE`] to never expires.
    fn is_expired(&self, instance: &Instance, now: Instant) -> bool {
        self.heartbeat
            .checked_add(GRACE)
            .is_some_and(|limit| now.saturating_duration_since(instance.last_heartbeat) > limit)
    }
}

fn compile_pattern(pattern: &str) -> Result<Regex, RegistryError> {
    Regex::new(pattern).map_err(|source| RegistryError::InvalidPattern {
        pattern: pattern.to_string(),
        source,
    })
}

/// Where a matched request goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteTarget {
    pub service: String,
    pub address: String,
}

/// Result of one sweep pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    /// `(service, address)` pairs that were dropped.
    pub expired_instances: Vec<(String, String)>,
    /// Services dropped because no instance was left.
    pub removed_services: Vec<String>,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        self.expired_instances.is_empty() && self.removed_services.is_empty()
    }
}

/// Map of service name to [`Service`].
#[derive(Debug, Default)]
pub struct ServiceRegistry {
    services: RwLock<HashMap<String, Service>>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a registration observed now.
    pub fn register(&self, event: &RegistrationEvent) -> Result<RegisterOutcome, RegistryError> {
        self.register_at(event, Instant::now())
    }

    /// Apply a registration observed at `now`.
    ///
    /// Unknown service: created with a single instance. Known service with a
    /// new address: the instance is appended. Known address: its heartbeat is
    /// refreshed. The pattern and heartbeat interval of a known service are
    /// kept from its first registration.
    pub fn register_at(
        &self,
        event: &RegistrationEvent,
        now: Instant,
    ) -> Result<RegisterOutcome, RegistryError> {
        let known = self.services.read().contains_key(&event.name);
        let compiled = if known {
            None
        } else {
            Some(compile_pattern(&event.path_pattern)?)
        };
        let outcome = self.upsert(event, compiled, now)?;

        match outcome {
            RegisterOutcome::NewService => tracing::info!(
                service = %event.name,
                address = %event.address,
                pattern = %event.path_pattern,
                heartbeat_secs = event.heartbeat,
                "New service discovered"
            ),
            RegisterOutcome::NewInstance => tracing::info!(
                service = %event.name,
                address = %event.address,
                "New service instance discovered"
            ),
            RegisterOutcome::Heartbeat => tracing::trace!(
                service = %event.name,
                address = %event.address,
                "Heartbeat"
            ),
        }
        Ok(outcome)
    }

    /// Insert or refresh under the write lock. `compiled` is the pattern of
    /// a service that was unknown when the event arrived.
    fn upsert(
        &self,
        event: &RegistrationEvent,
        compiled: Option<Regex>,
        now: Instant,
    ) -> Result<RegisterOutcome, RegistryError> {
        let mut services = self.services.write();
        let outcome = match services.get_mut(&event.name) {
            Some(service) => {
                match service
                    .instances
                    .iter_mut()
                    .find(|i| i.address == event.address)
                {
                    Some(instance) => {
                        instance.last_heartbeat = now;
                        RegisterOutcome::Heartbeat
                    }
                    None => {
                        service.instances.push(Instance {
                            address: event.address.clone(),
                            last_heartbeat: now,
                        });
                        RegisterOutcome::NewInstance
                    }
                }
            }
            None => {
                // A sweep between the two locks can remove a known service;
                // the event then starts it afresh.
                let pattern = match compiled {
                    Some(pattern) => pattern,
                    None => compile_pattern(&event.path_pattern)?,
                };
                services.insert(event.name.clone(), Service::new(event, pattern, now));
                RegisterOutcome::NewService
            }
        };
        Ok(outcome)
    }

    /// Expire silent instances as of now.
    pub fn sweep(&self) -> SweepReport {
        self.sweep_at(Instant::now())
    }

    /// Expire every instance whose last heartbeat is older than its service's
    /// heartbeat interval plus [`GRACE`], and every service left empty.
    pub fn sweep_at(&self, now: Instant) -> SweepReport {
        let mut report = SweepReport::default();
        let mut services = self.services.write();

        services.retain(|name, service| {
            let before = service.instances.len();
            let mut kept = Vec::with_capacity(before);
            for instance in std::mem::take(&mut service.instances) {
                if service.is_expired(&instance, now) {
                    report
                        .expired_instances
                        .push((name.clone(), instance.address));
                } else {
                    kept.push(instance);
                }
            }
            service.instances = kept;

            if service.instances.is_empty() {
                report.removed_services.push(name.clone());
                false
            } else {
                true
            }
        });
        drop(services);

        for (service, address) in &report.expired_instances {
            tracing::warn!(%service, %address, "Service instance expired");
        }
        for service in &report.removed_services {
            tracing::warn!(%service, "Service removed, no live instances");
        }
        report
    }

    /// Name of a service whose pattern matches `path`. With overlapping
    /// patterns, which one wins is unspecified.
    pub fn match_path(&self, path: &str) -> Option<String> {
        self.services
            .read()
            .values()
            .find(|s| s.pattern.is_match(path))
            .map(|s| s.name.clone())
    }

    /// Next instance of `service` in round-robin order.
    pub fn next_instance(&self, service: &str) -> Option<String> {
        self.services
            .read()
            .get(service)
            .and_then(Service::next_address)
            .map(str::to_string)
    }

    /// Match and pick an instance under a single read of the map.
    pub fn route(&self, path: &str) -> Option<RouteTarget> {
        let services = self.services.read();
        let service = services.values().find(|s| s.pattern.is_match(path))?;
        let address = service.next_address()?;
        Some(RouteTarget {
            service: service.name.clone(),
            address: address.to_string(),
        })
    }

    /// Number of registered services.
    pub fn len(&self) -> usize {
        self.services.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.read().is_empty()
    }

    /// Number of live instances of `service`.
    pub fn instance_count(&self, service: &str) -> usize {
        self.services
            .read()
            .get(service)
            .map_or(0, |s| s.instances.len())
    }

    /// Addresses of `service`, in discovery order.
    pub fn addresses(&self, service: &str) -> Vec<String> {
        self.services
            .read()
            .get(service)
            .map(Service::addresses)
            .unwrap_or_default()
    }
}
