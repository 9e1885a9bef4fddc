//! Actuation coordinator
//!
//! Owns the connection cache and drives every actuation: resolve one session
//! per target, spawn one task per resolved target that waits for the fire
//! time and issues the action, then wait for all of them. A failing target
//! never cancels its siblings.

use super::{
    ActuationError, ActuationReport, ActuationRequest, FiredTarget, SessionPolicy, TargetError,
    TargetFailure, Timing,
};
use crate::remote::{Action, ConnectionCache, Connector, Session, Target};
use crate::scheduler::wait_until;
use chrono::{DateTime, Local};
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Result of probing one target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeResult {
    pub name: String,
    pub address: String,
    pub status: ProbeStatus,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeStatus {
    Ok,
    /// Target is disabled
    Skipped,
    Failed(String),
}

/// Cheap to clone; clones share the connector and the connection cache.
#[derive(Clone)]
pub struct Coordinator {
    connector: Arc<dyn Connector>,
    cache: Arc<ConnectionCache>,
}

impl Coordinator {
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        let cache = Arc::new(ConnectionCache::new(connector.clone()));
        Self { connector, cache }
    }

    pub fn cache(&self) -> &ConnectionCache {
        &self.cache
    }

    /// Closes every cached session.
    pub async fn shutdown(&self) {
        info!("Shutting down coordinator");
        self.cache.clear().await;
    }

    /// Issues `request.action` to every usable target at `request.fire_time`.
    ///
    /// # Errors
    ///
    /// * [`ActuationError::InvalidRequest`] - empty action, no usable target,
    ///   or mixed credentials under [`SessionPolicy::Cached`]; nothing is
    ///   contacted
    /// * [`ActuationError::AllConnectionsFailed`] - no target resolved; nothing
    ///   is issued
    /// * [`ActuationError::PartialFailure`] - at least one resolved target
    ///   failed; the others already received the action
    ///
    /// Targets that fail to connect while others succeed do not make the call
    /// fail; they are listed in [`ActuationReport::unreachable`].
    pub async fn actuate(
        &self,
        request: ActuationRequest,
    ) -> Result<ActuationReport, ActuationError> {
        let targets = prepare(&request)?;
        let ActuationRequest {
            action,
            fire_time,
            timing,
            policy,
            ..
        } = request;

        // Resolve sessions
        let mut resolved = Vec::with_capacity(targets.len());
        let mut unreachable = Vec::new();
        for target in targets {
            match self.resolve(&target, policy, timing.call_timeout).await {
                Ok(session) => {
                    info!("Connected to {} ({})", target.name, target.address);
                    resolved.push((target, session));
                }
                Err(error) => {
                    warn!(
                        "Connection to {} ({}) failed: {}",
                        target.name, target.address, error
                    );
                    unreachable.push(TargetFailure {
                        name: target.name,
                        address: target.address,
                        error,
                    });
                }
            }
        }

        if resolved.is_empty() {
            error!(
                "All {} connection(s) failed, nothing issued",
                unreachable.len()
            );
            return Err(ActuationError::AllConnectionsFailed(unreachable));
        }
        if !unreachable.is_empty() {
            warn!(
                "Continuing without unreachable targets: {}",
                unreachable
                    .iter()
                    .map(|f| f.address.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            );
        }

        let now = Local::now();
        if fire_time > now {
            info!(
                "Firing {} on {} target(s) at {} (in {:?})",
                action,
                resolved.len(),
                fire_time.to_rfc3339(),
                (fire_time - now).to_std().unwrap_or_default()
            );
        } else {
            info!(
                "Firing {} on {} target(s) immediately (requested {})",
                action,
                resolved.len(),
                fire_time.to_rfc3339()
            );
        }

        // One task per target, all released by the same deadline
        let action = Arc::new(action);
        let units: Vec<(String, String, JoinHandle<Result<FiredTarget, TargetFailure>>)> =
            resolved
                .into_iter()
                .map(|(target, session)| {
                    let unit = Unit {
                        name: target.name.clone(),
                        address: target.address.clone(),
                        credential: target.credential,
                        session,
                        action: action.clone(),
                        fire_time,
                        timing,
                        cache: match policy {
                            SessionPolicy::Cached => Some(self.cache.clone()),
                            SessionPolicy::Ephemeral => None,
                        },
                    };
                    (target.name, target.address, tokio::spawn(unit.run()))
                })
                .collect();

        let mut fired = Vec::with_capacity(units.len());
        let mut failed = Vec::new();
        for (name, address, handle) in units {
            match handle.await {
                Ok(Ok(target)) => fired.push(target),
                Ok(Err(failure)) => {
                    error!("{}", failure);
                    failed.push(failure);
                }
                Err(e) => {
                    error!("Actuation task for {} ({}) aborted: {}", name, address, e);
                    failed.push(TargetFailure {
                        name,
                        address,
                        error: TargetError::Request(format!("task aborted: {}", e)),
                    });
                }
            }
        }

        if !failed.is_empty() {
            failed.extend(unreachable);
            return Err(ActuationError::PartialFailure(failed));
        }

        if unreachable.is_empty() {
            info!("{} completed on all {} target(s)", action, fired.len());
        } else {
            info!(
                "{} completed on {} reachable target(s), {} unreachable",
                action,
                fired.len(),
                unreachable.len()
            );
        }
        Ok(ActuationReport { fired, unreachable })
    }

    /// Validates `request` and runs it in a detached task.
    ///
    /// The outcome is only logged; nothing awaits it. Use this from input
    /// handlers that must not block on network I/O.
    pub fn spawn_detached(
        &self,
        request: ActuationRequest,
    ) -> Result<JoinHandle<()>, ActuationError> {
        prepare(&request)?;
        let coordinator = self.clone();
        Ok(tokio::spawn(async move {
            let action = request.action.clone();
            match coordinator.actuate(request).await {
                Ok(report) => debug!("Detached {} finished: {:?}", action, report),
                Err(e) => error!("Detached {} failed: {}", action, e),
            }
        }))
    }

    /// Opens a throwaway session to every enabled target and lists its scenes.
    pub async fn probe(&self, targets: &[Target], call_timeout: Duration) -> Vec<ProbeResult> {
        let mut results = Vec::with_capacity(targets.len());
        for target in targets {
            let status = if !target.enabled {
                ProbeStatus::Skipped
            } else {
                match self
                    .resolve(target, SessionPolicy::Ephemeral, call_timeout)
                    .await
                {
                    Err(e) => ProbeStatus::Failed(e.to_string()),
                    Ok(session) => {
                        let listed = within(call_timeout, session.list_scenes()).await;
                        close_logged(&target.address, &*session).await;
                        match listed {
                            Some(Ok(_)) => ProbeStatus::Ok,
                            Some(Err(e)) => ProbeStatus::Failed(e.to_string()),
                            None => {
                                ProbeStatus::Failed(TargetError::Timeout(call_timeout).to_string())
                            }
                        }
                    }
                }
            };
            debug!("Probe {} ({}): {:?}", target.name, target.address, status);
            results.push(ProbeResult {
                name: target.name.clone(),
                address: target.address.clone(),
                status,
            });
        }
        results
    }

    /// Scenes known to every enabled target, sorted case-insensitively.
    pub async fn list_common_scenes(
        &self,
        targets: &[Target],
        call_timeout: Duration,
    ) -> Result<Vec<String>, ActuationError> {
        let mut common: Option<HashSet<String>> = None;
        for target in targets.iter().filter(|t| t.enabled) {
            let scenes: HashSet<String> = self
                .scenes_of(target, call_timeout)
                .await?
                .into_iter()
                .collect();
            common = Some(match common {
                None => scenes,
                Some(acc) => acc.intersection(&scenes).cloned().collect(),
            });
        }
        let common = common
            .ok_or_else(|| ActuationError::InvalidRequest("no enabled targets".to_string()))?;
        let mut names: Vec<String> = common.into_iter().collect();
        sort_case_insensitive(&mut names);
        Ok(names)
    }

    /// Scenes known to the enabled target called `name`, sorted
    /// case-insensitively.
    pub async fn list_scenes_for(
        &self,
        targets: &[Target],
        name: &str,
        call_timeout: Duration,
    ) -> Result<Vec<String>, ActuationError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ActuationError::InvalidRequest(
                "target name is empty".to_string(),
            ));
        }
        let target = targets
            .iter()
            .find(|t| t.enabled && t.name == name)
            .ok_or_else(|| {
                ActuationError::InvalidRequest(format!("no enabled target named {}", name))
            })?;
        let mut names = self.scenes_of(target, call_timeout).await?;
        sort_case_insensitive(&mut names);
        Ok(names)
    }

    async fn scenes_of(
        &self,
        target: &Target,
        call_timeout: Duration,
    ) -> Result<Vec<String>, ActuationError> {
        let query_error = |error| ActuationError::Query {
            name: target.name.clone(),
            address: target.address.clone(),
            error,
        };
        let session = self
            .resolve(target, SessionPolicy::Cached, call_timeout)
            .await
            .map_err(query_error)?;
        match within(call_timeout, session.list_scenes()).await {
            Some(Ok(scenes)) => Ok(scenes),
            Some(Err(e)) => Err(query_error(TargetError::Request(e.to_string()))),
            None => Err(query_error(TargetError::Timeout(call_timeout))),
        }
    }

    async fn resolve(
        &self,
        target: &Target,
        policy: SessionPolicy,
        call_timeout: Duration,
    ) -> Result<Arc<dyn Session>, TargetError> {
        let opened = match policy {
            SessionPolicy::Ephemeral => {
                let credential = Some(target.credential.as_str()).filter(|c| !c.is_empty());
                within(call_timeout, async {
                    self.connector
                        .open(&target.address, credential)
                        .await
                        .map(Arc::<dyn Session>::from)
                })
                .await
            }
            SessionPolicy::Cached => {
                within(
                    call_timeout,
                    self.cache.get_session(&target.address, &target.credential),
                )
                .await
            }
        };
        match opened {
            Some(Ok(session)) => Ok(session),
            Some(Err(e)) => Err(TargetError::ConnectionFailed(e.to_string())),
            None => Err(TargetError::ConnectionFailed(format!(
                "timed out after {:?}",
                call_timeout
            ))),
        }
    }
}

// Per-target unit of work
struct Unit {
    name: String,
    address: String,
    credential: String,
    session: Arc<dyn Session>,
    action: Arc<Action>,
    fire_time: DateTime<Local>,
    timing: Timing,
    // Present under the cached policy: enables the one-shot reconnect
    cache: Option<Arc<ConnectionCache>>,
}

impl Unit {
    async fn run(self) -> Result<FiredTarget, TargetFailure> {
        wait_until(self.fire_time, self.timing.spin_window).await;
        let fired_at = Local::now();
        let skew = fired_at - self.fire_time;
        if self.timing.skew_log {
            info!(
                "[{}] fired at {} (skew {:.3} ms)",
                self.address,
                fired_at.format("%H:%M:%S%.6f"),
                skew.num_microseconds().unwrap_or(i64::MAX) as f64 / 1000.0
            );
        }

        let limit = self.timing.call_timeout;
        let mut outcome = issue(&*self.session, &self.action, limit).await;

        match &self.cache {
            None => close_logged(&self.address, &*self.session).await,
            Some(cache) => {
                if let Err(first) = &outcome {
                    warn!(
                        "[{}] {} failed ({}), reconnecting once",
                        self.address, self.action, first
                    );
                    cache.invalidate_session(&self.address, &self.session).await;
                    outcome = self.retry(cache, limit).await;
                }
            }
        }

        match outcome {
            Ok(()) => {
                info!("[{}] {} done", self.address, self.action);
                Ok(FiredTarget {
                    name: self.name,
                    address: self.address,
                    fired_at,
                    skew,
                })
            }
            Err(error) => Err(TargetFailure {
                name: self.name,
                address: self.address,
                error,
            }),
        }
    }

    // Issues once more on whatever session the cache now holds for the address.
    // Only the session that failed is invalidated, so a concurrent call that
    // already reconnected keeps its fresh session.
    async fn retry(&self, cache: &ConnectionCache, limit: Duration) -> Result<(), TargetError> {
        let reopened = within(limit, cache.get_session(&self.address, &self.credential)).await;
        let session = match reopened {
            Some(Ok(session)) => session,
            Some(Err(e)) => return Err(TargetError::ConnectionFailed(e.to_string())),
            None => {
                return Err(TargetError::ConnectionFailed(format!(
                    "timed out after {:?}",
                    limit
                )))
            }
        };
        let outcome = issue(&*session, &self.action, limit).await;
        if outcome.is_err() {
            cache.invalidate_session(&self.address, &session).await;
        }
        outcome
    }
}

/// Checks preconditions and returns the targets worth contacting.
fn prepare(request: &ActuationRequest) -> Result<Vec<Target>, ActuationError> {
    if request.action.is_empty() {
        return Err(ActuationError::InvalidRequest(format!(
            "nothing to do for {}",
            request.action
        )));
    }

    let targets: Vec<Target> = request
        .targets
        .iter()
        .filter(|t| {
            if !t.enabled {
                debug!("Skipping disabled target {}", t.name);
                false
            } else if t.address.trim().is_empty() {
                debug!("Skipping target {} without address", t.name);
                false
            } else {
                true
            }
        })
        .cloned()
        .collect();

    if targets.is_empty() {
        return Err(ActuationError::InvalidRequest(
            "no usable target addresses".to_string(),
        ));
    }

    if request.policy == SessionPolicy::Cached {
        let first = targets[0].credential.as_str();
        if targets.iter().any(|t| t.credential != first) {
            return Err(ActuationError::InvalidRequest(
                "cached sessions need one shared credential per batch".to_string(),
            ));
        }
    }

    Ok(targets)
}

async fn issue(session: &dyn Session, action: &Action, limit: Duration) -> Result<(), TargetError> {
    match within(limit, session.issue_action(action)).await {
        Some(Ok(())) => Ok(()),
        Some(Err(e)) => Err(TargetError::Request(e.to_string())),
        None => Err(TargetError::Timeout(limit)),
    }
}

/// Runs `fut` bounded by `limit`; `None` on timeout. A zero limit means
/// unbounded.
async fn within<F: Future>(limit: Duration, fut: F) -> Option<F::Output> {
    if limit.is_zero() {
        Some(fut.await)
    } else {
        tokio::time::timeout(limit, fut).await.ok()
    }
}

async fn close_logged(address: &str, session: &dyn Session) {
    if let Err(e) = session.close().await {
        warn!("Failed to close session for {}: {}", address, e);
    }
}

fn sort_case_insensitive(names: &mut [String]) {
    names.sort_by_cached_key(|n| n.to_lowercase());
}
