//! Registration gate: validates an app key once, then remembers it

use super::authority::{AuthorityError, AuthorizationService};
use super::cache::{CacheLookup, InvalidReason, RegistrationCache};
use super::{RegisteredInfo, RegistrationCheck, RegistrationStatus};
use crate::config::RegistrationConfig;
use crate::error::RegistrationError;
use crate::events::{EventDispatcher, RegistrationListener, RegistrationOutcome};
use aerolink_shared::now_ms;
use parking_lot::Mutex;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};
use uuid::Uuid;

const MIN_KEY_LEN: usize = 16;
const MAX_KEY_LEN: usize = 64;

/// Syntactic check done before any I/O
pub fn validate_app_key(app_key: &str) -> Result<(), RegistrationError> {
    if app_key.is_empty() {
        return Err(RegistrationError::InvalidKey("empty".into()));
    }
    if !(MIN_KEY_LEN..=MAX_KEY_LEN).contains(&app_key.len()) {
        return Err(RegistrationError::InvalidKey(format!(
            "length {} outside {}..={}",
            app_key.len(),
            MIN_KEY_LEN,
            MAX_KEY_LEN
        )));
    }
    if !app_key.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(RegistrationError::InvalidKey(
            "only ASCII letters and digits are allowed".into(),
        ));
    }
    Ok(())
}

struct Pending {
    app_key: String,
    listeners: Vec<Arc<dyn RegistrationListener>>,
}

struct GateState {
    status: RegistrationStatus,
    pending: Option<Pending>,
}

pub struct RegistrationGate {
    config: RegistrationConfig,
    cache: RegistrationCache,
    authority: Arc<dyn AuthorizationService>,
    dispatcher: EventDispatcher,
    state: Mutex<GateState>,
    // Stands in for the installation id when the cache directory is unusable
    process_fingerprint: OnceLock<String>,
}

impl RegistrationGate {
    pub fn new(
        config: RegistrationConfig,
        cache: RegistrationCache,
        authority: Arc<dyn AuthorizationService>,
        dispatcher: EventDispatcher,
    ) -> Self {
        Self {
            config,
            cache,
            authority,
            dispatcher,
            state: Mutex::new(GateState {
                status: RegistrationStatus::Unregistered,
                pending: None,
            }),
            process_fingerprint: OnceLock::new(),
        }
    }

    pub fn status(&self) -> RegistrationStatus {
        self.state.lock().status.clone()
    }

    /// Start (or join) a registration. `listener` receives exactly one outcome.
    ///
    /// Must be called within a tokio runtime; verification runs as a task.
    pub fn register(self: &Arc<Self>, app_key: &str, listener: Arc<dyn RegistrationListener>) {
        let mut state = self.state.lock();

        if let Some(pending) = state.pending.as_mut() {
            if pending.app_key == app_key {
                debug!("[REG] Joining registration already in flight");
                pending.listeners.push(listener);
            } else {
                self.dispatcher
                    .emit_registration(listener, Err(RegistrationError::AlreadyPending));
            }
            return;
        }

        if let Err(e) = validate_app_key(app_key) {
            warn!("[REG] Rejected app key: {}", e);
            // A bad key does not revoke an earlier registration
            if !state.status.is_registered() {
                state.status = RegistrationStatus::Failed(e.clone());
            }
            self.dispatcher.emit_registration(listener, Err(e));
            return;
        }

        state.status = RegistrationStatus::Pending;
        state.pending = Some(Pending {
            app_key: app_key.to_string(),
            listeners: vec![listener],
        });
        drop(state);

        let gate = Arc::clone(self);
        let app_key = app_key.to_string();
        tokio::spawn(async move {
            let outcome = gate.verify(&app_key).await;
            gate.complete(outcome);
        });
    }

    fn complete(&self, outcome: RegistrationOutcome) {
        let mut state = self.state.lock();
        state.status = match &outcome {
            Ok(info) => RegistrationStatus::Registered(info.clone()),
            Err(e) => RegistrationStatus::Failed(e.clone()),
        };

        let listeners = state.pending.take().map(|p| p.listeners).unwrap_or_default();
        for listener in listeners {
            self.dispatcher.emit_registration(listener, outcome.clone());
        }
    }

    async fn verify(&self, app_key: &str) -> RegistrationOutcome {
        let fingerprint = self.fingerprint();

        match self.cache.lookup(app_key, &fingerprint) {
            CacheLookup::Valid(info) => {
                info!("[REG] Registered from cache");
                return Ok(info);
            }
            CacheLookup::Invalid(InvalidReason::Corrupt(e)) => {
                warn!("[REG] Registration cache unreadable ({}); verifying online", e)
            }
            CacheLookup::Invalid(reason) => info!("[REG] Cached registration {}; verifying online", reason),
            CacheLookup::Absent => debug!("[REG] No cached registration"),
        }

        let ttl = self.verify_online(app_key, &fingerprint).await?;
        let verified_at_ms = now_ms();
        let ttl = ttl.map_or(self.config.cache_ttl(), |t| t.min(self.config.cache_ttl()));
        let info = RegisteredInfo {
            app_key: app_key.to_string(),
            fingerprint,
            verified_at_ms,
            expires_at_ms: verified_at_ms.saturating_add(ttl.as_millis() as u64),
        };

        if let Err(e) = self.cache.store(&info) {
            // Registration stands for this process; the next launch verifies again
            warn!("[REG] Could not cache registration: {}", e);
        }
        info!("[REG] Registered online");
        Ok(info)
    }

    fn fingerprint(&self) -> String {
        match self.cache.fingerprint() {
            Ok(fingerprint) => fingerprint,
            Err(e) => {
                warn!(
                    "[REG] Installation id unavailable ({}); using a process-lifetime id",
                    e
                );
                self.process_fingerprint
                    .get_or_init(|| Uuid::new_v4().to_string())
                    .clone()
            }
        }
    }

    /// Retries network failures only
    async fn verify_online(
        &self,
        app_key: &str,
        fingerprint: &str,
    ) -> Result<Option<Duration>, RegistrationError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let last_error = match timeout(
                self.config.request_timeout(),
                self.authority.verify(app_key, fingerprint),
            )
            .await
            {
                Ok(Ok(verification)) => return Ok(verification.ttl),
                Ok(Err(AuthorityError::Rejected(message))) => {
                    return Err(RegistrationError::ServerRejected(message))
                }
                Ok(Err(AuthorityError::Network(message))) => message,
                Err(_) => "request timed out".to_string(),
            };

            if attempt >= self.config.max_attempts {
                return Err(RegistrationError::NetworkFailure(last_error));
            }
            warn!(
                "[REG] Verification attempt {}/{} failed: {}",
                attempt, self.config.max_attempts, last_error
            );
            sleep(self.config.retry_delay()).await;
        }
    }
}

impl RegistrationCheck for RegistrationGate {
    fn is_registered(&self) -> bool {
        self.state.lock().status.is_registered()
    }
}
