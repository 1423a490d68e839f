//! Signing key cache
//!
//! [`KeyStore`] owns the keys published by the identity provider, indexed by
//! key id. It is the only shared mutable state in the verifier:
//!
//! - Readers take a short `parking_lot` read lock and clone an `Arc` to the
//!   current snapshot. The lock is never held across an `.await`.
//! - A refresh builds a complete new snapshot and swaps it in, so a reader
//!   never sees a half-populated key set.
//! - Refreshes are serialised by an async gate. A task that queued behind
//!   another task's refresh takes that refresh's outcome, success or
//!   failure, instead of fetching again. A burst of cold-start requests costs
//!   one fetch even while the provider is down.
//! - Refreshes caused by an unknown key id are rate limited by
//!   `min_refresh_interval`, measured from the last attempt.
//! - With a TTL, an expired key is still served and the key set is refreshed
//!   on a background task. If that refresh fails the stale key keeps working
//!   until the provider is back.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use jsonwebtoken::DecodingKey;
use jsonwebtoken::jwk::{AlgorithmParameters, Jwk, JwkSet, PublicKeyUse};
use parking_lot::RwLock;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{VerifyError, VerifyResult};
use crate::jwks::KeySetSource;

/// A public key from the provider's key set
#[derive(Clone)]
pub struct SigningKey {
    kid: String,
    key: DecodingKey,
    key_type: &'static str,
    algorithm: Option<String>,
}

impl SigningKey {
    /// Build a verification key from a JWK
    ///
    /// Returns `None` for keys that must never verify a token: no kid,
    /// symmetric (`oct`) material, encryption-only keys, or unparseable
    /// parameters.
    pub fn from_jwk(jwk: &Jwk) -> Option<Self> {
        let kid = jwk.common.key_id.clone()?;

        let key_type = match &jwk.algorithm {
            AlgorithmParameters::OctetKey(_) => {
                warn!(kid = %kid, "Ignoring symmetric key published in JWKS");
                return None;
            }
            AlgorithmParameters::RSA(_) => "RSA",
            AlgorithmParameters::EllipticCurve(_) => "EC",
            _ => "OKP",
        };

        if matches!(jwk.common.public_key_use, Some(PublicKeyUse::Encryption)) {
            debug!(kid = %kid, "Ignoring encryption key in JWKS");
            return None;
        }

        let key = match DecodingKey::from_jwk(jwk) {
            Ok(key) => key,
            Err(e) => {
                warn!(kid = %kid, error = %e, "Ignoring JWK that cannot be used for verification");
                return None;
            }
        };

        Some(Self {
            kid,
            key,
            key_type,
            algorithm: jwk.common.key_algorithm.as_ref().map(|alg| format!("{alg:?}")),
        })
    }

    /// Key id
    pub fn kid(&self) -> &str {
        &self.kid
    }

    /// JWK key type (`RSA`, `EC`, `OKP`)
    pub fn key_type(&self) -> &'static str {
        self.key_type
    }

    /// Algorithm the key is pinned to, if the JWK declares one
    pub fn algorithm(&self) -> Option<&str> {
        self.algorithm.as_deref()
    }

    /// Whether a token header naming `alg` may use this key
    pub fn permits(&self, alg: &str) -> bool {
        self.algorithm.as_deref().is_none_or(|declared| declared == alg)
    }

    pub(crate) fn decoding_key(&self) -> &DecodingKey {
        &self.key
    }
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKey")
            .field("kid", &self.kid)
            .field("key_type", &self.key_type)
            .field("algorithm", &self.algorithm)
            .finish_non_exhaustive()
    }
}

/// One complete download of the key set
#[derive(Debug)]
struct KeySnapshot {
    keys: HashMap<String, Arc<SigningKey>>,
    fetched_at: Instant,
}

enum Lookup {
    Fresh(Arc<SigningKey>),
    Stale(Arc<SigningKey>),
    Missing,
}

/// When the key set was last fetched and how that went
#[derive(Debug, Clone)]
struct RefreshAttempt {
    at: Instant,
    error: Option<VerifyError>,
}

/// Cache of signing keys for a single issuer
pub struct KeyStore {
    source: Arc<dyn KeySetSource>,
    snapshot: RwLock<Option<Arc<KeySnapshot>>>,
    refresh_gate: Arc<Mutex<()>>,
    last_attempt: parking_lot::Mutex<Option<RefreshAttempt>>,
    generation: AtomicU64,
    fetches: AtomicU64,
    ttl: Option<Duration>,
    min_refresh_interval: Duration,
}

impl fmt::Debug for KeyStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyStore")
            .field("source", &self.source.location())
            .field("cached_keys", &self.len())
            .field("fetches", &self.fetch_count())
            .field("ttl", &self.ttl)
            .field("min_refresh_interval", &self.min_refresh_interval)
            .finish()
    }
}

impl KeyStore {
    /// Empty cache in front of `source`
    pub fn new(
        source: Arc<dyn KeySetSource>,
        ttl: Option<Duration>,
        min_refresh_interval: Duration,
    ) -> Self {
        Self {
            source,
            snapshot: RwLock::new(None),
            refresh_gate: Arc::new(Mutex::new(())),
            last_attempt: parking_lot::Mutex::new(None),
            generation: AtomicU64::new(0),
            fetches: AtomicU64::new(0),
            ttl,
            min_refresh_interval,
        }
    }

    /// Resolve a key id, fetching the key set at most once on a miss
    ///
    /// A key whose snapshot has outlived the TTL is returned immediately and
    /// the key set is refreshed in the background, so a slow provider never
    /// delays a request that already has a key to check against.
    ///
    /// # Errors
    ///
    /// - [`VerifyError::UnknownKey`] if the kid is absent after a refresh, or
    ///   a refresh happened too recently to try again
    /// - [`VerifyError::KeySourceUnavailable`] if the key set could not be
    ///   fetched and no stale copy of the key exists. Tasks that queued behind
    ///   the failed fetch, or arrive within `min_refresh_interval` of it, get
    ///   the same error without fetching again.
    pub async fn get(self: &Arc<Self>, kid: &str) -> VerifyResult<Arc<SigningKey>> {
        let seen_generation = self.generation.load(Ordering::Acquire);
        match self.lookup(kid) {
            Lookup::Fresh(key) => {
                debug!(kid, "Signing key cache hit");
                return Ok(key);
            }
            Lookup::Stale(key) => {
                debug!(kid, "Signing key past TTL, serving while revalidating");
                self.revalidate_in_background();
                return Ok(key);
            }
            Lookup::Missing => {}
        }

        let _gate = self.refresh_gate.lock().await;

        if self.generation.load(Ordering::Acquire) != seen_generation {
            // Another task tried a refresh while we queued on the gate.
            return self.resolve_after_attempt(kid);
        }

        if let Some(attempt) = self.recent_attempt() {
            warn!(
                kid,
                since_last_ms = attempt.at.elapsed().as_millis() as u64,
                "Unknown key id, JWKS refresh rate limited"
            );
            return Err(attempt
                .error
                .unwrap_or_else(|| VerifyError::unknown_key(kid)));
        }

        self.refresh_locked().await?;
        match self.lookup(kid) {
            Lookup::Fresh(key) | Lookup::Stale(key) => Ok(key),
            Lookup::Missing => {
                warn!(kid, source = self.source.location(), "Key id not found in JWKS");
                Err(VerifyError::unknown_key(kid))
            }
        }
    }

    /// Fetch the key set now and replace the cache
    ///
    /// Returns the number of usable keys.
    ///
    /// # Errors
    ///
    /// Returns [`VerifyError::KeySourceUnavailable`] if the fetch fails. The
    /// previous cache contents are kept in that case.
    pub async fn refresh(&self) -> VerifyResult<usize> {
        let _gate = self.refresh_gate.lock().await;
        self.refresh_locked().await
    }

    /// Caller must hold `refresh_gate`
    async fn refresh_locked(&self) -> VerifyResult<usize> {
        self.fetches.fetch_add(1, Ordering::Relaxed);
        let result = self.fetch_snapshot().await;

        *self.last_attempt.lock() = Some(RefreshAttempt {
            at: Instant::now(),
            error: result.as_ref().err().cloned(),
        });
        self.generation.fetch_add(1, Ordering::AcqRel);

        result
    }

    async fn fetch_snapshot(&self) -> VerifyResult<usize> {
        let jwks: JwkSet = self.source.fetch().await?;

        let keys: HashMap<String, Arc<SigningKey>> = jwks
            .keys
            .iter()
            .filter_map(SigningKey::from_jwk)
            .map(|key| (key.kid.clone(), Arc::new(key)))
            .collect();
        let count = keys.len();

        if count < jwks.keys.len() {
            debug!(
                published = jwks.keys.len(),
                usable = count,
                "Some published keys were skipped"
            );
        }

        *self.snapshot.write() = Some(Arc::new(KeySnapshot {
            keys,
            fetched_at: Instant::now(),
        }));

        info!(source = self.source.location(), key_count = count, "Signing key cache updated");
        Ok(count)
    }

    /// Refresh on a background task unless one is running or one just ran
    fn revalidate_in_background(self: &Arc<Self>) {
        if self.recent_attempt().is_some() {
            return;
        }
        let Ok(gate) = Arc::clone(&self.refresh_gate).try_lock_owned() else {
            return;
        };

        let store = Arc::clone(self);
        tokio::spawn(async move {
            let _gate = gate;
            if let Err(e) = store.refresh_locked().await {
                warn!(error = %e, "JWKS refresh failed, serving stale keys");
            }
        });
    }

    fn resolve_after_attempt(&self, kid: &str) -> VerifyResult<Arc<SigningKey>> {
        match self.lookup(kid) {
            Lookup::Fresh(key) | Lookup::Stale(key) => Ok(key),
            Lookup::Missing => {
                let error = self
                    .last_attempt
                    .lock()
                    .as_ref()
                    .and_then(|attempt| attempt.error.clone());
                Err(error.unwrap_or_else(|| VerifyError::unknown_key(kid)))
            }
        }
    }

    fn lookup(&self, kid: &str) -> Lookup {
        let Some(snapshot) = self.snapshot.read().clone() else {
            return Lookup::Missing;
        };

        match snapshot.keys.get(kid) {
            Some(key) if self.is_fresh(&snapshot) => Lookup::Fresh(Arc::clone(key)),
            Some(key) => Lookup::Stale(Arc::clone(key)),
            None => Lookup::Missing,
        }
    }

    fn is_fresh(&self, snapshot: &KeySnapshot) -> bool {
        self.ttl.is_none_or(|ttl| snapshot.fetched_at.elapsed() < ttl)
    }

    /// Last refresh attempt, if it started less than `min_refresh_interval` ago
    fn recent_attempt(&self) -> Option<RefreshAttempt> {
        self.last_attempt
            .lock()
            .as_ref()
            .filter(|attempt| attempt.at.elapsed() < self.min_refresh_interval)
            .cloned()
    }

    /// Number of cached keys
    pub fn len(&self) -> usize {
        self.snapshot
            .read()
            .as_ref()
            .map_or(0, |snapshot| snapshot.keys.len())
    }

    /// Whether nothing has been cached yet
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Key ids currently cached
    pub fn key_ids(&self) -> Vec<String> {
        self.snapshot
            .read()
            .as_ref()
            .map(|snapshot| snapshot.keys.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of key set fetches performed so far
    pub fn fetch_count(&self) -> u64 {
        self.fetches.load(Ordering::Relaxed)
    }

    /// Drop every cached key
    pub fn clear(&self) {
        *self.snapshot.write() = None;
        *self.last_attempt.lock() = None;
        debug!(source = self.source.location(), "Signing key cache cleared");
    }

    /// Refresh the key set every `period` until `shutdown` is cancelled
    ///
    /// The first refresh happens one `period` after spawning.
    pub fn spawn_refresher(
        self: &Arc<Self>,
        period: Duration,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    () = shutdown.cancelled() => {
                        debug!(source = store.source.location(), "JWKS refresher stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        if let Err(e) = store.refresh().await {
                            warn!(error = %e, "Periodic JWKS refresh failed");
                        }
                    }
                }
            }
        })
    }
}
