//! Per-request session lifecycle management.
//!
//! One [`SessionManager`] is created for each inbound request. It composes
//! the fingerprint validator and the durable [`SessionStore`]: `sess_read`
//! loads and validates the presented session, the payload map is mutated in
//! place for the request duration, and `sess_write` persists it at request
//! end — skipping the write entirely when nothing changed. No session state
//! crosses requests except through the store.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use rand::distributions::Alphanumeric;
use rand::Rng;
use tracing::{debug, warn};

use crate::config::SessionConfig;
use crate::error::{Error, Result};
use crate::fingerprint::Fingerprint;
use crate::gc;
use crate::store::{SessionRecord, SessionStore};

/// The mutable user-data payload of a session.
pub type SessionMap = HashMap<String, serde_json::Value>;

/// Number of characters in a generated session id.
pub const SESSION_ID_LEN: usize = 32;

/// Provides the origin of the current request.
pub trait RequestContext {
    fn client_address(&self) -> &str;
    fn user_agent(&self) -> &str;
}

/// Carries the session id between client and server.
///
/// Implemented by the host's cookie layer. The manager owns id issuance
/// directly and only asks the transport to present or carry an id; cookie
/// attributes from [`SessionConfig::cookie`](crate::SessionConfig) pass
/// through to this layer uninterpreted.
pub trait SessionTransport {
    /// The session id presented by the client, if any.
    fn current_session_id(&self) -> Option<String>;
    /// Makes `id` the session id carried back to the client.
    fn issue_session_id(&mut self, id: &str);
}

/// Result of a [`SessionManager::sess_write`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The payload differed from the read-time snapshot and was persisted.
    Persisted,
    /// The payload was unchanged; no storage traffic occurred.
    Skipped,
}

/// Generates a fresh opaque session id.
pub(crate) fn generate_session_id() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(SESSION_ID_LEN)
        .map(char::from)
        .collect()
}

/// Current unix timestamp in seconds.
pub(crate) fn unix_timestamp() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

/// In-memory state of a validated or freshly created session.
struct ActiveSession {
    id: String,
    /// Fingerprint as stored durably: fixed at creation, rewritten only on
    /// rotation.
    fingerprint: Fingerprint,
    last_activity: i64,
    data: SessionMap,
    /// Payload encoding captured at read time. An empty snapshot never
    /// matches a real encoding, which forces the next write to persist.
    snapshot: Vec<u8>,
}

/// Orchestrates one request's session: read, create, update, write, destroy.
///
/// ```no_run
/// use std::sync::Arc;
/// use hybrid_session_store::{
///     RequestContext, SessionConfig, SessionManager, SessionStore, SessionTransport,
/// };
///
/// # async fn example<C: RequestContext, T: SessionTransport>(
/// #     store: SessionStore,
/// #     config: Arc<SessionConfig>,
/// #     ctx: C,
/// #     transport: T,
/// # ) -> hybrid_session_store::Result<()> {
/// let mut session = SessionManager::new(store, config, &ctx, transport);
/// if !session.sess_read().await? {
///     session.sess_create();
/// }
/// session.sess_update();
/// if let Some(data) = session.data_mut() {
///     data.insert("visits".into(), serde_json::json!(1));
/// }
/// session.sess_write().await?;
/// # Ok(())
/// # }
/// ```
pub struct SessionManager<T: SessionTransport> {
    store: SessionStore,
    config: Arc<SessionConfig>,
    transport: T,
    /// Fingerprint of the current request, captured at construction.
    fingerprint: Fingerprint,
    /// Request timestamp; all time-based policy is evaluated against it.
    now: i64,
    state: Option<ActiveSession>,
}

impl<T: SessionTransport> SessionManager<T> {
    /// Creates the manager for one request, capturing the request's
    /// fingerprint and timestamp.
    pub fn new(
        store: SessionStore,
        config: Arc<SessionConfig>,
        ctx: &dyn RequestContext,
        transport: T,
    ) -> Self {
        Self {
            store,
            config,
            transport,
            fingerprint: Fingerprint::capture(ctx),
            now: unix_timestamp(),
            state: None,
        }
    }

    /// Overrides the request timestamp this manager evaluates expiry and
    /// rotation against.
    pub fn with_now(mut self, now: i64) -> Self {
        self.now = now;
        self
    }

    /// Loads and validates the session presented by the transport.
    ///
    /// Validation order: the record exists and its payload decodes, the
    /// record is fresh (`now - last_activity < expiration`), the client
    /// address matches (when enabled), the user agent matches (when
    /// enabled). Any failure invalidates the live session without touching
    /// the durable row and returns `Ok(false)` so the caller falls back to
    /// [`sess_create`](Self::sess_create). Storage I/O failures propagate;
    /// a timed-out read degrades to "not found" instead.
    pub async fn sess_read(&mut self) -> Result<bool> {
        let presented = self
            .transport
            .current_session_id()
            .filter(|id| !id.is_empty());
        let Some(id) = presented else {
            debug!("a session was not found");
            self.sess_destroy(false).await?;
            return Ok(false);
        };

        let Some(record) = self.load_record(&id).await? else {
            debug!(session_id = %id, "a session was not found");
            self.sess_destroy(false).await?;
            return Ok(false);
        };

        // Structural check: the payload must decode back to a map. A record
        // that fails here is malformed, not an I/O error.
        let data = match record.decode_payload() {
            Ok(data) => data,
            Err(err) => {
                debug!(session_id = %id, error = %err, "malformed session record");
                self.sess_destroy(false).await?;
                return Ok(false);
            }
        };

        if self.now - record.last_activity >= self.config.expiration {
            debug!(session_id = %id, "session expired");
            self.sess_destroy(false).await?;
            return Ok(false);
        }

        let stored = Fingerprint {
            ip_address: record.ip_address,
            user_agent: record.user_agent,
        };
        if !stored.matches(
            &self.fingerprint,
            self.config.match_ip,
            self.config.match_user_agent,
        ) {
            debug!(session_id = %id, "session fingerprint mismatch");
            self.sess_destroy(false).await?;
            return Ok(false);
        }

        self.state = Some(ActiveSession {
            id,
            fingerprint: stored,
            last_activity: record.last_activity,
            data,
            snapshot: record.user_data,
        });
        Ok(true)
    }

    /// Starts a fresh session: current fingerprint, current timestamp,
    /// empty payload.
    ///
    /// Reuses the id the transport already carries (a destroy issues a
    /// replacement id beforehand) or generates and issues a new one. Nothing
    /// is persisted until [`sess_write`](Self::sess_write).
    pub fn sess_create(&mut self) {
        let id = match self.transport.current_session_id() {
            Some(id) if !id.is_empty() => id,
            _ => {
                let id = generate_session_id();
                self.transport.issue_session_id(&id);
                id
            }
        };
        self.state = Some(ActiveSession {
            id,
            fingerprint: self.fingerprint.clone(),
            last_activity: self.now,
            data: SessionMap::new(),
            snapshot: Vec::new(),
        });
    }

    /// Rotates the session id once the regeneration interval has elapsed.
    ///
    /// A no-op while `now - last_activity < time_to_update`, which caps both
    /// id exposure and rotation-driven storage churn. When due, a new id is
    /// issued, the payload is carried forward, the fingerprint is re-stamped
    /// from the current request and `last_activity` is refreshed. The row
    /// under the old id is left for the garbage collector.
    pub fn sess_update(&mut self) {
        let now = self.now;
        let current = self.fingerprint.clone();
        let Some(state) = self.state.as_mut() else {
            return;
        };
        if now - state.last_activity < self.config.time_to_update {
            return;
        }

        let id = generate_session_id();
        debug!(old_id = %state.id, new_id = %id, "session id rotated");
        self.transport.issue_session_id(&id);
        state.id = id;
        state.fingerprint = current;
        state.last_activity = now;
        // the rotated record must persist under the new id
        state.snapshot.clear();
    }

    /// Persists the payload if it changed since read time.
    ///
    /// The current payload encoding is compared against the snapshot taken
    /// by `sess_read`; an unchanged payload produces zero storage traffic.
    /// A dirty payload is written whole via an atomic upsert, stamping
    /// `last_activity` to the request timestamp. Storage failures propagate
    /// — masking one would leave client and server disagreeing about the
    /// session's contents.
    ///
    /// The garbage-collection sampling hook fires after every call.
    pub async fn sess_write(&mut self) -> Result<WriteOutcome> {
        let outcome = match self.state.as_mut() {
            Some(state) => {
                let encoded =
                    rmp_serde::to_vec(&state.data).map_err(|e| Error::Encode(e.to_string()))?;
                if encoded == state.snapshot {
                    WriteOutcome::Skipped
                } else {
                    state.last_activity = self.now;
                    let record = SessionRecord {
                        session_id: state.id.clone(),
                        ip_address: state.fingerprint.ip_address.clone(),
                        user_agent: state.fingerprint.user_agent.clone(),
                        last_activity: state.last_activity,
                        user_data: encoded.clone(),
                    };
                    self.store.upsert(&record).await?;
                    state.snapshot = encoded;
                    WriteOutcome::Persisted
                }
            }
            None => WriteOutcome::Skipped,
        };

        gc::maybe_collect(
            &self.store,
            self.config.gc_probability,
            self.now - self.config.expiration,
        );
        Ok(outcome)
    }

    /// Drops the live session and issues a replacement id.
    ///
    /// With `hard == true` the durable row is deleted as well, permanently
    /// removing the session; deletion failures propagate. With
    /// `hard == false` — the path taken on validation failures — the stale
    /// row is left behind for the garbage collector, or to be overwritten by
    /// a later create that happens to reuse the id.
    pub async fn sess_destroy(&mut self, hard: bool) -> Result<()> {
        let previous = self
            .state
            .take()
            .map(|state| state.id)
            .or_else(|| self.transport.current_session_id())
            .filter(|id| !id.is_empty());

        let id = generate_session_id();
        self.transport.issue_session_id(&id);

        if hard {
            if let Some(previous) = previous {
                self.store.delete(&previous).await?;
            }
        }
        Ok(())
    }

    /// The active session's payload, if a session is loaded.
    pub fn data(&self) -> Option<&SessionMap> {
        self.state.as_ref().map(|state| &state.data)
    }

    /// Mutable access to the active session's payload.
    pub fn data_mut(&mut self) -> Option<&mut SessionMap> {
        self.state.as_mut().map(|state| &mut state.data)
    }

    /// The active session's id.
    pub fn session_id(&self) -> Option<&str> {
        self.state.as_ref().map(|state| state.id.as_str())
    }

    /// Whether a session is currently loaded.
    pub fn is_active(&self) -> bool {
        self.state.is_some()
    }

    /// The transport this manager was built with.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    async fn load_record(&self, id: &str) -> Result<Option<SessionRecord>> {
        read_with_timeout(self.config.read_timeout, self.store.get(id)).await
    }
}

/// Bounds a storage read by the configured timeout. An elapsed timeout
/// degrades to "not found" so a slow backend costs the user their session,
/// not their request.
async fn read_with_timeout<F>(limit: Option<Duration>, load: F) -> Result<Option<SessionRecord>>
where
    F: Future<Output = Result<Option<SessionRecord>>>,
{
    match limit {
        Some(limit) => match tokio::time::timeout(limit, load).await {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    limit_ms = limit.as_millis() as u64,
                    "session read timed out, treating as not found"
                );
                Ok(None)
            }
        },
        None => load.await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::tests::memory_store;

    #[derive(Default)]
    struct MockTransport {
        current: Option<String>,
        issued: Vec<String>,
    }

    impl SessionTransport for MockTransport {
        fn current_session_id(&self) -> Option<String> {
            self.current.clone()
        }

        fn issue_session_id(&mut self, id: &str) {
            self.current = Some(id.to_string());
            self.issued.push(id.to_string());
        }
    }

    struct Ctx {
        ip: &'static str,
        ua: &'static str,
    }

    impl RequestContext for Ctx {
        fn client_address(&self) -> &str {
            self.ip
        }

        fn user_agent(&self) -> &str {
            self.ua
        }
    }

    fn test_config() -> Arc<SessionConfig> {
        // gc_probability 0 keeps tests free of background sweeps
        Arc::new(
            SessionConfig::default()
                .with_expiration(300)
                .with_gc_probability(0),
        )
    }

    fn manager(
        store: &SessionStore,
        config: &Arc<SessionConfig>,
        ip: &'static str,
        ua: &'static str,
        now: i64,
        current_id: Option<String>,
    ) -> SessionManager<MockTransport> {
        let transport = MockTransport {
            current: current_id,
            issued: Vec::new(),
        };
        SessionManager::new(store.clone(), config.clone(), &Ctx { ip, ua }, transport).with_now(now)
    }

    /// Creates a session at `now` with one payload entry and persists it.
    async fn seed_session(store: &SessionStore, config: &Arc<SessionConfig>, now: i64) -> String {
        let mut mgr = manager(store, config, "1.2.3.4", "Mozilla/5.0", now, None);
        assert!(!mgr.sess_read().await.unwrap());
        mgr.sess_create();
        mgr.data_mut()
            .unwrap()
            .insert("user".into(), serde_json::json!("alice"));
        assert_eq!(mgr.sess_write().await.unwrap(), WriteOutcome::Persisted);
        mgr.session_id().unwrap().to_string()
    }

    #[tokio::test]
    async fn read_without_cookie_reports_no_session() {
        let store = memory_store().await;
        let config = test_config();
        let mut mgr = manager(&store, &config, "1.2.3.4", "Mozilla/5.0", 0, None);
        assert!(!mgr.sess_read().await.unwrap());
        assert!(!mgr.is_active());
        // a replacement id was issued for the eventual create
        assert!(mgr.transport().current.is_some());
    }

    #[tokio::test]
    async fn create_write_read_roundtrip() {
        let store = memory_store().await;
        let config = test_config();
        let id = seed_session(&store, &config, 0).await;

        let mut mgr = manager(&store, &config, "1.2.3.4", "Mozilla/5.0", 100, Some(id.clone()));
        assert!(mgr.sess_read().await.unwrap());
        assert_eq!(mgr.session_id(), Some(id.as_str()));
        assert_eq!(
            mgr.data().unwrap().get("user"),
            Some(&serde_json::json!("alice"))
        );
    }

    #[tokio::test]
    async fn unchanged_payload_skips_the_write() {
        let store = memory_store().await;
        let config = test_config();
        let id = seed_session(&store, &config, 0).await;

        let mut mgr = manager(&store, &config, "1.2.3.4", "Mozilla/5.0", 100, Some(id.clone()));
        assert!(mgr.sess_read().await.unwrap());
        assert_eq!(mgr.sess_write().await.unwrap(), WriteOutcome::Skipped);

        // the row was untouched: last_activity still carries the seed time
        let row = store.get(&id).await.unwrap().unwrap();
        assert_eq!(row.last_activity, 0);
    }

    #[tokio::test]
    async fn mutated_payload_persists_and_refreshes_activity() {
        let store = memory_store().await;
        let config = test_config();
        let id = seed_session(&store, &config, 0).await;

        let mut mgr = manager(&store, &config, "1.2.3.4", "Mozilla/5.0", 100, Some(id.clone()));
        assert!(mgr.sess_read().await.unwrap());
        mgr.data_mut()
            .unwrap()
            .insert("cart".into(), serde_json::json!(3));
        assert_eq!(mgr.sess_write().await.unwrap(), WriteOutcome::Persisted);

        let row = store.get(&id).await.unwrap().unwrap();
        assert_eq!(row.last_activity, 100);
    }

    #[tokio::test]
    async fn expired_session_reads_as_not_found() {
        let store = memory_store().await;
        let config = test_config(); // expiration 300
        let id = seed_session(&store, &config, 0).await;

        let mut fresh = manager(&store, &config, "1.2.3.4", "Mozilla/5.0", 100, Some(id.clone()));
        assert!(fresh.sess_read().await.unwrap());

        let mut stale = manager(&store, &config, "1.2.3.4", "Mozilla/5.0", 400, Some(id.clone()));
        assert!(!stale.sess_read().await.unwrap());
        assert!(!stale.is_active());
        // soft destroy: the stale row is left for the collector
        assert!(store.get(&id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn ip_mismatch_fails_even_when_fresh() {
        let store = memory_store().await;
        let config = test_config();
        let id = seed_session(&store, &config, 0).await;

        let mut mgr = manager(&store, &config, "9.9.9.9", "Mozilla/5.0", 100, Some(id.clone()));
        assert!(!mgr.sess_read().await.unwrap());

        // disabling the check accepts the same request
        let relaxed = Arc::new(
            SessionConfig::default()
                .with_expiration(300)
                .with_gc_probability(0)
                .with_match_ip(false),
        );
        let mut mgr = manager(&store, &relaxed, "9.9.9.9", "Mozilla/5.0", 100, Some(id));
        assert!(mgr.sess_read().await.unwrap());
    }

    #[tokio::test]
    async fn user_agent_mismatch_fails_validation() {
        let store = memory_store().await;
        let config = test_config();
        let id = seed_session(&store, &config, 0).await;

        let mut mgr = manager(&store, &config, "1.2.3.4", "curl/8.0", 100, Some(id));
        assert!(!mgr.sess_read().await.unwrap());
    }

    #[tokio::test]
    async fn malformed_payload_degrades_to_no_session() {
        let store = memory_store().await;
        let config = test_config();
        store
            .upsert(&SessionRecord {
                session_id: "broken".into(),
                ip_address: "1.2.3.4".into(),
                user_agent: "Mozilla/5.0".into(),
                last_activity: 0,
                user_data: vec![0xc1], // never valid MessagePack
            })
            .await
            .unwrap();

        let mut mgr = manager(
            &store,
            &config,
            "1.2.3.4",
            "Mozilla/5.0",
            10,
            Some("broken".into()),
        );
        assert!(!mgr.sess_read().await.unwrap());
    }

    #[tokio::test]
    async fn update_rotates_when_interval_elapsed() {
        let store = memory_store().await;
        let config = test_config(); // time_to_update 300, expiration 300
        let long_lived = Arc::new(
            SessionConfig::default()
                .with_expiration(7200)
                .with_gc_probability(0),
        );
        let id = seed_session(&store, &config, 0).await;

        let mut mgr = manager(&store, &long_lived, "1.2.3.4", "Mozilla/5.0", 300, Some(id.clone()));
        assert!(mgr.sess_read().await.unwrap());
        mgr.sess_update();

        let new_id = mgr.session_id().unwrap().to_string();
        assert_ne!(new_id, id);
        // payload carried forward
        assert_eq!(
            mgr.data().unwrap().get("user"),
            Some(&serde_json::json!("alice"))
        );

        assert_eq!(mgr.sess_write().await.unwrap(), WriteOutcome::Persisted);
        let rotated = store.get(&new_id).await.unwrap().unwrap();
        assert_eq!(rotated.last_activity, 300);
        assert_eq!(
            rmp_serde::from_slice::<SessionMap>(&rotated.user_data)
                .unwrap()
                .get("user"),
            Some(&serde_json::json!("alice"))
        );
        // the old row stays until the collector sweeps it
        assert!(store.get(&id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn update_is_noop_before_interval() {
        let store = memory_store().await;
        let config = test_config();
        let id = seed_session(&store, &config, 0).await;

        let mut mgr = manager(&store, &config, "1.2.3.4", "Mozilla/5.0", 100, Some(id.clone()));
        assert!(mgr.sess_read().await.unwrap());
        mgr.sess_update();
        assert_eq!(mgr.session_id(), Some(id.as_str()));
        assert_eq!(mgr.sess_write().await.unwrap(), WriteOutcome::Skipped);
    }

    #[tokio::test]
    async fn hard_destroy_removes_the_row() {
        let store = memory_store().await;
        let config = test_config();
        let id = seed_session(&store, &config, 0).await;

        let mut mgr = manager(&store, &config, "1.2.3.4", "Mozilla/5.0", 100, Some(id.clone()));
        assert!(mgr.sess_read().await.unwrap());
        mgr.sess_destroy(true).await.unwrap();

        assert!(!mgr.is_active());
        assert!(store.get(&id).await.unwrap().is_none());
        // the transport carries a fresh id after destruction
        assert_ne!(mgr.transport().current.as_deref(), Some(id.as_str()));
    }

    #[tokio::test]
    async fn soft_destroy_keeps_the_row() {
        let store = memory_store().await;
        let config = test_config();
        let id = seed_session(&store, &config, 0).await;

        let mut mgr = manager(&store, &config, "1.2.3.4", "Mozilla/5.0", 100, Some(id.clone()));
        assert!(mgr.sess_read().await.unwrap());
        mgr.sess_destroy(false).await.unwrap();

        assert!(!mgr.is_active());
        assert!(store.get(&id).await.unwrap().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn timed_out_read_degrades_to_not_found() {
        // a load that never completes must come back as "no session", not
        // as an error surfaced to the caller
        let result = read_with_timeout(Some(Duration::from_millis(10)), std::future::pending())
            .await
            .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn unbounded_read_passes_result_through() {
        let result = read_with_timeout(None, std::future::ready(Ok(None)))
            .await
            .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn read_timeout_config_still_serves_fast_reads() {
        let store = memory_store().await;
        let config = Arc::new(
            SessionConfig::default()
                .with_expiration(300)
                .with_gc_probability(0)
                .with_read_timeout(Duration::from_secs(5)),
        );
        let id = seed_session(&store, &config, 0).await;

        let mut mgr = manager(&store, &config, "1.2.3.4", "Mozilla/5.0", 100, Some(id));
        assert!(mgr.sess_read().await.unwrap());
    }

    #[tokio::test]
    async fn create_after_failed_read_reuses_issued_id() {
        let store = memory_store().await;
        let config = test_config();
        let mut mgr = manager(&store, &config, "1.2.3.4", "Mozilla/5.0", 0, None);
        assert!(!mgr.sess_read().await.unwrap());

        let issued = mgr.transport().current.clone().unwrap();
        mgr.sess_create();
        assert_eq!(mgr.session_id(), Some(issued.as_str()));
        assert_eq!(mgr.session_id().unwrap().len(), SESSION_ID_LEN);
    }
}
