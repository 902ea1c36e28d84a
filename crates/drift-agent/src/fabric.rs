//! The agent fabric: authentication, catalogs, and file RPCs.

use crate::auth::{ChallengeCache, TokenCache, verify};
use crate::channel::{AgentChannel, AgentPush};
use crate::registry::{AgentInfo, AgentRegistry};
use crate::tickets::TicketTable;
use arc_swap::ArcSwap;
use async_trait::async_trait;
use dashmap::DashMap;
use drift_core::{
    CoreError, Event, EventBus, RemoteContent, RemoteFileInfo, RemoteShare, Result,
    UploadCompletion, WaitKey, WaitOp, WaitRegistry,
};
use drift_proto::ByteSource;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// One file in an agent's uploaded share catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentShareEntry {
    /// Remote name the file is advertised under.
    pub filename: String,
    /// Size in bytes.
    pub size: u64,
}

/// The controller-side fan-out fabric.
pub struct AgentFabric {
    registry: AgentRegistry,
    challenges: ChallengeCache,
    tokens: TokenCache,
    tickets: TicketTable,
    info_waiters: WaitRegistry<RemoteFileInfo>,
    /// Pre-shared secret per lowercased agent name.
    secrets: ArcSwap<HashMap<String, String>>,
    /// Last uploaded catalog per lowercased agent name.
    catalogs: DashMap<String, Vec<AgentShareEntry>>,
    events: EventBus,
}

impl AgentFabric {
    /// Build the fabric with the configured agent secrets.
    #[must_use]
    pub fn new(secrets: HashMap<String, String>, events: EventBus) -> Arc<Self> {
        Arc::new(AgentFabric {
            registry: AgentRegistry::default(),
            challenges: ChallengeCache::default(),
            tokens: TokenCache::default(),
            tickets: TicketTable::default(),
            info_waiters: WaitRegistry::default(),
            secrets: ArcSwap::from_pointee(normalize_secrets(secrets)),
            catalogs: DashMap::new(),
            events,
        })
    }

    /// Replace the secret table after a configuration change. Existing
    /// registrations survive; new logins use the new secrets.
    pub fn update_secrets(&self, secrets: HashMap<String, String>) {
        self.secrets.store(Arc::new(normalize_secrets(secrets)));
    }

    /// A new control connection arrived: issue and push its challenge.
    pub async fn handle_connect(&self, channel: Arc<dyn AgentChannel>) -> Result<()> {
        let challenge = self.challenges.issue(&channel.connection_id())?;
        tracing::debug!(connection = %channel.connection_id(), "challenging agent connection");
        channel
            .push(AgentPush::Challenge {
                token: challenge.to_vec(),
            })
            .await
    }

    /// Authenticate an agent's challenge response and register it.
    ///
    /// Success replaces any prior registration for the name. Failure leaves
    /// the connection unregistered; the transport should drop it.
    pub fn login(
        &self,
        channel: Arc<dyn AgentChannel>,
        agent_name: &str,
        challenge_response: &[u8],
    ) -> Result<AgentInfo> {
        let connection_id = channel.connection_id();
        let challenge = self
            .challenges
            .take(&connection_id)
            .ok_or_else(|| CoreError::unauthorized("no live challenge for connection"))?;

        let secrets = self.secrets.load();
        let secret = secrets
            .get(&agent_name.to_lowercase())
            .ok_or_else(|| CoreError::unauthorized("unknown agent"))?;

        if !verify(secret.as_bytes(), &challenge, challenge_response) {
            tracing::warn!(agent = %agent_name, connection = %connection_id, "agent authentication failed");
            return Err(CoreError::unauthorized("challenge verification failed"));
        }

        let info = AgentInfo {
            name: agent_name.to_string(),
            remote_ip: channel.remote_ip(),
            connection_id,
            connected_at: SystemTime::now(),
        };
        if let Some(replaced) = self.registry.register(info.clone(), channel) {
            tracing::info!(agent = %replaced.name, "replaced prior agent registration");
        }
        tracing::info!(agent = %info.name, ip = %info.remote_ip, "agent registered");
        self.events.publish(Event::AgentRegistered {
            name: info.name.clone(),
        });
        Ok(info)
    }

    /// A control connection dropped. Outstanding waiters and tickets for
    /// the agent fail with [`CoreError::AgentDisconnected`].
    pub fn handle_disconnect(&self, connection_id: &str) {
        let Some(name) = self.registry.deregister_connection(connection_id) else {
            return;
        };
        tracing::info!(agent = %name, "agent disconnected");
        self.info_waiters
            .fail_all_for(&name, || CoreError::AgentDisconnected(name.clone().into()));
        self.tickets.fail_all_for(&name);
        self.catalogs.remove(&name);
        self.events.publish(Event::AgentDeregistered { name });
    }

    /// An agent is about to upload its share catalog; issue the one-shot
    /// credential its HTTP request must sign.
    pub fn begin_share_upload(&self, agent: &str) -> Result<Uuid> {
        if self.registry.get(agent).is_none() {
            return Err(CoreError::precondition("agent is not registered"));
        }
        Ok(self.tokens.issue(agent))
    }

    /// Inbound reply to a file-info request.
    pub fn return_file_info(&self, agent: &str, id: Uuid, exists: bool, length: u64) {
        let key = WaitKey::new(WaitOp::FileInfo, agent, id);
        if !self
            .info_waiters
            .complete(&key, RemoteFileInfo { exists, length })
        {
            tracing::debug!(agent = %agent, %id, "unsolicited file info reply");
        }
    }

    /// Inbound failure report for a pending file upload.
    pub fn notify_file_upload_failed(&self, token: Uuid, error: &str) {
        if !self
            .tickets
            .fail(token, CoreError::RemoteProtocol(error.to_string().into()))
        {
            tracing::debug!(%token, "failure report for unknown ticket");
        }
    }

    /// Validate a one-shot upload credential from an HTTP channel.
    ///
    /// The token is consumed by this call whatever the outcome; a replay
    /// fails here with `Unauthorized`.
    pub fn validate_upload_credential(&self, token: Uuid, signature: &[u8]) -> Result<String> {
        let agent = self
            .tokens
            .consume(token)
            .ok_or_else(|| CoreError::unauthorized("unknown or spent upload token"))?;

        let secrets = self.secrets.load();
        let secret = secrets
            .get(&agent)
            .ok_or_else(|| CoreError::unauthorized("unknown agent"))?;

        if !verify(secret.as_bytes(), token.as_bytes(), signature) {
            return Err(CoreError::unauthorized("bad upload token signature"));
        }
        Ok(agent)
    }

    /// Store an agent's uploaded share catalog.
    pub fn store_share_catalog(&self, agent: &str, entries: Vec<AgentShareEntry>) {
        tracing::info!(agent = %agent, files = entries.len(), "agent share catalog updated");
        self.catalogs.insert(agent.to_lowercase(), entries);
    }

    /// Deliver an arrived data-channel stream to its ticket.
    pub(crate) fn deliver_stream(
        &self,
        token: Uuid,
        source: ByteSource,
        completion: UploadCompletion,
    ) -> bool {
        self.tickets.resolve(token, source, completion)
    }

    /// Expire stale challenges and tokens; wire to the minute tick.
    pub fn sweep(&self) {
        self.challenges.sweep();
        self.tokens.sweep();
    }

    /// The connected-agent registry.
    #[must_use]
    pub fn registry(&self) -> &AgentRegistry {
        &self.registry
    }
}

fn normalize_secrets(secrets: HashMap<String, String>) -> HashMap<String, String> {
    secrets
        .into_iter()
        .map(|(name, secret)| (name.to_lowercase(), secret))
        .collect()
}

#[async_trait]
impl RemoteContent for AgentFabric {
    fn resolve_shared(&self, remote_name: &str) -> Option<RemoteShare> {
        for entry in self.catalogs.iter() {
            // Only catalogs of currently-registered agents are servable.
            if self.registry.get(entry.key()).is_none() {
                continue;
            }
            if let Some(file) = entry
                .value()
                .iter()
                .find(|f| f.filename.eq_ignore_ascii_case(remote_name))
            {
                return Some(RemoteShare {
                    agent: entry.key().clone(),
                    filename: file.filename.clone(),
                    size: file.size,
                });
            }
        }
        None
    }

    async fn file_info(
        &self,
        agent: &str,
        filename: &str,
        timeout: Duration,
    ) -> Result<RemoteFileInfo> {
        let channel = self
            .registry
            .channel(agent)
            .ok_or_else(|| CoreError::AgentDisconnected(agent.to_lowercase().into()))?;

        let id = Uuid::new_v4();
        // Registered before the push so a fast reply cannot be lost.
        let waiter = self
            .info_waiters
            .register(WaitKey::new(WaitOp::FileInfo, agent, id));

        channel
            .push(AgentPush::RequestFileInfo {
                filename: filename.to_string(),
                id,
            })
            .await?;

        waiter.wait(timeout, &CancellationToken::new()).await
    }

    async fn fetch(
        &self,
        agent: &str,
        filename: &str,
        timeout: Duration,
    ) -> Result<(ByteSource, UploadCompletion)> {
        let channel = self
            .registry
            .channel(agent)
            .ok_or_else(|| CoreError::AgentDisconnected(agent.to_lowercase().into()))?;

        let token = self.tokens.issue(agent);
        let arrival = self.tickets.open(token, agent, filename);

        channel
            .push(AgentPush::RequestFileUpload {
                filename: filename.to_string(),
                token,
            })
            .await?;

        match tokio::time::timeout(timeout, arrival).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(CoreError::AgentDisconnected(agent.to_lowercase().into())),
            Err(_) => {
                // Expire the ticket and spend the credential: a late POST
                // for this token must be rejected as unauthorized.
                self.tickets.discard(token);
                let _ = self.tokens.consume(token);
                Err(CoreError::timeout("agent data channel never arrived"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::sign;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::net::IpAddr;

    /// Records pushes; replies are driven by the tests.
    struct ScriptedChannel {
        id: String,
        pushes: Mutex<Vec<AgentPush>>,
    }

    impl ScriptedChannel {
        fn new(id: &str) -> Arc<Self> {
            Arc::new(ScriptedChannel {
                id: id.to_string(),
                pushes: Mutex::new(Vec::new()),
            })
        }

        fn last_push(&self) -> Option<AgentPush> {
            self.pushes.lock().last().cloned()
        }
    }

    #[async_trait]
    impl AgentChannel for ScriptedChannel {
        async fn push(&self, message: AgentPush) -> Result<()> {
            self.pushes.lock().push(message);
            Ok(())
        }
        fn connection_id(&self) -> String {
            self.id.clone()
        }
        fn remote_ip(&self) -> IpAddr {
            "10.1.1.1".parse().unwrap()
        }
    }

    fn fabric() -> Arc<AgentFabric> {
        AgentFabric::new(
            HashMap::from([("attic".to_string(), "s3cret".to_string())]),
            EventBus::default(),
        )
    }

    async fn connect_and_login(
        fabric: &Arc<AgentFabric>,
        channel: &Arc<ScriptedChannel>,
        name: &str,
        secret: &str,
    ) -> Result<AgentInfo> {
        fabric
            .handle_connect(Arc::clone(channel) as Arc<dyn AgentChannel>)
            .await
            .unwrap();
        let Some(AgentPush::Challenge { token }) = channel.last_push() else {
            panic!("no challenge pushed");
        };
        let response = sign(secret.as_bytes(), &token);
        fabric.login(
            Arc::clone(channel) as Arc<dyn AgentChannel>,
            name,
            &response,
        )
    }

    #[tokio::test]
    async fn test_login_happy_path() {
        let fabric = fabric();
        let channel = ScriptedChannel::new("c1");

        let info = connect_and_login(&fabric, &channel, "Attic", "s3cret")
            .await
            .unwrap();
        assert_eq!(info.name, "Attic");
        assert!(fabric.registry().get("attic").is_some());
    }

    #[tokio::test]
    async fn test_login_wrong_secret_fails() {
        let fabric = fabric();
        let channel = ScriptedChannel::new("c1");

        let err = connect_and_login(&fabric, &channel, "attic", "wrong")
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Unauthorized(_)));
        assert!(fabric.registry().is_empty());

        // The challenge was consumed by the failed attempt.
        let replay = fabric.login(
            Arc::clone(&channel) as Arc<dyn AgentChannel>,
            "attic",
            &[0u8; 32],
        );
        assert!(matches!(replay, Err(CoreError::Unauthorized(_))));
    }

    #[tokio::test]
    async fn test_login_unknown_agent_fails() {
        let fabric = fabric();
        let channel = ScriptedChannel::new("c1");
        let err = connect_and_login(&fabric, &channel, "cellar", "s3cret")
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Unauthorized(_)));
    }

    #[tokio::test]
    async fn test_file_info_round_trip() {
        let fabric = fabric();
        let channel = ScriptedChannel::new("c1");
        connect_and_login(&fabric, &channel, "attic", "s3cret")
            .await
            .unwrap();

        let fabric_clone = Arc::clone(&fabric);
        let channel_clone = Arc::clone(&channel);
        let responder = tokio::spawn(async move {
            // Wait for the request push, then answer it.
            loop {
                if let Some(AgentPush::RequestFileInfo { id, .. }) = channel_clone.last_push() {
                    fabric_clone.return_file_info("attic", id, true, 123_456);
                    break;
                }
                tokio::task::yield_now().await;
            }
        });

        let info = fabric
            .file_info("attic", r"music\x.mp3", Duration::from_secs(2))
            .await
            .unwrap();
        assert!(info.exists);
        assert_eq!(info.length, 123_456);
        responder.await.unwrap();
    }

    #[tokio::test]
    async fn test_file_info_timeout() {
        let fabric = fabric();
        let channel = ScriptedChannel::new("c1");
        connect_and_login(&fabric, &channel, "attic", "s3cret")
            .await
            .unwrap();

        let err = fabric
            .file_info("attic", r"music\x.mp3", Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_file_info_disconnected_agent() {
        let fabric = fabric();
        let err = fabric
            .file_info("ghost", "x", Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::AgentDisconnected(_)));
    }

    #[tokio::test]
    async fn test_fetch_timeout_spends_token() {
        let fabric = fabric();
        let channel = ScriptedChannel::new("c1");
        connect_and_login(&fabric, &channel, "attic", "s3cret")
            .await
            .unwrap();

        let err = fabric
            .fetch("attic", r"music\x.mp3", Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Timeout(_)));

        // The pushed token is now unusable even with a valid signature.
        let Some(AgentPush::RequestFileUpload { token, .. }) = channel.last_push() else {
            panic!("no upload request pushed");
        };
        let signature = sign(b"s3cret", token.as_bytes());
        assert!(matches!(
            fabric.validate_upload_credential(token, &signature),
            Err(CoreError::Unauthorized(_))
        ));
    }

    #[tokio::test]
    async fn test_disconnect_fails_outstanding_waiters() {
        let fabric = fabric();
        let channel = ScriptedChannel::new("c1");
        connect_and_login(&fabric, &channel, "attic", "s3cret")
            .await
            .unwrap();

        let fabric_clone = Arc::clone(&fabric);
        let pending = tokio::spawn(async move {
            fabric_clone
                .file_info("attic", "x", Duration::from_secs(10))
                .await
        });
        tokio::task::yield_now().await;

        fabric.handle_disconnect("c1");

        let err = pending.await.unwrap().unwrap_err();
        assert!(matches!(err, CoreError::AgentDisconnected(_)));
        assert!(fabric.registry().is_empty());
    }

    #[tokio::test]
    async fn test_resolve_shared_requires_live_agent() {
        let fabric = fabric();
        let channel = ScriptedChannel::new("c1");
        connect_and_login(&fabric, &channel, "attic", "s3cret")
            .await
            .unwrap();

        fabric.store_share_catalog(
            "attic",
            vec![AgentShareEntry {
                filename: r"attic-share\song.mp3".to_string(),
                size: 999,
            }],
        );

        let share = fabric.resolve_shared(r"ATTIC-SHARE\song.mp3").unwrap();
        assert_eq!(share.agent, "attic");
        assert_eq!(share.size, 999);

        fabric.handle_disconnect("c1");
        assert!(fabric.resolve_shared(r"attic-share\song.mp3").is_none());
    }

    #[tokio::test]
    async fn test_credential_validation_single_use() {
        let fabric = fabric();
        let channel = ScriptedChannel::new("c1");
        connect_and_login(&fabric, &channel, "attic", "s3cret")
            .await
            .unwrap();

        let token = fabric.begin_share_upload("attic").unwrap();
        let signature = sign(b"s3cret", token.as_bytes());

        assert_eq!(
            fabric.validate_upload_credential(token, &signature).unwrap(),
            "attic"
        );
        // One successful validation at most; the replay is unauthorized.
        assert!(matches!(
            fabric.validate_upload_credential(token, &signature),
            Err(CoreError::Unauthorized(_))
        ));
    }

    #[tokio::test]
    async fn test_bad_signature_also_spends_token() {
        let fabric = fabric();
        let channel = ScriptedChannel::new("c1");
        connect_and_login(&fabric, &channel, "attic", "s3cret")
            .await
            .unwrap();

        let token = fabric.begin_share_upload("attic").unwrap();
        assert!(matches!(
            fabric.validate_upload_credential(token, &[0u8; 32]),
            Err(CoreError::Unauthorized(_))
        ));

        // Even the correct signature fails now.
        let signature = sign(b"s3cret", token.as_bytes());
        assert!(matches!(
            fabric.validate_upload_credential(token, &signature),
            Err(CoreError::Unauthorized(_))
        ));
    }
}
