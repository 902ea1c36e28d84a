//! Daemon assembly and lifecycle.

use crate::overlay::LoopbackOverlay;
use anyhow::Context;
use arc_swap::ArcSwap;
use async_trait::async_trait;
use dashmap::DashMap;
use drift_agent::AgentFabric;
use drift_core::{
    Clock, ConfigSnapshot, CoreError, EngineOptions, Event, EventBus, RemoteContent,
    SessionController, ShareScanState, StateSnapshot, StateStore, Tick, TransferEngine,
    TransferStore,
};
use drift_index::{FillState, IndexOptions, RootSpec, SharesIndex};
use drift_proto::{
    EnqueueRefusal, OverlayClient, PeerRequestHandler, PeerSearchResponse, RemoteDirectory,
    SearchReply, SearchRequest, UserInfo,
};
use drift_store::{SqliteSearchStore, SqliteTransferStore};
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// The assembled daemon.
pub struct App {
    shutdown: CancellationToken,
    index: Arc<SharesIndex>,
    engine: Arc<TransferEngine>,
    fabric: Arc<AgentFabric>,
    session: Arc<SessionController>,
    overlay: Arc<dyn OverlayClient>,
    searches: Arc<SearchLog>,
    state: Arc<StateStore>,
    events: EventBus,
    clock: Clock,
    agent_listen_addr: String,
}

impl App {
    /// Wire every subsystem together. Configuration problems here are
    /// fatal by design.
    pub fn build(config: ConfigSnapshot, data_dir: &Path) -> anyhow::Result<Self> {
        config
            .validate()
            .map_err(|err| anyhow::anyhow!("invalid configuration: {err}"))?;
        std::fs::create_dir_all(data_dir)
            .with_context(|| format!("creating data directory {}", data_dir.display()))?;

        let shutdown = CancellationToken::new();
        let events = EventBus::default();
        let state = Arc::new(StateStore::new(StateSnapshot {
            version: env!("CARGO_PKG_VERSION").to_string(),
            ..Default::default()
        }));

        let index = Arc::new(
            SharesIndex::new(IndexOptions {
                roots: RootSpec::parse_all(&config.shares.roots)?,
                filters: config.shares.filters.clone(),
                response_limit: config.shares.response_limit.0,
                remove_single_character_terms: config.shares.remove_single_character_terms,
                storage_mode: config.shares.storage_mode.into(),
                disk_index_path: Some(data_dir.join("share-index.db")),
                workers: config.shares.workers,
            })
            .context("building share index")?,
        );

        let transfer_store: Arc<dyn TransferStore> = Arc::new(
            SqliteTransferStore::open(&data_dir.join("transfers.db"))
                .context("opening transfers.db")?,
        );
        let search_store = Arc::new(
            SqliteSearchStore::open(&data_dir.join("search.db")).context("opening search.db")?,
        );

        let fabric = AgentFabric::new(config.agents.secrets.clone(), events.clone());
        let overlay: Arc<dyn OverlayClient> = Arc::new(LoopbackOverlay::default());
        let groups = config.groups.build_registry();
        let engine_options = EngineOptions::from_config(&config);
        let agent_listen_addr = config.network.agent_listen_addr.clone();

        let engine = Arc::new(TransferEngine::new(
            transfer_store,
            Arc::clone(&index),
            Arc::clone(&overlay),
            Some(Arc::clone(&fabric) as Arc<dyn RemoteContent>),
            events.clone(),
            groups,
            engine_options,
            shutdown.clone(),
        ));

        let config_handle = Arc::new(ArcSwap::from_pointee(config));
        let session = Arc::new(SessionController::new(
            Arc::clone(&overlay),
            Arc::clone(&config_handle),
            Arc::clone(&state),
            events.clone(),
            Arc::clone(&index),
            shutdown.clone(),
        ));

        let searches = Arc::new(SearchLog::new(search_store));
        let handler = Arc::new(DaemonHandler {
            index: Arc::clone(&index),
            engine: Arc::clone(&engine),
            searches: Arc::clone(&searches),
            upload_slots: config_handle.load().transfers.upload_slots,
        });
        overlay.install_handler(handler);

        let clock = Clock::spawn(shutdown.clone());

        Ok(App {
            shutdown,
            index,
            engine,
            fabric,
            session,
            overlay,
            searches,
            state,
            events,
            clock,
            agent_listen_addr,
        })
    }

    /// Start an overlay search on the operator's behalf; responses stream
    /// into `search.db` as peers answer. This is the integration point the
    /// frontend layer drives.
    pub async fn begin_search(&self, query: &str) -> anyhow::Result<Uuid> {
        let token = rand_token();
        let id = self.searches.begin(query, token)?;
        self.overlay
            .search(
                query,
                drift_proto::SearchScope::Network,
                token,
                self.shutdown.child_token(),
            )
            .await
            .map_err(|err| anyhow::anyhow!("search failed: {err}"))?;
        Ok(id)
    }

    /// Run until ctrl-c.
    pub async fn run(self) -> anyhow::Result<()> {
        self.engine.start().map_err(|err| anyhow::anyhow!(err))?;

        // Initial share scan, off the runtime's async threads.
        {
            let index = Arc::clone(&self.index);
            let state = Arc::clone(&self.state);
            let events = self.events.clone();
            tokio::task::spawn_blocking(move || {
                let result = index.refill(|fill| {
                    events.publish(Event::ShareScan(fill.clone()));
                    state.update(|s| s.with_shares(scan_state(&fill, &s.shares)));
                });
                if let Err(err) = result {
                    tracing::error!(error = %err, "initial share scan failed");
                }
            });
        }

        // Agent cache sweeping rides the minute tick.
        {
            let fabric = Arc::clone(&self.fabric);
            let mut ticks = self.clock.subscribe();
            let shutdown = self.shutdown.clone();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        tick = ticks.recv() => match tick {
                            Ok(Tick::Minute) => fabric.sweep(),
                            Ok(_) => {}
                            Err(_) => break,
                        },
                    }
                }
            });
        }

        // Agent ingest listener.
        let listener = tokio::net::TcpListener::bind(&self.agent_listen_addr)
            .await
            .with_context(|| format!("binding agent listener on {}", self.agent_listen_addr))?;
        tracing::info!(addr = %self.agent_listen_addr, "agent ingest listening");
        {
            let router = drift_agent::router(Arc::clone(&self.fabric));
            let shutdown = self.shutdown.clone();
            tokio::spawn(async move {
                let result = axum::serve(listener, router)
                    .with_graceful_shutdown(shutdown.cancelled_owned())
                    .await;
                if let Err(err) = result {
                    tracing::error!(error = %err, "agent listener failed");
                }
            });
        }

        // Overlay session.
        let session = tokio::spawn(Arc::clone(&self.session).run());

        tokio::signal::ctrl_c()
            .await
            .context("waiting for shutdown signal")?;
        tracing::info!("shutting down");
        self.shutdown.cancel();

        let _ = session.await;
        Ok(())
    }
}

fn scan_state(fill: &FillState, prior: &ShareScanState) -> ShareScanState {
    match fill {
        FillState::Filling => ShareScanState {
            filling: true,
            progress: 0.0,
            faulted: false,
            ..prior.clone()
        },
        FillState::Progress(progress) => ShareScanState {
            filling: true,
            progress: *progress,
            ..prior.clone()
        },
        FillState::Completed { directories, files } => ShareScanState {
            filling: false,
            progress: 1.0,
            directories: *directories,
            files: *files,
            faulted: false,
        },
        FillState::Faulted(_) => ShareScanState {
            filling: false,
            faulted: true,
            ..prior.clone()
        },
    }
}

fn rand_token() -> u32 {
    // Uuid is the daemon's random source everywhere else; fold one down.
    let bytes = Uuid::new_v4().into_bytes();
    u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

/// Records operator searches and the responses streaming back.
struct SearchLog {
    store: Arc<SqliteSearchStore>,
    by_token: DashMap<u32, Uuid>,
}

impl SearchLog {
    fn new(store: Arc<SqliteSearchStore>) -> Self {
        SearchLog {
            store,
            by_token: DashMap::new(),
        }
    }

    fn begin(&self, text: &str, token: u32) -> anyhow::Result<Uuid> {
        let id = self
            .store
            .create(text, token)
            .map_err(|err| anyhow::anyhow!("recording search: {err}"))?;
        self.by_token.insert(token, id);
        Ok(id)
    }

    fn record(&self, response: &PeerSearchResponse) {
        let Some(id) = self.by_token.get(&response.token).map(|e| *e) else {
            tracing::debug!(token = response.token, "response for unknown search");
            return;
        };
        if let Err(err) = self.store.record_response(id, response) {
            tracing::warn!(error = %err, "failed to record search response");
        }
    }
}

/// Answers inbound peer requests from the catalog and the engine.
struct DaemonHandler {
    index: Arc<SharesIndex>,
    engine: Arc<TransferEngine>,
    searches: Arc<SearchLog>,
    upload_slots: u32,
}

#[async_trait]
impl PeerRequestHandler for DaemonHandler {
    async fn resolve_browse(&self) -> Vec<RemoteDirectory> {
        self.index.browse()
    }

    async fn resolve_directory(&self, remote_path: &str) -> Option<RemoteDirectory> {
        self.index.list(remote_path).ok()
    }

    async fn resolve_user_info(&self) -> UserInfo {
        UserInfo {
            description: String::new(),
            picture: None,
            upload_slots: self.upload_slots,
            queue_length: self.engine.upload_queue_length(),
            has_free_slot: self.engine.has_free_upload_slot(),
        }
    }

    async fn enqueue_upload(
        &self,
        peer: &str,
        remote_name: &str,
    ) -> Result<(), EnqueueRefusal> {
        match self.engine.enqueue_upload(peer, remote_name).await {
            Ok(_) => Ok(()),
            Err(CoreError::Blacklisted(_)) => Err(EnqueueRefusal::Banned),
            Err(CoreError::AlreadyExists(_)) => Err(EnqueueRefusal::AlreadyQueued),
            Err(CoreError::NotFound(_)) => Err(EnqueueRefusal::NotShared),
            Err(err) => Err(EnqueueRefusal::Other(err.to_string())),
        }
    }

    async fn resolve_search(&self, request: SearchRequest) -> Option<SearchReply> {
        let hits = match self.index.search(&request.query, false) {
            Ok(hits) => hits,
            Err(err) => {
                tracing::warn!(error = %err, query = %request.query, "search failed");
                return None;
            }
        };
        if hits.is_empty() {
            return None;
        }
        Some(SearchReply {
            files: hits.iter().map(|f| f.to_remote()).collect(),
            has_free_slot: self.engine.has_free_upload_slot(),
            upload_speed: 0,
            queue_length: self.engine.upload_queue_length(),
        })
    }

    async fn search_response_received(&self, response: PeerSearchResponse) {
        self.searches.record(&response);
    }
}
