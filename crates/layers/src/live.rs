//! The live track layer: one task that owns the feature table and drives the
//! commit/pack cadence.
//!
//! Feature events from the connection, commands from [`LiveLayerHandle`]s and
//! ticks from the owned [`Ticker`] are all handled on the same task, so the
//! store is never shared and needs no locks. The ticker lives exactly as long
//! as the layer.

use std::time::Duration;

use runtime::{
    COMMITS, COMMITTED_FEATURES, FEATURES_EVICTED, FEATURES_RECEIVED, Frame, Metrics,
    MetricsSnapshot, PACK_SHRINKS, PACKED_FEATURES, PACKS, Ticker,
};
use serde::{Deserialize, Serialize};
use streaming::{
    ConnectionConfig, ConnectionHandle, ConnectionManager, ConnectionStatus, Connector, Feature,
    StreamEvent, StreamObserver,
};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::atlas::SharedAtlas;
use crate::handoff::BufferSink;
use crate::hit_test::{MapQuery, ScreenProjector, ScreenQuery, hit_test_map, hit_test_screen};
use crate::packer::{PackOptions, SLOTS_PER_MARKER, ViewState, pack};
use crate::store::{FeatureStore, StoreConfig};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayerConfig {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub pack: PackOptions,
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,
}

fn default_tick_ms() -> u64 {
    runtime::DEFAULT_TICK_PERIOD.as_millis() as u64
}

impl Default for LayerConfig {
    fn default() -> Self {
        Self {
            store: StoreConfig::default(),
            pack: PackOptions::default(),
            tick_ms: default_tick_ms(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum LayerError {
    #[error("live layer task has stopped")]
    Stopped,
}

enum LayerCommand {
    SetViewState(ViewState),
    HitTestMap {
        query: MapQuery,
        reply: oneshot::Sender<Option<Feature>>,
    },
    HitTestScreen {
        projector: Box<dyn ScreenProjector + Send>,
        query: ScreenQuery,
        reply: oneshot::Sender<Option<Feature>>,
    },
    Connect(ConnectionConfig),
    Disconnect,
    IsConnected(oneshot::Sender<bool>),
    Metrics(oneshot::Sender<MetricsSnapshot>),
}

/// Cloneable client of a running layer. The layer stops once every handle is dropped.
#[derive(Clone)]
pub struct LiveLayerHandle {
    commands: mpsc::Sender<LayerCommand>,
    status: watch::Receiver<ConnectionStatus>,
}

impl LiveLayerHandle {
    async fn send(&self, cmd: LayerCommand) -> Result<(), LayerError> {
        self.commands.send(cmd).await.map_err(|_| LayerError::Stopped)
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> LayerCommand,
    ) -> Result<T, LayerError> {
        let (tx, rx) = oneshot::channel();
        self.send(make(tx)).await?;
        rx.await.map_err(|_| LayerError::Stopped)
    }

    /// Update the viewpoint and visible extent used by the next pack.
    pub async fn set_view_state(&self, view: ViewState) -> Result<(), LayerError> {
        self.send(LayerCommand::SetViewState(view)).await
    }

    /// Open a connection, replacing (and destroying) any current one.
    pub async fn connect(&self, config: ConnectionConfig) -> Result<(), LayerError> {
        self.send(LayerCommand::Connect(config)).await
    }

    pub async fn disconnect(&self) -> Result<(), LayerError> {
        self.send(LayerCommand::Disconnect).await
    }

    pub async fn is_connected(&self) -> Result<bool, LayerError> {
        self.request(LayerCommand::IsConnected).await
    }

    pub async fn hit_test_map(&self, query: MapQuery) -> Result<Option<Feature>, LayerError> {
        self.request(|reply| LayerCommand::HitTestMap { query, reply })
            .await
    }

    pub async fn hit_test_screen(
        &self,
        projector: impl ScreenProjector + Send + 'static,
        query: ScreenQuery,
    ) -> Result<Option<Feature>, LayerError> {
        self.request(|reply| LayerCommand::HitTestScreen {
            projector: Box::new(projector),
            query,
            reply,
        })
        .await
    }

    pub async fn metrics(&self) -> Result<MetricsSnapshot, LayerError> {
        self.request(LayerCommand::Metrics).await
    }

    /// Status of the current connection, as last reported by it.
    pub fn status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.clone()
    }
}

/// Tags events with the connection they came from so a replaced connection's
/// late reports can be ignored.
struct TaggedObserver {
    generation: u64,
    events: mpsc::UnboundedSender<(u64, StreamEvent)>,
}

impl StreamObserver for TaggedObserver {
    fn on_feature(&mut self, feature: Feature) {
        let _ = self
            .events
            .send((self.generation, StreamEvent::Feature(feature)));
    }

    fn on_status_change(&mut self, status: ConnectionStatus) {
        let _ = self
            .events
            .send((self.generation, StreamEvent::Status(status)));
    }
}

pub struct LiveLayer<C, S> {
    config: LayerConfig,
    atlas: SharedAtlas,
    connector: C,
    sink: S,
    store: FeatureStore,
    view: Option<ViewState>,
    metrics: Metrics,
    connection: Option<ConnectionHandle>,
    generation: u64,
    sink_open: bool,
    events_tx: mpsc::UnboundedSender<(u64, StreamEvent)>,
    events_rx: mpsc::UnboundedReceiver<(u64, StreamEvent)>,
    commands: mpsc::Receiver<LayerCommand>,
    status: watch::Sender<ConnectionStatus>,
}

impl<C, S> LiveLayer<C, S>
where
    C: Connector + Clone,
    S: BufferSink,
{
    /// Spawn the layer task. Must be called from within a tokio runtime.
    pub fn spawn(
        config: LayerConfig,
        atlas: SharedAtlas,
        connector: C,
        sink: S,
    ) -> (LiveLayerHandle, JoinHandle<()>) {
        let (commands_tx, commands_rx) = mpsc::channel(64);
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(ConnectionStatus::Disconnected);

        let layer = LiveLayer {
            store: FeatureStore::new(config.store),
            config,
            atlas,
            connector,
            sink,
            view: None,
            metrics: Metrics::new(),
            connection: None,
            generation: 0,
            sink_open: true,
            events_tx,
            events_rx,
            commands: commands_rx,
            status: status_tx,
        };
        let task = tokio::spawn(layer.run());

        (
            LiveLayerHandle {
                commands: commands_tx,
                status: status_rx,
            },
            task,
        )
    }

    async fn run(mut self) {
        let mut ticker = Ticker::start(Duration::from_millis(self.config.tick_ms));
        loop {
            tokio::select! {
                cmd = self.commands.recv() => match cmd {
                    Some(cmd) => self.on_command(cmd),
                    None => break,
                },
                Some((generation, event)) = self.events_rx.recv() => {
                    self.on_event(generation, event);
                }
                frame = ticker.tick() => self.on_tick(frame),
            }
        }

        if let Some(connection) = self.connection.take() {
            connection.destroy();
        }
        debug!("live layer stopped");
    }

    fn on_command(&mut self, cmd: LayerCommand) {
        match cmd {
            LayerCommand::SetViewState(view) => self.view = Some(view),
            LayerCommand::HitTestMap { query, reply } => {
                let hit = hit_test_map(self.store.committed(), &self.atlas, &query);
                let _ = reply.send(hit.map(|h| h.feature.clone()));
            }
            LayerCommand::HitTestScreen {
                projector,
                query,
                reply,
            } => {
                let hit = hit_test_screen(self.store.committed(), &self.atlas, &*projector, &query);
                let _ = reply.send(hit.map(|h| h.feature.clone()));
            }
            LayerCommand::Connect(config) => self.connect(config),
            LayerCommand::Disconnect => self.disconnect(),
            LayerCommand::IsConnected(reply) => {
                let connected = self
                    .connection
                    .as_ref()
                    .is_some_and(|c| c.connection_status() == ConnectionStatus::Connected);
                let _ = reply.send(connected);
            }
            LayerCommand::Metrics(reply) => {
                let _ = reply.send(self.metrics.snapshot());
            }
        }
    }

    fn connect(&mut self, config: ConnectionConfig) {
        self.disconnect();
        self.generation += 1;
        info!("live layer connecting to {}", config.source);
        let observer = TaggedObserver {
            generation: self.generation,
            events: self.events_tx.clone(),
        };
        self.connection = Some(ConnectionManager::open(
            config,
            self.connector.clone(),
            observer,
        ));
    }

    fn disconnect(&mut self) {
        if let Some(connection) = self.connection.take() {
            connection.destroy();
            self.status.send_replace(ConnectionStatus::Disconnected);
        }
    }

    fn on_event(&mut self, generation: u64, event: StreamEvent) {
        if generation != self.generation || self.connection.is_none() {
            return;
        }
        match event {
            StreamEvent::Feature(feature) => {
                self.metrics.inc(FEATURES_RECEIVED, 1);
                self.store.on_feature(feature);
            }
            StreamEvent::Status(status) => {
                info!("live layer connection {status}");
                self.status.send_replace(status);
            }
        }
    }

    fn on_tick(&mut self, frame: Frame) {
        // Pending updates wait until there is something to clip against.
        let Some(view) = self.view else {
            return;
        };
        let Some(summary) = self.store.tick(frame) else {
            return;
        };

        if summary.applied > 0 {
            self.metrics.inc(COMMITS, 1);
        }
        self.metrics.inc(FEATURES_EVICTED, summary.evicted as u64);
        self.metrics
            .set_gauge(COMMITTED_FEATURES, summary.total as u64);

        if !self.sink_open {
            return;
        }

        let packed = pack(self.store.committed(), &view, &self.atlas, &self.config.pack);
        self.metrics.inc(PACKS, 1);
        self.metrics
            .record(PACKED_FEATURES, packed.feature_count() as u64);
        if packed.capacity() < summary.total * SLOTS_PER_MARKER {
            self.metrics.inc(PACK_SHRINKS, 1);
        }
        debug!(
            "frame {}: committed {} ({} total, {} evicted), packed {} features",
            summary.frame,
            summary.applied,
            summary.total,
            summary.evicted,
            packed.feature_count()
        );

        if let Err(e) = self.sink.set_data(packed.into()) {
            warn!("live layer: {e}; no further packs will be produced");
            self.sink_open = false;
        }
    }
}
