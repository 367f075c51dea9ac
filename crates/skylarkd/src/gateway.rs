//! The gateway — one node of the overlay's data plane.
//!
//! Owns the chunk store, the chunk servers, the intake queue feeding the
//! worker pool, and the relay sender. The control API drives it through
//! [`GatewayControl`].

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc};

use skylark_core::config::SkylarkConfig;
use skylark_core::ChunkRequest;
use skylark_services::{
    BucketRef, ChunkRequestQueues, ChunkSnapshot, ChunkStore, ControlError, GatewayControl,
    InboundBuffer, ObjectStore,
};

use crate::chunk::{worker, ReceiveContext, RelayPool, RelaySettings, WorkerContext};
use crate::server::ChunkServer;

#[derive(Clone)]
pub struct Gateway {
    inner: Arc<Inner>,
}

struct Inner {
    config: SkylarkConfig,
    store: ChunkStore,
    inbound: InboundBuffer,
    servers: Mutex<BTreeMap<u16, ChunkServer>>,
    /// Serializes start/stop against each other; never held during transfers.
    lifecycle: tokio::sync::Mutex<()>,
    queue: mpsc::UnboundedSender<u64>,
    shutdown: broadcast::Sender<()>,
}

impl Gateway {
    /// Build a gateway and start its background tasks and initial servers.
    /// Must be called inside a tokio runtime.
    pub async fn start(
        config: SkylarkConfig,
        objects: Arc<dyn ObjectStore>,
    ) -> Result<Self, ControlError> {
        let store = ChunkStore::new();
        let inbound = InboundBuffer::with_limit(config.transfer.max_inbound_bytes);
        let (queue, queue_rx) = mpsc::unbounded_channel();
        let (shutdown, _) = broadcast::channel(1);

        let worker_ctx = WorkerContext {
            store: store.clone(),
            objects,
            inbound: inbound.clone(),
            relay: RelayPool::new(RelaySettings::from_config(&config)),
            hop_timeout: config.transfer.hop_timeout(),
            local_sink: BucketRef::new(&config.gateway.region, &config.storage.local_bucket),
        };
        tokio::spawn(worker::run_dispatcher(
            worker_ctx,
            queue_rx,
            config.gateway.worker_count(),
            shutdown.subscribe(),
        ));
        tokio::spawn(sweep_loop(
            inbound.clone(),
            config.transfer.inbound_ttl(),
            shutdown.subscribe(),
        ));

        let gateway = Self {
            inner: Arc::new(Inner {
                config,
                store,
                inbound,
                servers: Mutex::new(BTreeMap::new()),
                lifecycle: tokio::sync::Mutex::new(()),
                queue,
                shutdown,
            }),
        };

        for _ in 0..gateway.inner.config.gateway.initial_servers {
            gateway.start_server().await?;
        }
        tracing::info!(
            region = %gateway.inner.config.gateway.region,
            ports = ?gateway.server_ports(),
            "gateway started"
        );
        Ok(gateway)
    }

    pub fn store(&self) -> &ChunkStore {
        &self.inner.store
    }

    pub fn config(&self) -> &SkylarkConfig {
        &self.inner.config
    }

    /// Stop every chunk server and background task.
    pub async fn shutdown(&self) {
        let _guard = self.inner.lifecycle.lock().await;
        let servers: Vec<ChunkServer> = std::mem::take(&mut *self.servers())
            .into_values()
            .collect();
        for server in servers {
            server.stop().await;
        }
        let _ = self.inner.shutdown.send(());
        tracing::info!("gateway stopped");
    }

    fn servers(&self) -> MutexGuard<'_, BTreeMap<u16, ChunkServer>> {
        self.inner
            .servers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn receive_context(&self) -> ReceiveContext {
        let transfer = &self.inner.config.transfer;
        ReceiveContext {
            store: self.inner.store.clone(),
            inbound: self.inner.inbound.clone(),
            idle_timeout: transfer.idle_timeout(),
            max_chunk_bytes: transfer.max_chunk_bytes,
        }
    }
}

#[async_trait]
impl GatewayControl for Gateway {
    fn server_ports(&self) -> Vec<u16> {
        self.servers().keys().copied().collect()
    }

    async fn start_server(&self) -> Result<u16, ControlError> {
        let _guard = self.inner.lifecycle.lock().await;
        let config = &self.inner.config;
        let server = ChunkServer::start(
            &config.gateway.bind_host,
            config.transfer.socket_buffer_bytes,
            self.receive_context(),
        )
        .map_err(ControlError::Bind)?;
        let port = server.port();
        self.servers().insert(port, server);
        Ok(port)
    }

    async fn stop_server(&self, port: u16) -> Result<(), ControlError> {
        let _guard = self.inner.lifecycle.lock().await;
        let server = self
            .servers()
            .remove(&port)
            .ok_or(ControlError::PortNotFound(port))?;
        server.stop().await;
        Ok(())
    }

    fn add_chunk_requests(&self, requests: Vec<ChunkRequest>) -> Result<(), ControlError> {
        for request in &requests {
            request.validate()?;
        }
        if self.inner.queue.is_closed() {
            return Err(ControlError::ShuttingDown);
        }
        let ids: Vec<u64> = requests.iter().map(ChunkRequest::chunk_id).collect();
        self.inner.store.put_batch(requests)?;
        for (sent, &chunk_id) in ids.iter().enumerate() {
            if self.inner.queue.send(chunk_id).is_err() {
                // Dispatcher is gone. Nothing will ever run the rest of the batch.
                let dropped = self.inner.store.withdraw(&ids[sent..]);
                tracing::warn!(dropped, "intake closed mid-batch, unqueued requests withdrawn");
                return Err(ControlError::ShuttingDown);
            }
            tracing::debug!(chunk_id, "chunk request registered");
        }
        Ok(())
    }

    fn chunks(&self) -> Vec<ChunkSnapshot> {
        self.inner.store.snapshots()
    }

    fn chunk(&self, chunk_id: u64) -> Option<ChunkSnapshot> {
        self.inner.store.snapshot(chunk_id)
    }

    fn chunk_requests(&self) -> ChunkRequestQueues {
        ChunkRequestQueues::from_store(&self.inner.store)
    }

    fn chunk_request(&self, chunk_id: u64) -> Option<ChunkRequest> {
        self.inner.store.get_request(chunk_id)
    }

    fn remove_chunk(&self, chunk_id: u64) -> Result<(), ControlError> {
        self.inner.store.remove(chunk_id)?;
        self.inner.inbound.cancel(chunk_id);
        tracing::debug!(chunk_id, "chunk removed");
        Ok(())
    }
}

async fn sweep_loop(
    inbound: InboundBuffer,
    ttl: std::time::Duration,
    mut shutdown: broadcast::Receiver<()>,
) {
    let period = (ttl / 4).max(std::time::Duration::from_secs(1));
    let mut interval = tokio::time::interval(period);
    loop {
        tokio::select! {
            _ = shutdown.recv() => return,
            _ = interval.tick() => {
                let dropped = inbound.evict_stale(ttl);
                if dropped > 0 {
                    tracing::info!(dropped, "evicted unclaimed inbound payloads");
                }
            }
        }
    }
}
