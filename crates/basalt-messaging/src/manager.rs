//! The distribution manager: sends messages and dispatches the ones that
//! arrive.
//!
//! Inbound frames are decoded on a single receive loop. Messages that ask
//! for inline processing (replies) are handled right there; everything else
//! goes onto a priority queue drained by a pool of worker tasks, so the
//! receive loop never waits on a handler.

use crate::config::DistributionConfig;
use crate::error::{DistributionError, ExceptionKind, ReplyException, Result};
use crate::keeper::ProcessorKeeper;
use crate::membership::{MembershipListener, MembershipView};
use crate::message::{Decoder, DistributionMessage, InboundMessage, MessageRegistry, Recipients};
use crate::network::{InboundFrame, NetworkTransport};
use crate::queue::PriorityTaskQueue;
use crate::reply::ReplyMessage;
use basalt_event::{EventId, EventIdentityCache, ProducerContext, SystemConnection};
use basalt_wire::MemberId;
use bytes::Bytes;
use futures::future::join_all;
use parking_lot::{Mutex, RwLock};
use std::any::Any;
use std::sync::{Arc, Weak};
use std::time::Instant;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, trace, warn};

/// Forwards membership departures to the processor table.
struct DepartureForwarder {
    keeper: Weak<ProcessorKeeper>,
}

impl MembershipListener for DepartureForwarder {
    fn member_departed(&self, member: &MemberId, _crashed: bool) {
        if let Some(keeper) = self.keeper.upgrade() {
            keeper.member_departed(member);
        }
    }
}

struct Inner {
    local: MemberId,
    transport: Arc<dyn NetworkTransport>,
    membership: Arc<dyn MembershipView>,
    config: DistributionConfig,
    registry: RwLock<MessageRegistry>,
    keeper: Arc<ProcessorKeeper>,
    queue: PriorityTaskQueue<InboundMessage>,
    connection: RwLock<Option<SystemConnection>>,
    identity: EventIdentityCache,
    cache: RwLock<Option<Arc<dyn Any + Send + Sync>>>,
    loopback_tx: mpsc::UnboundedSender<InboundFrame>,
    loopback_rx: Mutex<Option<mpsc::UnboundedReceiver<InboundFrame>>>,
    shutdown: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    _departures: Arc<DepartureForwarder>,
}

/// Handle to a member's messaging layer. Cheap to clone.
#[derive(Clone)]
pub struct DistributionManager {
    inner: Arc<Inner>,
}

impl DistributionManager {
    /// Create a manager for the member behind `transport` and connect its
    /// event identity. Call [`start`](Self::start) to begin receiving.
    pub fn new(
        transport: Arc<dyn NetworkTransport>,
        membership: Arc<dyn MembershipView>,
        config: DistributionConfig,
    ) -> Result<Self> {
        let local = transport.local_member().clone();
        let keeper = Arc::new(ProcessorKeeper::new());

        let departures = Arc::new(DepartureForwarder {
            keeper: Arc::downgrade(&keeper),
        });
        membership.add_listener(Arc::downgrade(&departures) as Weak<dyn MembershipListener>);

        let connection = SystemConnection::new(local.clone());
        let identity = EventIdentityCache::new();
        identity.initialize_on_connect(&connection)?;

        let (loopback_tx, loopback_rx) = mpsc::unbounded_channel();
        let (shutdown, _) = watch::channel(false);

        Ok(Self {
            inner: Arc::new(Inner {
                local,
                transport,
                membership,
                config,
                registry: RwLock::new(MessageRegistry::new()),
                keeper,
                queue: PriorityTaskQueue::new(),
                connection: RwLock::new(Some(connection)),
                identity,
                cache: RwLock::new(None),
                loopback_tx,
                loopback_rx: Mutex::new(Some(loopback_rx)),
                shutdown,
                tasks: Mutex::new(Vec::new()),
                _departures: departures,
            }),
        })
    }

    /// Spawn the receive loop and the worker pool.
    pub fn start(&self) -> Result<()> {
        if self.is_shutdown() {
            return Err(DistributionError::Shutdown);
        }
        let mut inbound = self
            .inner
            .transport
            .subscribe()
            .map_err(|e| DistributionError::Transport(e.to_string()))?;
        let mut loopback = self
            .inner
            .loopback_rx
            .lock()
            .take()
            .ok_or_else(|| DistributionError::Transport("manager already started".into()))?;

        let mut tasks = Vec::with_capacity(self.inner.config.worker_count + 1);

        let dm = self.clone();
        let mut shutdown = self.inner.shutdown.subscribe();
        tasks.push(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.changed() => break,
                    Some((sender, frame)) = inbound.recv() => dm.dispatch(sender, frame).await,
                    Some((sender, frame)) = loopback.recv() => dm.dispatch(sender, frame).await,
                    else => break,
                }
            }
            debug!(member = %dm.inner.local, "receive loop stopped");
        }));

        for worker in 0..self.inner.config.worker_count {
            let dm = self.clone();
            tasks.push(tokio::spawn(async move {
                while let Some(inbound) = dm.inner.queue.pop().await {
                    dm.handle(inbound).await;
                }
                trace!(worker, "dispatch worker stopped");
            }));
        }

        self.inner.tasks.lock().extend(tasks);
        debug!(member = %self.inner.local, workers = self.inner.config.worker_count, "distribution manager started");
        Ok(())
    }

    /// Serialize `message` once and hand it to every recipient.
    ///
    /// Returns the recipients that could not be reached. [`Recipients::All`]
    /// means every current member except this one.
    pub async fn send(
        &self,
        message: &dyn DistributionMessage,
        recipients: &Recipients,
    ) -> Result<Vec<MemberId>> {
        if self.is_shutdown() {
            return Err(DistributionError::Shutdown);
        }

        let targets: Vec<MemberId> = match recipients {
            Recipients::All if message.is_reply() => {
                return Err(DistributionError::InvalidRecipients(
                    "a reply cannot be broadcast".into(),
                ))
            }
            Recipients::All => self
                .inner
                .membership
                .members()
                .into_iter()
                .filter(|m| m != &self.inner.local)
                .collect(),
            Recipients::Members(members) if members.is_empty() => {
                return Err(DistributionError::InvalidRecipients(
                    "recipient list is empty".into(),
                ))
            }
            Recipients::Members(members) => members.clone(),
        };
        if targets.is_empty() {
            return Err(DistributionError::InvalidRecipients(
                "no other member to send to".into(),
            ));
        }

        let frame = self
            .inner
            .registry
            .read()
            .encode(message, self.inner.config.wire_version)?;
        if frame.len() > self.inner.config.max_frame_bytes {
            return Err(DistributionError::FrameTooLarge {
                size: frame.len(),
                limit: self.inner.config.max_frame_bytes,
            });
        }

        let deliveries = targets.iter().map(|member| {
            let frame = frame.clone();
            async move { (member, self.deliver(member, frame).await) }
        });

        let unreachable = join_all(deliveries)
            .await
            .into_iter()
            .filter_map(|(member, result)| match result {
                Ok(()) => None,
                Err(e) => {
                    debug!(recipient = %member, kind = message.kind(), error = %e, "recipient unreachable");
                    Some(member.clone())
                }
            })
            .collect();
        Ok(unreachable)
    }

    async fn deliver(&self, member: &MemberId, frame: Bytes) -> Result<()> {
        if member == &self.inner.local {
            return self
                .inner
                .loopback_tx
                .send((self.inner.local.clone(), frame))
                .map_err(|e| DistributionError::Transport(e.to_string()));
        }
        self.inner
            .transport
            .send(member, frame)
            .await
            .map_err(|e| DistributionError::Transport(e.to_string()))
    }

    /// Decode one inbound frame and route it.
    async fn dispatch(&self, sender: MemberId, frame: Bytes) {
        if frame.len() > self.inner.config.max_frame_bytes {
            warn!(sender = %sender, size = frame.len(), "dropping oversized frame");
            return;
        }
        let decoded = self.inner.registry.read().decode(frame);
        let message = match decoded {
            Ok(message) => message,
            Err(e) => {
                warn!(sender = %sender, error = %e, "failed to decode inbound frame");
                return;
            }
        };

        let inbound = InboundMessage {
            sender,
            received_at: Instant::now(),
            message,
        };
        if inbound.message.inline_process() {
            self.handle(inbound).await;
            return;
        }
        let priority = inbound.message.priority();
        if !self.inner.queue.push(inbound, priority) {
            debug!("dropping inbound message after shutdown");
        }
    }

    async fn handle(&self, inbound: InboundMessage) {
        let InboundMessage {
            sender,
            received_at,
            message,
        } = inbound;
        trace!(sender = %sender, kind = message.kind(), queued = ?received_at.elapsed(), "processing message");

        let Err(e) = message.process(self, &sender).await else {
            return;
        };

        let processor_id = message.processor_id();
        if processor_id != 0 {
            if message.is_reply() {
                if let Some(core) = self.inner.keeper.get(processor_id) {
                    core.cancel(&sender, e.to_string());
                }
            } else {
                let exception = ReplyException::new(ExceptionKind::Internal, e.to_string());
                if let Err(send_err) =
                    ReplyMessage::send_exception(self, &sender, processor_id, exception).await
                {
                    warn!(sender = %sender, processor_id, error = %send_err, "failed to report handler failure");
                }
            }
        }
        error!(sender = %sender, kind = message.kind(), processor_id, error = %e, "message handler failed");
    }

    /// Register a decoder for an application message kind.
    pub fn register_message(&self, kind: u16, decoder: Decoder) {
        self.inner.registry.write().register(kind, decoder);
    }

    pub fn processor_keeper(&self) -> &Arc<ProcessorKeeper> {
        &self.inner.keeper
    }

    pub fn membership(&self) -> &Arc<dyn MembershipView> {
        &self.inner.membership
    }

    pub fn config(&self) -> &DistributionConfig {
        &self.inner.config
    }

    pub fn local_member(&self) -> &MemberId {
        &self.inner.local
    }

    /// Attach member-local state for handlers to reach via [`cache`](Self::cache).
    pub fn set_cache<T: Any + Send + Sync>(&self, cache: Arc<T>) {
        *self.inner.cache.write() = Some(cache);
    }

    pub fn cache<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        let cache = self.inner.cache.read().clone()?;
        cache.downcast::<T>().ok()
    }

    /// Mint an event id for `producer` under this member's identity.
    pub fn new_event_id(&self, producer: &ProducerContext) -> Result<EventId> {
        let connection = self.inner.connection.read();
        Ok(EventId::generate(
            &self.inner.identity,
            connection.as_ref(),
            producer,
        )?)
    }

    pub fn is_connected(&self) -> bool {
        self.inner.connection.read().is_some()
    }

    /// Drop the system connection. Minting event ids fails until
    /// [`reconnect`](Self::reconnect).
    pub fn disconnect(&self) {
        *self.inner.connection.write() = None;
        self.inner.identity.clear_on_disconnect();
    }

    pub fn reconnect(&self) -> Result<()> {
        let connection = SystemConnection::new(self.inner.local.clone());
        self.inner.identity.initialize_on_connect(&connection)?;
        *self.inner.connection.write() = Some(connection);
        Ok(())
    }

    pub fn is_shutdown(&self) -> bool {
        *self.inner.shutdown.borrow()
    }

    /// Stop receiving, let workers drain the queue, and wait for every task.
    pub async fn shutdown(&self) {
        if self.inner.shutdown.send_replace(true) {
            return;
        }
        self.inner.queue.close();
        self.disconnect();

        let tasks: Vec<JoinHandle<()>> = std::mem::take(&mut *self.inner.tasks.lock());
        for task in tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "dispatch task ended abnormally");
            }
        }
        debug!(member = %self.inner.local, "distribution manager shut down");
    }
}

impl std::fmt::Debug for DistributionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DistributionManager")
            .field("local", &self.inner.local)
            .field("processors", &self.inner.keeper.len())
            .field("queued", &self.inner.queue.len())
            .finish()
    }
}
