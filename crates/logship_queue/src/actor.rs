//! Queue actor and its async handle.
//!
//! All segment I/O happens on a single dedicated task that owns the
//! [`SegmentStore`]. Callers talk to it through a cloneable
//! [`QueueHandle`] over a bounded inbox; bounded capacity is the
//! backpressure seam between producers and the disk.

use crate::config::QueueConfig;
use crate::error::{QueueError, QueueResult};
use crate::segment::SegmentStore;
use std::collections::VecDeque;
use std::path::Path;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

/// Requests accepted by the queue actor.
enum Request {
    Put {
        data: Vec<u8>,
        reply: oneshot::Sender<QueueResult<()>>,
    },
    Peek {
        reply: oneshot::Sender<QueueResult<Vec<u8>>>,
    },
    Read {
        reply: oneshot::Sender<QueueResult<Vec<u8>>>,
    },
    Depth {
        reply: oneshot::Sender<i64>,
    },
    Empty {
        reply: oneshot::Sender<QueueResult<()>>,
    },
    Close {
        reply: oneshot::Sender<()>,
    },
}

/// Lifecycle of the actor task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Open,
    Draining,
}

/// A durable on-disk FIFO queue.
///
/// Opening a queue spawns its actor task; the returned [`QueueHandle`]
/// is the only way to interact with it. Records put into the queue
/// survive process restarts.
#[derive(Debug)]
pub struct DurableQueue;

impl DurableQueue {
    /// Opens the queue named `name` under `dir`, restoring any state a
    /// previous process left behind, and spawns its actor task.
    ///
    /// # Errors
    ///
    /// Fails when the data directory cannot be created or read. An
    /// unreadable metadata file is logged and tolerated.
    pub fn open(
        name: impl Into<String>,
        dir: impl AsRef<Path>,
        config: QueueConfig,
    ) -> QueueResult<QueueHandle> {
        let store = SegmentStore::open(name, dir, config.clone())?;
        info!(queue = %store.name(), depth = store.depth(), "opened durable queue");

        let (tx, rx) = mpsc::channel(config.inbox_capacity);
        let actor = Actor {
            store,
            config,
            inbox: rx,
            state: State::Open,
            tentative: None,
            peek_waiters: VecDeque::new(),
            read_waiters: VecDeque::new(),
            close_waiters: Vec::new(),
            write_count: 0,
        };
        tokio::spawn(actor.run());

        Ok(QueueHandle { tx })
    }
}

/// Cloneable async handle to a [`DurableQueue`] actor.
#[derive(Debug, Clone)]
pub struct QueueHandle {
    tx: mpsc::Sender<Request>,
}

impl QueueHandle {
    /// Appends one record to the queue, durably ordered after every
    /// prior put.
    ///
    /// # Errors
    ///
    /// `InvalidSize` for out-of-bounds payloads, `Closed` once the
    /// queue is shut down, and transient I/O errors from the append.
    pub async fn put(&self, data: Vec<u8>) -> QueueResult<()> {
        let (reply, rx) = oneshot::channel();
        self.send(Request::Put { data, reply }).await?;
        rx.await.map_err(|_| QueueError::Closed)?
    }

    /// Returns the next record without consuming it. Waits until a
    /// record is available.
    ///
    /// Repeated peeks observe the same record until a [`Self::read`]
    /// consumes it.
    pub async fn peek(&self) -> QueueResult<Vec<u8>> {
        let (reply, rx) = oneshot::channel();
        self.send(Request::Peek { reply }).await?;
        rx.await.map_err(|_| QueueError::Closed)?
    }

    /// Consumes and returns the next record. Waits until a record is
    /// available.
    pub async fn read(&self) -> QueueResult<Vec<u8>> {
        let (reply, rx) = oneshot::channel();
        self.send(Request::Read { reply }).await?;
        rx.await.map_err(|_| QueueError::Closed)?
    }

    /// Current number of pending records.
    pub async fn depth(&self) -> QueueResult<i64> {
        let (reply, rx) = oneshot::channel();
        self.send(Request::Depth { reply }).await?;
        rx.await.map_err(|_| QueueError::Closed)
    }

    /// Destructively discards all pending records and on-disk state.
    pub async fn empty(&self) -> QueueResult<()> {
        let (reply, rx) = oneshot::channel();
        self.send(Request::Empty { reply }).await?;
        rx.await.map_err(|_| QueueError::Closed)?
    }

    /// Shuts the queue down cleanly: a final sync runs, files close,
    /// and any blocked `peek`/`read` callers observe [`QueueError::Closed`].
    ///
    /// Completes once the actor has finished its shutdown work. Safe
    /// to call more than once.
    pub async fn close(&self) {
        let (reply, rx) = oneshot::channel();
        if self.send(Request::Close { reply }).await.is_err() {
            return; // already closed
        }
        let _ = rx.await;
    }

    async fn send(&self, request: Request) -> QueueResult<()> {
        self.tx.send(request).await.map_err(|_| QueueError::Closed)
    }
}

/// The actor task: owns the store, serializes every operation.
struct Actor {
    store: SegmentStore,
    config: QueueConfig,
    inbox: mpsc::Receiver<Request>,
    state: State,
    /// Record fetched from disk but not yet committed-read.
    tentative: Option<Vec<u8>>,
    peek_waiters: VecDeque<oneshot::Sender<QueueResult<Vec<u8>>>>,
    read_waiters: VecDeque<oneshot::Sender<QueueResult<Vec<u8>>>>,
    close_waiters: Vec<oneshot::Sender<()>>,
    write_count: u64,
}

impl Actor {
    async fn run(mut self) {
        // First tick a full interval out, like a plain ticker.
        let first_tick = tokio::time::Instant::now() + self.config.sync_interval;
        let mut sync_tick = tokio::time::interval_at(first_tick, self.config.sync_interval);
        sync_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        while self.state == State::Open {
            if self.config.sync_every > 0 && self.write_count >= self.config.sync_every {
                self.store.mark_dirty();
            }
            if self.store.is_dirty() {
                match self.store.sync() {
                    Ok(()) => self.write_count = 0,
                    Err(err) => {
                        warn!(queue = %self.store.name(), error = %err, "failed to sync");
                    }
                }
            }

            // Fetch the next record from disk if a consumer could use it.
            if self.tentative.is_none()
                && self.store.has_unread()
                && !(self.peek_waiters.is_empty() && self.read_waiters.is_empty())
            {
                match self.fetch_next() {
                    Fetch::Got(data) => self.tentative = Some(data),
                    Fetch::Retry => continue,
                    Fetch::Stuck => {}
                }
            }

            if self.tentative.is_some() && !self.peek_waiters.is_empty() {
                self.serve_peek();
                continue;
            }
            if self.tentative.is_some() && !self.read_waiters.is_empty() {
                self.serve_read();
                continue;
            }

            tokio::select! {
                request = self.inbox.recv() => {
                    match request {
                        Some(request) => self.handle(request),
                        // Every handle dropped; shut down.
                        None => self.state = State::Draining,
                    }
                }
                _ = sync_tick.tick() => {
                    if self.write_count > 0 {
                        self.store.mark_dirty();
                    }
                }
            }
        }

        self.shutdown();
    }

    fn handle(&mut self, request: Request) {
        match request {
            Request::Put { data, reply } => {
                let result = self.store.append(&data).map(|_| ());
                if result.is_ok() {
                    self.write_count += 1;
                }
                let _ = reply.send(result);
            }
            Request::Peek { reply } => self.peek_waiters.push_back(reply),
            Request::Read { reply } => self.read_waiters.push_back(reply),
            Request::Depth { reply } => {
                let _ = reply.send(self.store.depth());
            }
            Request::Empty { reply } => {
                let result = self.store.empty();
                self.tentative = None;
                self.write_count = 0;
                let _ = reply.send(result);
            }
            Request::Close { reply } => {
                self.close_waiters.push(reply);
                self.state = State::Draining;
            }
        }
    }

    /// Pulls the next record off disk, recovering from corruption.
    fn fetch_next(&mut self) -> Fetch {
        if let Err(err) = self.store.truncation_check() {
            warn!(queue = %self.store.name(), error = %err, "truncation check failed");
        }
        match self.store.read_next() {
            Ok(data) => Fetch::Got(data),
            Err(QueueError::EndOfSegment) => Fetch::Retry,
            Err(err @ QueueError::Corrupt { .. }) => {
                warn!(queue = %self.store.name(), error = %err, "read failed, recovering");
                self.store.handle_corruption();
                Fetch::Retry
            }
            Err(err) => {
                // Transient I/O error; leave the cursor alone and let a
                // later iteration retry.
                warn!(queue = %self.store.name(), error = %err, "read failed");
                Fetch::Stuck
            }
        }
    }

    /// Sends a copy of the tentative record to the oldest peeker
    /// without consuming it.
    fn serve_peek(&mut self) {
        let Some(waiter) = self.peek_waiters.pop_front() else {
            return;
        };
        let Some(data) = self.tentative.as_ref() else {
            return;
        };
        if waiter.send(Ok(data.clone())).is_err() {
            debug!(queue = %self.store.name(), "peek waiter went away");
        }
    }

    /// Commits the tentative record to the oldest live reader.
    fn serve_read(&mut self) {
        // Skip waiters whose callers gave up; committing a read for
        // them would silently drop a record.
        let waiter = loop {
            match self.read_waiters.pop_front() {
                Some(waiter) if waiter.is_closed() => continue,
                Some(waiter) => break waiter,
                None => return,
            }
        };
        let Some(data) = self.tentative.take() else {
            self.read_waiters.push_front(waiter);
            return;
        };
        self.store.advance();
        self.write_count += 1;
        if waiter.send(Ok(data)).is_err() {
            // Raced with the caller dropping the future after the
            // closed check; the record is already consumed.
            warn!(queue = %self.store.name(), "reader went away after read commit");
        }
    }

    fn shutdown(mut self) {
        self.inbox.close();

        // Drain requests that were already in flight when close landed;
        // they are rejected rather than processed.
        while let Ok(request) = self.inbox.try_recv() {
            match request {
                Request::Put { reply, .. } => {
                    let _ = reply.send(Err(QueueError::Closed));
                }
                Request::Peek { reply } | Request::Read { reply } => {
                    let _ = reply.send(Err(QueueError::Closed));
                }
                Request::Depth { reply } => {
                    let _ = reply.send(self.store.depth());
                }
                Request::Empty { reply } => {
                    let _ = reply.send(Err(QueueError::Closed));
                }
                Request::Close { reply } => {
                    let _ = reply.send(());
                }
            }
        }

        for waiter in self.peek_waiters.drain(..).chain(self.read_waiters.drain(..)) {
            let _ = waiter.send(Err(QueueError::Closed));
        }

        if let Err(err) = self.store.sync() {
            warn!(queue = %self.store.name(), error = %err, "failed to sync on close");
        }
        self.store.close_files();
        info!(queue = %self.store.name(), depth = self.store.depth(), "closed durable queue");

        for waiter in self.close_waiters {
            let _ = waiter.send(());
        }
    }
}

enum Fetch {
    Got(Vec<u8>),
    Retry,
    Stuck,
}
