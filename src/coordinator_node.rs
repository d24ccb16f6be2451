use std::io::{Seek, SeekFrom, Write};
use std::sync::Arc;

use async_trait::async_trait;
use queues::{IsQueue, Queue};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::aggregator::{Report, ResultTable};
use crate::chunker::{chunk_file, chunk_reader, Chunk, ChunkKind};
use crate::config::CoordinatorConfig;
use crate::error::{MrError, Result};
use crate::protocol::{
    decode_reply, encode_request, read_frame, write_frame, MessageType, MAX_PAYLOAD,
};

/// One synchronous request/reply exchange with a worker endpoint.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn exchange(&self, port: u16, request: Vec<u8>) -> Result<Vec<u8>>;
}

/// Opens a fresh TCP connection per exchange.
pub struct TcpTransport {
    host: String,
}

impl TcpTransport {
    pub fn new(host: impl Into<String>) -> Self {
        TcpTransport { host: host.into() }
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn exchange(&self, port: u16, request: Vec<u8>) -> Result<Vec<u8>> {
        let mut stream = TcpStream::connect((self.host.as_str(), port))
            .await
            .map_err(|source| MrError::Connect { port, source })?;
        write_frame(&mut stream, &request).await?;
        read_frame(&mut stream).await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    Idle,
    Busy,
}

#[derive(Debug, Clone)]
pub struct WorkerSlot {
    pub port: u16,
    pub state: SlotState,
}

type Reply = oneshot::Receiver<Result<Vec<u8>>>;

struct Job {
    request: Vec<u8>,
    reply: oneshot::Sender<Result<Vec<u8>>>,
}

/// One long-lived task per slot. A task only ever performs the exchange
/// it is handed and sends back the outcome; it never sees scheduler state.
struct WorkerPool {
    senders: Vec<mpsc::Sender<Job>>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    fn new<T: Transport>(ports: &[u16], transport: Arc<T>) -> WorkerPool {
        let mut senders = Vec::with_capacity(ports.len());
        let mut handles = Vec::with_capacity(ports.len());

        for &port in ports {
            let (tx, mut rx) = mpsc::channel::<Job>(1);
            let transport = Arc::clone(&transport);
            handles.push(tokio::spawn(async move {
                while let Some(job) = rx.recv().await {
                    let outcome = transport.exchange(port, job.request).await;
                    // The scheduler may have bailed out already.
                    let _ = job.reply.send(outcome);
                }
            }));
            senders.push(tx);
        }

        WorkerPool { senders, handles }
    }

    async fn dispatch(&self, slot: usize, port: u16, request: Vec<u8>) -> Result<Reply> {
        let (tx, rx) = oneshot::channel();
        self.senders[slot]
            .send(Job { request, reply: tx })
            .await
            .map_err(|_| MrError::ExchangeLost { port })?;
        Ok(rx)
    }

    async fn close(self) -> Result<()> {
        drop(self.senders);
        for handle in self.handles {
            handle
                .await
                .map_err(|e| MrError::Io(std::io::Error::other(e)))?;
        }
        Ok(())
    }
}

/// Drives phases over a fixed set of worker slots.
///
/// The pending, idle and in-flight queues are owned here and only mutated
/// by the caller's task. Replies are consumed in dispatch order: when no
/// idle slot can be paired with a pending task, the scheduler waits on the
/// oldest in-flight slot even if a younger one has already finished.
pub struct Scheduler {
    slots: Vec<WorkerSlot>,
    pool: WorkerPool,
    idle: Queue<usize>,
    in_flight: Queue<usize>,
    replies: Vec<Option<Reply>>,
    max_in_flight: usize,
}

impl Scheduler {
    pub fn new<T: Transport>(ports: &[u16], transport: Arc<T>) -> Result<Scheduler> {
        let mut idle = Queue::new();
        for slot in 0..ports.len() {
            idle.add(slot).map_err(MrError::queue)?;
        }

        Ok(Scheduler {
            slots: ports
                .iter()
                .map(|&port| WorkerSlot {
                    port,
                    state: SlotState::Idle,
                })
                .collect(),
            pool: WorkerPool::new(ports, transport),
            idle,
            in_flight: Queue::new(),
            replies: ports.iter().map(|_| None).collect(),
            max_in_flight: 0,
        })
    }

    pub fn slots(&self) -> &[WorkerSlot] {
        &self.slots
    }

    /// Highest number of exchanges that were in flight at once.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight
    }

    /// Run one phase to completion, feeding every reply payload to `sink`
    /// in dispatch order. Returns the number of tasks dispatched.
    pub async fn run_phase<F>(
        &mut self,
        kind: MessageType,
        tasks: Vec<Chunk>,
        mut sink: F,
    ) -> Result<usize>
    where
        F: FnMut(&[u8]) -> Result<()>,
    {
        let total = tasks.len();
        let mut pending: Queue<Chunk> = Queue::new();
        for task in tasks {
            pending.add(task).map_err(MrError::queue)?;
        }
        info!(phase = %kind, tasks = total, slots = self.slots.len(), "starting phase");

        while pending.size() > 0 || self.in_flight.size() > 0 {
            if self.idle.size() > 0 && pending.size() > 0 {
                let slot = self.idle.remove().map_err(MrError::queue)?;
                let chunk = pending.remove().map_err(MrError::queue)?;
                let request = encode_request(kind, &chunk)?;
                self.dispatch(slot, request).await?;
            } else {
                let (slot, reply) = self.join_oldest().await?;
                let port = self.slots[slot].port;
                match decode_reply(&reply) {
                    (MessageType::Empty, payload) => sink(payload)?,
                    (other, _) => {
                        return Err(MrError::UnexpectedReply {
                            port,
                            detail: format!("{other} reply during the {kind} phase"),
                        })
                    }
                }
                self.release(slot)?;
            }
        }

        info!(phase = %kind, tasks = total, "phase drained");
        Ok(total)
    }

    async fn dispatch(&mut self, slot: usize, request: Vec<u8>) -> Result<()> {
        let port = self.slots[slot].port;
        let reply = self.pool.dispatch(slot, port, request).await?;

        self.replies[slot] = Some(reply);
        self.slots[slot].state = SlotState::Busy;
        self.in_flight.add(slot).map_err(MrError::queue)?;
        self.max_in_flight = self.max_in_flight.max(self.in_flight.size());
        debug!(port, in_flight = self.in_flight.size(), "dispatched task");
        Ok(())
    }

    async fn join_oldest(&mut self) -> Result<(usize, Vec<u8>)> {
        let slot = self.in_flight.remove().map_err(MrError::queue)?;
        let port = self.slots[slot].port;
        let reply = self.replies[slot]
            .take()
            .ok_or(MrError::ExchangeLost { port })?;
        let frame = reply.await.map_err(|_| MrError::ExchangeLost { port })??;
        debug!(port, bytes = frame.len(), "joined task");
        Ok((slot, frame))
    }

    fn release(&mut self, slot: usize) -> Result<()> {
        self.slots[slot].state = SlotState::Idle;
        self.idle.add(slot).map_err(MrError::queue)?;
        Ok(())
    }

    /// Send a shutdown request to every slot, whatever its state, and wait
    /// for all of them.
    pub async fn shutdown(&mut self) -> Result<()> {
        let request = encode_request(MessageType::Shutdown, b"")?;
        let mut acks = Vec::with_capacity(self.slots.len());
        for slot in 0..self.slots.len() {
            let port = self.slots[slot].port;
            acks.push((slot, self.pool.dispatch(slot, port, request.clone()).await?));
        }

        for (slot, ack) in acks {
            let port = self.slots[slot].port;
            let frame = ack.await.map_err(|_| MrError::ExchangeLost { port })??;
            if decode_reply(&frame).0 != MessageType::Shutdown {
                warn!(port, "worker did not acknowledge shutdown");
            }
            self.slots[slot].state = SlotState::Idle;
        }
        info!(workers = self.slots.len(), "all workers shut down");
        Ok(())
    }

    /// Stop the pool tasks.
    pub async fn close(self) -> Result<()> {
        self.pool.close().await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub map_tasks: usize,
    pub reduce_tasks: usize,
    pub max_in_flight: usize,
}

pub struct Coordinator<T: Transport = TcpTransport> {
    config: CoordinatorConfig,
    transport: Arc<T>,
}

impl Coordinator<TcpTransport> {
    pub fn new(config: CoordinatorConfig) -> Self {
        let transport = Arc::new(TcpTransport::new(config.host.clone()));
        Coordinator { config, transport }
    }
}

impl<T: Transport> Coordinator<T> {
    pub fn with_transport(config: CoordinatorConfig, transport: Arc<T>) -> Self {
        Coordinator { config, transport }
    }

    /// Map the input file, reduce the intermediate pairs, shut every worker
    /// down and return the ordered report.
    pub async fn start(&self) -> Result<(Report, RunSummary)> {
        let map_tasks = chunk_file(&self.config.input, MAX_PAYLOAD)?;
        let mut scheduler = Scheduler::new(&self.config.ports, Arc::clone(&self.transport))?;

        // Removed by the OS once dropped.
        let mut intermediate = tempfile::tempfile()?;
        let map_count = scheduler
            .run_phase(MessageType::Map, map_tasks, |payload| {
                intermediate.write_all(payload)?;
                Ok(())
            })
            .await?;

        let len = intermediate.stream_position()?;
        intermediate.seek(SeekFrom::Start(0))?;
        let reduce_tasks =
            chunk_reader(&mut intermediate, len, MAX_PAYLOAD, ChunkKind::Pairs)?;
        drop(intermediate);
        debug!(bytes = len, tasks = reduce_tasks.len(), "re-chunked map output");

        let mut table = ResultTable::new();
        let reduce_count = scheduler
            .run_phase(MessageType::Reduce, reduce_tasks, |payload| {
                table.fold_reply(payload)
            })
            .await?;

        scheduler.shutdown().await?;
        let summary = RunSummary {
            map_tasks: map_count,
            reduce_tasks: reduce_count,
            max_in_flight: scheduler.max_in_flight(),
        };
        scheduler.close().await?;

        info!(
            map_tasks = summary.map_tasks,
            reduce_tasks = summary.reduce_tasks,
            max_in_flight = summary.max_in_flight,
            words = table.len(),
            "run complete"
        );
        Ok((table.into_report()?, summary))
    }
}

/// Create a coordinator over TCP and run it to completion
pub async fn make_coordinator(config: CoordinatorConfig) -> Result<(Report, RunSummary)> {
    let coordinator = Coordinator::new(config);
    coordinator.start().await
}
