//! Reactor loop
//!
//! One task owns the agent. Each iteration it:
//! 1. Drains embedding commands
//! 2. Applies due fires
//! 3. Retries the time probe if needed
//! 4. Publishes a status snapshot
//! 5. Waits for a datagram, bounded by the next due fire
//!
//! Stop is cooperative: the flag is checked once per iteration.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use cuesync_core::{CueSyncError, CueSyncResult};
use cuesync_time::LocalClock;
use cuesync_transport::DatagramTransport;
use cuesync_wire::MAX_DATAGRAM_SIZE;

use crate::{Agent, CueApplier, EffectStatus, NodeStatus, Outbound};

const COMMAND_QUEUE_DEPTH: usize = 32;

/// Requests from the embedding, applied by the loop between datagrams
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AgentCommand {
    SetEffectStatus(EffectStatus),
    SetRssi(i32),
}

/// Shared cooperative stop flag
#[derive(Clone, Debug, Default)]
pub struct StopFlag(Arc<AtomicBool>);

impl StopFlag {
    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Embedding-side handle to a running reactor
#[derive(Clone)]
pub struct AgentHandle {
    stop: StopFlag,
    commands: mpsc::Sender<AgentCommand>,
    status: Arc<RwLock<NodeStatus>>,
}

impl AgentHandle {
    /// Ask the loop to stop after the current iteration
    pub fn stop(&self) {
        self.stop.stop();
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.is_stopped()
    }

    /// Last snapshot published by the loop
    pub fn status(&self) -> NodeStatus {
        self.status.read().clone()
    }

    pub fn set_effect_status(&self, effect: EffectStatus) -> CueSyncResult<()> {
        self.send(AgentCommand::SetEffectStatus(effect))
    }

    pub fn set_rssi(&self, rssi_dbm: i32) -> CueSyncResult<()> {
        self.send(AgentCommand::SetRssi(rssi_dbm))
    }

    fn send(&self, command: AgentCommand) -> CueSyncResult<()> {
        self.commands.try_send(command).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => CueSyncError::CommandRejected("queue full"),
            mpsc::error::TrySendError::Closed(_) => CueSyncError::CommandRejected("reactor stopped"),
        })
    }
}

/// Drives an agent from a datagram transport
pub struct Reactor<T, C, A> {
    transport: T,
    agent: Agent<C, A>,
    stop: StopFlag,
    commands: mpsc::Receiver<AgentCommand>,
    status: Arc<RwLock<NodeStatus>>,
}

impl<T, C, A> Reactor<T, C, A>
where
    T: DatagramTransport,
    C: LocalClock,
    A: CueApplier,
{
    pub fn new(transport: T, agent: Agent<C, A>) -> (Self, AgentHandle) {
        let stop = StopFlag::default();
        let (tx, rx) = mpsc::channel(COMMAND_QUEUE_DEPTH);
        let status = Arc::new(RwLock::new(agent.status()));

        let handle = AgentHandle {
            stop: stop.clone(),
            commands: tx,
            status: Arc::clone(&status),
        };
        let reactor = Reactor {
            transport,
            agent,
            stop,
            commands: rx,
            status,
        };
        (reactor, handle)
    }

    /// Run until stopped, then hand the (stopped) agent back
    pub async fn run(mut self) -> Agent<C, A> {
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
        info!(local = %self.transport.local_addr(), node = %self.agent.node_id(), "reactor running");

        while !self.stop.is_stopped() {
            self.drain_commands();
            self.agent.process_due_fires();
            if let Some(probe) = self.agent.housekeeping() {
                self.send(probe).await;
            }
            self.publish_status();

            let wait = self.agent.next_wait();
            let received = match tokio::time::timeout(wait, self.transport.recv_from(&mut buf)).await {
                Err(_elapsed) => continue,
                Ok(Err(e)) => {
                    warn!(error = %e, "receive failed");
                    continue;
                }
                Ok(Ok(received)) => received,
            };

            let (len, src) = received;
            let replies = self.agent.handle_datagram(&buf[..len], src);
            for reply in replies {
                self.send(reply).await;
            }
            self.agent.process_due_fires();
        }

        self.agent.stop();
        self.publish_status();
        info!("reactor stopped");
        self.agent
    }

    fn drain_commands(&mut self) {
        while let Ok(command) = self.commands.try_recv() {
            debug!(?command, "agent command");
            match command {
                AgentCommand::SetEffectStatus(effect) => self.agent.set_effect_status(effect),
                AgentCommand::SetRssi(rssi) => self.agent.set_rssi(rssi),
            }
        }
    }

    async fn send(&mut self, out: Outbound) {
        if let Err(e) = self.transport.send_to(&out.bytes, out.dest).await {
            self.agent.record_send_error();
            warn!(kind = ?out.kind, dest = %out.dest, error = %e, "send failed");
        }
    }

    fn publish_status(&self) {
        *self.status.write() = self.agent.status();
    }

    pub fn agent(&self) -> &Agent<C, A> {
        &self.agent
    }
}
