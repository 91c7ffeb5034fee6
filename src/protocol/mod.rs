//! The aggregation handshake between the coordinator and its workers.
//!
//! Once every rank has counted its shard, the coordinator asks each worker for
//! its counts, merges the replies into its own, and only then tells every
//! worker to exit:
//!
//! ```text
//! coordinator                         worker i
//!     | -- RequestData (to i) -------->  |  AwaitingCommand
//!     |                                  |  Sending
//!     | <------- Data (from i) --------- |
//!     |   ... every other worker ...     |  AwaitingCommand
//!     | -- Exit (to i) --------------->  |  Terminated
//! ```
//!
//! Every message is an [`Envelope`] naming its sender and recipient, and each
//! worker has its own pair of endpoints, so a reply is always attributed to
//! the worker that sent it. The transport behind the endpoints is either
//! in-process channels ([`local`]) or TCP ([`tcp`]).

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, info};

use crate::error::{Phase, TrendError};
use crate::{CountMap, Rank, COORDINATOR_RANK};

pub mod local;
pub mod tcp;

/////////////////////////////////////////////////////////////////////////////
// Messages
/////////////////////////////////////////////////////////////////////////////

/// A directive from the coordinator to one worker.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Command {
    /// Send back the local counts.
    RequestData,
    /// Stop participating and end the process.
    Exit,
}

/// A message addressed from one rank to another.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub from: Rank,
    pub to: Rank,
    pub body: T,
}

impl<T> Envelope<T> {
    pub fn new(from: Rank, to: Rank, body: T) -> Self {
        Self { from, to, body }
    }
}

/// The outcome of waiting for a message.
#[derive(Debug)]
pub enum Recv<T> {
    Message(T),
    /// The deadline passed before anything arrived.
    TimedOut,
    /// The peer is gone and nothing more will arrive.
    Closed,
}

/////////////////////////////////////////////////////////////////////////////
// Transport endpoints
/////////////////////////////////////////////////////////////////////////////

/// The coordinator's handle on one worker.
#[async_trait]
pub trait WorkerHandle: Send {
    /// The rank this handle talks to.
    fn rank(&self) -> Rank;

    /// Deliver a command. A worker that can no longer be reached yields
    /// `Ok(false)`.
    async fn send_command(&mut self, command: Envelope<Command>) -> Result<bool, TrendError>;

    /// Wait until `deadline` for this worker's counts.
    async fn recv_data(&mut self, deadline: Instant) -> Result<Recv<Envelope<CountMap>>, TrendError>;
}

/// A worker's connection to the coordinator.
#[async_trait]
pub trait CoordinatorLink: Send {
    /// Wait for the next command. With no deadline this blocks until a
    /// command arrives or the coordinator goes away.
    async fn recv_command(
        &mut self,
        deadline: Option<Instant>,
    ) -> Result<Recv<Envelope<Command>>, TrendError>;

    async fn send_data(&mut self, data: Envelope<&CountMap>) -> Result<(), TrendError>;
}

/////////////////////////////////////////////////////////////////////////////
// Coordinator role
/////////////////////////////////////////////////////////////////////////////

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CoordinatorState {
    Scanning,
    Requesting,
    Merging,
    Terminating,
    Done,
}

/// Collects every worker's counts exactly once and then releases the workers.
pub struct Coordinator<H> {
    workers: Vec<H>,
    timeout: Duration,
    state: CoordinatorState,
}

impl<H: WorkerHandle> Coordinator<H> {
    /// `timeout` bounds the wait for each worker's reply, counted from the
    /// moment its request was sent. A worker that is still scanning its shard
    /// when the request goes out has to finish the scan within that window.
    pub fn new(mut workers: Vec<H>, timeout: Duration) -> Self {
        workers.sort_by_key(|w| w.rank());
        Self {
            workers,
            timeout,
            state: CoordinatorState::Scanning,
        }
    }

    pub fn state(&self) -> CoordinatorState {
        self.state
    }

    fn enter(&mut self, state: CoordinatorState) {
        debug!(from = ?self.state, to = ?state, "Coordinator state change");
        self.state = state;
    }

    /// Merge every worker's counts into `local`, the coordinator's own shard
    /// counts, and terminate the workers.
    ///
    /// Any worker that fails, times out, or answers out of turn aborts the
    /// whole aggregation; no partial result is returned.
    pub async fn aggregate(mut self, local: CountMap) -> Result<CountMap, TrendError> {
        let mut global = local;
        if self.workers.is_empty() {
            self.enter(CoordinatorState::Done);
            return Ok(global);
        }

        self.enter(CoordinatorState::Requesting);
        let mut deadlines = Vec::with_capacity(self.workers.len());
        for worker in self.workers.iter_mut() {
            let rank = worker.rank();
            let request = Envelope::new(COORDINATOR_RANK, rank, Command::RequestData);
            if !worker.send_command(request).await? {
                return Err(TrendError::WorkerFailed {
                    rank,
                    phase: Phase::Requesting,
                });
            }
            deadlines.push(Instant::now() + self.timeout);
        }

        self.enter(CoordinatorState::Merging);
        for (worker, deadline) in self.workers.iter_mut().zip(deadlines) {
            let rank = worker.rank();
            let reply = match worker.recv_data(deadline).await? {
                Recv::Message(reply) => reply,
                Recv::TimedOut => {
                    return Err(TrendError::WorkerTimeout {
                        rank,
                        phase: Phase::Merging,
                        timeout: self.timeout,
                    })
                }
                Recv::Closed => {
                    return Err(TrendError::WorkerFailed {
                        rank,
                        phase: Phase::Merging,
                    })
                }
            };
            if reply.from != rank || reply.to != COORDINATOR_RANK {
                return Err(TrendError::Protocol {
                    rank,
                    detail: format!(
                        "expected data from {rank} to {COORDINATOR_RANK}, got {} to {}",
                        reply.from, reply.to
                    ),
                });
            }
            debug!(rank, keys = reply.body.len(), "Merging worker counts");
            global.merge(reply.body);
        }

        self.enter(CoordinatorState::Terminating);
        for worker in self.workers.iter_mut() {
            let rank = worker.rank();
            if !worker
                .send_command(Envelope::new(COORDINATOR_RANK, rank, Command::Exit))
                .await?
            {
                return Err(TrendError::WorkerFailed {
                    rank,
                    phase: Phase::Terminating,
                });
            }
        }

        self.enter(CoordinatorState::Done);
        Ok(global)
    }
}

/////////////////////////////////////////////////////////////////////////////
// Worker role
/////////////////////////////////////////////////////////////////////////////

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum WorkerState {
    Scanning,
    AwaitingCommand,
    Sending,
    Terminated,
}

/// Serves a worker's frozen counts until the coordinator says to exit.
pub struct Worker<L> {
    rank: Rank,
    link: L,
    state: WorkerState,
}

impl<L: CoordinatorLink> Worker<L> {
    pub fn new(rank: Rank, link: L) -> Self {
        Self {
            rank,
            link,
            state: WorkerState::Scanning,
        }
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    fn enter(&mut self, state: WorkerState) {
        debug!(rank = self.rank, from = ?self.state, to = ?state, "Worker state change");
        self.state = state;
    }

    /// Answer commands with `counts` until told to exit.
    ///
    /// Returns how many times the counts were sent. A worker may be asked
    /// more than once and answers every request.
    pub async fn serve(mut self, counts: CountMap) -> Result<usize, TrendError> {
        let mut sent = 0;
        loop {
            self.enter(WorkerState::AwaitingCommand);
            let command = match self.link.recv_command(None).await? {
                Recv::Message(command) => command,
                Recv::TimedOut | Recv::Closed => {
                    return Err(TrendError::CoordinatorLost { rank: self.rank })
                }
            };
            if command.to != self.rank || command.from != COORDINATOR_RANK {
                return Err(TrendError::Protocol {
                    rank: self.rank,
                    detail: format!(
                        "command from {} to {} delivered to rank {}",
                        command.from, command.to, self.rank
                    ),
                });
            }
            match command.body {
                Command::RequestData => {
                    self.enter(WorkerState::Sending);
                    info!(rank = self.rank, items = counts.len(), "Sending back counts");
                    self.link
                        .send_data(Envelope::new(self.rank, COORDINATOR_RANK, &counts))
                        .await?;
                    sent += 1;
                }
                Command::Exit => {
                    self.enter(WorkerState::Terminated);
                    return Ok(sent);
                }
            }
        }
    }
}
