//! In-process transport: one pair of tokio channels per worker.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::{timeout_at, Instant};

use crate::error::TrendError;
use crate::protocol::{Command, CoordinatorLink, Envelope, Recv, WorkerHandle};
use crate::{CountMap, Rank};

// Commands in flight per worker never exceed two (a request and an exit).
const CHANNEL_DEPTH: usize = 4;

/// The coordinator's end of one worker's channels.
pub struct LocalHandle {
    rank: Rank,
    commands: mpsc::Sender<Envelope<Command>>,
    replies: mpsc::Receiver<Envelope<CountMap>>,
}

/// A worker's end of its channels.
pub struct LocalLink {
    rank: Rank,
    commands: mpsc::Receiver<Envelope<Command>>,
    replies: mpsc::Sender<Envelope<CountMap>>,
}

impl LocalLink {
    pub fn rank(&self) -> Rank {
        self.rank
    }
}

/// Wire up ranks `1..workers` to the coordinator.
///
/// Returns the coordinator's handles and the workers' links, both ordered by
/// rank. A group of one rank has no channels at all.
pub fn group(workers: usize) -> (Vec<LocalHandle>, Vec<LocalLink>) {
    (1..workers)
        .map(|rank| {
            let (command_tx, command_rx) = mpsc::channel(CHANNEL_DEPTH);
            let (reply_tx, reply_rx) = mpsc::channel(CHANNEL_DEPTH);
            (
                LocalHandle {
                    rank,
                    commands: command_tx,
                    replies: reply_rx,
                },
                LocalLink {
                    rank,
                    commands: command_rx,
                    replies: reply_tx,
                },
            )
        })
        .unzip()
}

async fn recv_until<T>(rx: &mut mpsc::Receiver<T>, deadline: Option<Instant>) -> Recv<T> {
    let received = match deadline {
        Some(deadline) => match timeout_at(deadline, rx.recv()).await {
            Ok(received) => received,
            Err(_) => return Recv::TimedOut,
        },
        None => rx.recv().await,
    };
    match received {
        Some(message) => Recv::Message(message),
        None => Recv::Closed,
    }
}

#[async_trait]
impl WorkerHandle for LocalHandle {
    fn rank(&self) -> Rank {
        self.rank
    }

    async fn send_command(&mut self, command: Envelope<Command>) -> Result<bool, TrendError> {
        Ok(self.commands.send(command).await.is_ok())
    }

    async fn recv_data(&mut self, deadline: Instant) -> Result<Recv<Envelope<CountMap>>, TrendError> {
        Ok(recv_until(&mut self.replies, Some(deadline)).await)
    }
}

#[async_trait]
impl CoordinatorLink for LocalLink {
    async fn recv_command(
        &mut self,
        deadline: Option<Instant>,
    ) -> Result<Recv<Envelope<Command>>, TrendError> {
        Ok(recv_until(&mut self.commands, deadline).await)
    }

    async fn send_data(&mut self, data: Envelope<&CountMap>) -> Result<(), TrendError> {
        let Envelope { from, to, body } = data;
        self.replies
            .send(Envelope::new(from, to, body.clone()))
            .await
            .map_err(|_| TrendError::CoordinatorLost { rank: self.rank })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::protocol::{Coordinator, CoordinatorState, Worker};
    use crate::COORDINATOR_RANK;

    fn counts(pairs: &[(&str, u64)]) -> CountMap {
        pairs.iter().map(|(k, c)| (k.to_string(), *c)).collect()
    }

    const TIMEOUT: Duration = Duration::from_secs(5);

    #[tokio::test]
    async fn single_rank_skips_the_handshake() {
        let (handles, links) = group(1);
        assert!(handles.is_empty() && links.is_empty());
        let local = counts(&[("#a", 1)]);
        let merged = Coordinator::new(handles, TIMEOUT)
            .aggregate(local.clone())
            .await
            .unwrap();
        assert_eq!(merged, local);
    }

    #[tokio::test]
    async fn replies_are_merged_and_workers_released() {
        let (handles, links) = group(3);
        let mut tasks = Vec::new();
        for (link, local) in links
            .into_iter()
            .zip([counts(&[("#a", 2)]), counts(&[("#a", 1), ("#b", 4)])])
        {
            let rank = link.rank();
            tasks.push(tokio::spawn(Worker::new(rank, link).serve(local)));
        }

        let merged = Coordinator::new(handles, TIMEOUT)
            .aggregate(counts(&[("#b", 1)]))
            .await
            .unwrap();
        assert_eq!(merged, counts(&[("#a", 3), ("#b", 5)]));

        for task in tasks {
            // Each worker was asked exactly once before exiting.
            assert_eq!(task.await.unwrap().unwrap(), 1);
        }
    }

    #[tokio::test]
    async fn worker_answers_repeated_requests() {
        let (mut handles, mut links) = group(2);
        let mut handle = handles.remove(0);
        let link = links.remove(0);
        let worker = tokio::spawn(Worker::new(1, link).serve(counts(&[("#a", 1)])));

        let deadline = Instant::now() + TIMEOUT;
        for _ in 0..2 {
            let request = Envelope::new(COORDINATOR_RANK, 1, Command::RequestData);
            assert!(handle.send_command(request).await.unwrap());
            match handle.recv_data(deadline).await.unwrap() {
                Recv::Message(reply) => assert_eq!(reply.body.get("#a"), 1),
                other => panic!("unexpected {other:?}"),
            }
        }
        let exit = Envelope::new(COORDINATOR_RANK, 1, Command::Exit);
        assert!(handle.send_command(exit).await.unwrap());
        assert_eq!(worker.await.unwrap().unwrap(), 2);
    }

    #[tokio::test]
    async fn dead_worker_fails_the_run() {
        let (handles, links) = group(3);
        let mut links = links.into_iter();
        let healthy = links.next().unwrap();
        let healthy = tokio::spawn(Worker::new(1, healthy).serve(CountMap::new()));
        // Rank 2 dies before it can answer.
        drop(links);

        let err = Coordinator::new(handles, TIMEOUT)
            .aggregate(CountMap::new())
            .await
            .unwrap_err();
        assert!(
            matches!(err, TrendError::WorkerFailed { rank: 2, .. }),
            "{err}"
        );
        // Rank 1 was never told to exit and notices the coordinator is gone.
        assert!(matches!(
            healthy.await.unwrap(),
            Err(TrendError::CoordinatorLost { rank: 1 })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn silent_worker_times_out() {
        let (handles, links) = group(2);
        // Keep the link alive but never answer.
        let _silent = links;

        let err = Coordinator::new(handles, Duration::from_secs(30))
            .aggregate(CountMap::new())
            .await
            .unwrap_err();
        assert!(
            matches!(err, TrendError::WorkerTimeout { rank: 1, .. }),
            "{err}"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn slow_scan_within_the_timeout_is_merged() {
        let (handles, mut links) = group(2);
        let link = links.remove(0);
        let worker = tokio::spawn(async move {
            // The request is queued while this rank is still scanning.
            tokio::time::sleep(Duration::from_secs(20)).await;
            Worker::new(1, link).serve(counts(&[("#a", 1)])).await
        });

        let merged = Coordinator::new(handles, Duration::from_secs(30))
            .aggregate(counts(&[("#a", 1)]))
            .await
            .unwrap();
        assert_eq!(merged.get("#a"), 2);
        assert_eq!(worker.await.unwrap().unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn scan_time_counts_against_the_timeout() {
        let (handles, mut links) = group(2);
        let link = links.remove(0);
        let _worker = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(40)).await;
            Worker::new(1, link).serve(CountMap::new()).await
        });

        let err = Coordinator::new(handles, Duration::from_secs(30))
            .aggregate(CountMap::new())
            .await
            .unwrap_err();
        assert!(
            matches!(err, TrendError::WorkerTimeout { rank: 1, .. }),
            "{err}"
        );
    }

    #[tokio::test]
    async fn misaddressed_reply_is_a_protocol_error() {
        let (handles, mut links) = group(2);
        let mut link = links.remove(0);
        let impostor = tokio::spawn(async move {
            let _ = link.recv_command(None).await;
            link.send_data(Envelope::new(7, COORDINATOR_RANK, &CountMap::new()))
                .await
        });

        let err = Coordinator::new(handles, TIMEOUT)
            .aggregate(CountMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, TrendError::Protocol { rank: 1, .. }), "{err}");
        impostor.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn worker_rejects_commands_for_other_ranks() {
        let (mut handles, mut links) = group(2);
        let mut handle = handles.remove(0);
        let worker = tokio::spawn(Worker::new(1, links.remove(0)).serve(CountMap::new()));
        let stray = Envelope::new(COORDINATOR_RANK, 5, Command::RequestData);
        assert!(handle.send_command(stray).await.unwrap());
        assert!(matches!(
            worker.await.unwrap(),
            Err(TrendError::Protocol { rank: 1, .. })
        ));
    }

    #[test]
    fn coordinator_starts_in_scanning() {
        let (handles, _links) = group(2);
        let coordinator = Coordinator::new(handles, TIMEOUT);
        assert_eq!(coordinator.state(), CoordinatorState::Scanning);
    }
}
