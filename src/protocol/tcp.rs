//! TCP transport for ranks running as separate processes.
//!
//! Frames are a big-endian `u32` length followed by a JSON-encoded [`Frame`].
//! A worker opens the session with [`Frame::Join`]; the coordinator answers
//! with an [`Assignment`] carrying the worker's rank and the job to scan.
//! After that only commands and data cross the connection.

use std::time::Duration;

use async_trait::async_trait;
use bytes::{BufMut, BytesMut};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::time::{timeout_at, Instant};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::TrendError;
use crate::protocol::{Command, CoordinatorLink, Envelope, Recv, WorkerHandle};
use crate::{CountMap, Mode, Rank, Shard};

/// Largest frame either side accepts.
pub const MAX_FRAME_LEN: usize = 512 * 1024 * 1024;

/// What a coordinator tells a worker when it joins.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Assignment {
    pub run_id: Uuid,
    pub shard: Shard,
    /// Path or glob of the record source, as seen by the worker.
    pub input: String,
    pub mode: Mode,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Frame {
    Join,
    Assign(Assignment),
    Command(Envelope<Command>),
    Data(Envelope<CountMap>),
}

/// Serialization-only twin of [`Frame::Data`], so counts are encoded without
/// being cloned.
#[derive(Serialize)]
enum FrameRef<'a> {
    Data(Envelope<&'a CountMap>),
}

async fn write_frame<T: Serialize>(stream: &mut TcpStream, frame: &T) -> Result<(), TrendError> {
    let body = serde_json::to_vec(frame)?;
    if body.len() > MAX_FRAME_LEN {
        return Err(TrendError::FrameTooLarge(body.len()));
    }
    let mut buf = BytesMut::with_capacity(4 + body.len());
    buf.put_u32(body.len() as u32);
    buf.put_slice(&body);
    stream.write_all(&buf).await?;
    stream.flush().await?;
    Ok(())
}

/// Read one frame. A connection closed cleanly before a frame starts yields
/// `None`.
async fn read_frame(stream: &mut TcpStream) -> Result<Option<Frame>, TrendError> {
    let len = match stream.read_u32().await {
        Ok(len) => len as usize,
        Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    if len > MAX_FRAME_LEN {
        return Err(TrendError::FrameTooLarge(len));
    }
    let mut body = BytesMut::zeroed(len);
    stream.read_exact(&mut body).await?;
    Ok(Some(serde_json::from_slice(&body)?))
}

async fn read_frame_until(
    stream: &mut TcpStream,
    deadline: Option<Instant>,
) -> Result<Recv<Frame>, TrendError> {
    let frame = match deadline {
        Some(deadline) => match timeout_at(deadline, read_frame(stream)).await {
            Ok(frame) => frame,
            Err(_) => return Ok(Recv::TimedOut),
        },
        None => read_frame(stream).await,
    };
    match frame {
        Ok(Some(frame)) => Ok(Recv::Message(frame)),
        Ok(None) => Ok(Recv::Closed),
        Err(TrendError::Io(err)) if is_disconnect(&err) => Ok(Recv::Closed),
        Err(err) => Err(err),
    }
}

fn is_disconnect(err: &std::io::Error) -> bool {
    use std::io::ErrorKind::*;
    matches!(
        err.kind(),
        UnexpectedEof | ConnectionReset | ConnectionAborted | BrokenPipe
    )
}

/////////////////////////////////////////////////////////////////////////////
// Coordinator side
/////////////////////////////////////////////////////////////////////////////

/// The coordinator's connection to one worker process.
pub struct TcpHandle {
    rank: Rank,
    stream: TcpStream,
}

/// Accept workers until every rank of the job has joined.
///
/// Ranks `1..workers` are handed out in join order. The whole registration is
/// bounded by `timeout`; a group that does not fill up in time is fatal.
pub async fn accept_workers(
    listener: &TcpListener,
    run_id: Uuid,
    input: &str,
    mode: Mode,
    workers: usize,
    timeout: Duration,
) -> Result<Vec<TcpHandle>, TrendError> {
    let expected = workers.saturating_sub(1);
    let deadline = Instant::now() + timeout;
    let mut handles = Vec::with_capacity(expected);
    while handles.len() < expected {
        let joined = handles.len();
        let join_timeout = || TrendError::JoinTimeout {
            joined,
            expected,
            timeout,
        };
        let (mut stream, addr) = timeout_at(deadline, listener.accept())
            .await
            .map_err(|_| join_timeout())??;
        stream.set_nodelay(true)?;
        match read_frame_until(&mut stream, Some(deadline)).await {
            Ok(Recv::Message(Frame::Join)) => {}
            Ok(Recv::Message(other)) => {
                warn!(%addr, got = frame_kind(&other), "Dropping connection that did not open with a join");
                continue;
            }
            Ok(Recv::Closed) => {
                warn!(%addr, "Connection closed before joining");
                continue;
            }
            Ok(Recv::TimedOut) => return Err(join_timeout()),
            Err(err) => {
                warn!(%addr, %err, "Dropping connection with an unreadable join");
                continue;
            }
        }
        let rank = joined + 1;
        let assignment = Assignment {
            run_id,
            shard: Shard::new(rank, workers),
            input: input.to_string(),
            mode,
        };
        write_frame(&mut stream, &Frame::Assign(assignment)).await?;
        info!(%addr, rank, "Worker joined");
        handles.push(TcpHandle { rank, stream });
    }
    Ok(handles)
}

#[async_trait]
impl WorkerHandle for TcpHandle {
    fn rank(&self) -> Rank {
        self.rank
    }

    async fn send_command(&mut self, command: Envelope<Command>) -> Result<bool, TrendError> {
        match write_frame(&mut self.stream, &Frame::Command(command)).await {
            Ok(()) => Ok(true),
            Err(TrendError::Io(err)) if is_disconnect(&err) => Ok(false),
            Err(err) => Err(err),
        }
    }

    async fn recv_data(&mut self, deadline: Instant) -> Result<Recv<Envelope<CountMap>>, TrendError> {
        match read_frame_until(&mut self.stream, Some(deadline)).await? {
            Recv::Message(Frame::Data(data)) => Ok(Recv::Message(data)),
            Recv::Message(other) => Err(TrendError::Protocol {
                rank: self.rank,
                detail: format!("expected data, got {}", frame_kind(&other)),
            }),
            Recv::TimedOut => Ok(Recv::TimedOut),
            Recv::Closed => Ok(Recv::Closed),
        }
    }
}

fn frame_kind(frame: &Frame) -> &'static str {
    match frame {
        Frame::Join => "a join",
        Frame::Assign(_) => "an assignment",
        Frame::Command(_) => "a command",
        Frame::Data(_) => "data",
    }
}

/////////////////////////////////////////////////////////////////////////////
// Worker side
/////////////////////////////////////////////////////////////////////////////

/// A worker process's connection to its coordinator.
pub struct TcpLink {
    rank: Rank,
    stream: TcpStream,
}

impl TcpLink {
    pub fn rank(&self) -> Rank {
        self.rank
    }
}

/// Join the coordinator at `addr` and wait for an assignment.
pub async fn join(addr: impl ToSocketAddrs) -> Result<(TcpLink, Assignment), TrendError> {
    let mut stream = TcpStream::connect(addr).await?;
    stream.set_nodelay(true)?;
    write_frame(&mut stream, &Frame::Join).await?;
    match read_frame(&mut stream).await? {
        Some(Frame::Assign(assignment)) => {
            let link = TcpLink {
                rank: assignment.shard.rank,
                stream,
            };
            Ok((link, assignment))
        }
        Some(other) => Err(TrendError::Protocol {
            rank: 0,
            detail: format!("expected an assignment, got {}", frame_kind(&other)),
        }),
        None => Err(TrendError::Io(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            "coordinator closed the connection before assigning a rank",
        ))),
    }
}

#[async_trait]
impl CoordinatorLink for TcpLink {
    async fn recv_command(
        &mut self,
        deadline: Option<Instant>,
    ) -> Result<Recv<Envelope<Command>>, TrendError> {
        match read_frame_until(&mut self.stream, deadline).await {
            Ok(Recv::Message(Frame::Command(command))) => Ok(Recv::Message(command)),
            Ok(Recv::Message(other)) => Err(TrendError::Protocol {
                rank: self.rank,
                detail: format!("expected a command, got {}", frame_kind(&other)),
            }),
            Ok(Recv::TimedOut) => Ok(Recv::TimedOut),
            Ok(Recv::Closed) => Ok(Recv::Closed),
            Err(TrendError::Codec(err)) => Err(TrendError::Protocol {
                rank: self.rank,
                detail: format!("undecodable command: {err}"),
            }),
            Err(err) => Err(err),
        }
    }

    async fn send_data(&mut self, data: Envelope<&CountMap>) -> Result<(), TrendError> {
        match write_frame(&mut self.stream, &FrameRef::Data(data)).await {
            Err(TrendError::Io(err)) if is_disconnect(&err) => {
                Err(TrendError::CoordinatorLost { rank: self.rank })
            }
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Coordinator, Worker};

    #[test]
    fn borrowed_data_frames_decode_as_owned_ones() {
        let counts: CountMap = [("#a".to_string(), 3)].into_iter().collect();
        let bytes = serde_json::to_vec(&FrameRef::Data(Envelope::new(1, 0, &counts))).unwrap();
        let frame: Frame = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(frame, Frame::Data(Envelope::new(1, 0, counts)));
    }

    #[tokio::test]
    async fn workers_join_and_report_over_loopback() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let mut workers = Vec::new();
        for _ in 0..2 {
            workers.push(tokio::spawn(async move {
                let (link, assignment) = join(addr).await.unwrap();
                let mut local = CountMap::new();
                local.add(format!("#rank{}", assignment.shard.rank), 2);
                local.add("#all".to_string(), 1);
                Worker::new(link.rank(), link).serve(local).await
            }));
        }

        let timeout = Duration::from_secs(10);
        let handles = accept_workers(&listener, Uuid::new_v4(), "in.json", Mode::Hashtags, 3, timeout)
            .await
            .unwrap();
        assert_eq!(handles.iter().map(|h| h.rank()).collect::<Vec<_>>(), vec![1, 2]);

        let mut local = CountMap::new();
        local.add("#all".to_string(), 1);
        let merged = Coordinator::new(handles, timeout).aggregate(local).await.unwrap();
        assert_eq!(merged.get("#all"), 3);
        assert_eq!(merged.get("#rank1"), 2);
        assert_eq!(merged.get("#rank2"), 2);

        for worker in workers {
            assert_eq!(worker.await.unwrap().unwrap(), 1);
        }
    }

    #[tokio::test]
    async fn registration_times_out_when_workers_are_missing() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let err = accept_workers(
            &listener,
            Uuid::new_v4(),
            "in.json",
            Mode::Language,
            2,
            Duration::from_millis(50),
        )
        .await
        .err()
        .unwrap();
        assert!(matches!(
            err,
            TrendError::JoinTimeout {
                joined: 0,
                expected: 1,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn disconnected_worker_fails_the_run() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let quitter = tokio::spawn(async move {
            let (link, _) = join(addr).await.unwrap();
            drop(link);
        });

        let timeout = Duration::from_secs(10);
        let handles = accept_workers(&listener, Uuid::new_v4(), "in.json", Mode::Hashtags, 2, timeout)
            .await
            .unwrap();
        quitter.await.unwrap();

        let err = Coordinator::new(handles, timeout)
            .aggregate(CountMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, TrendError::WorkerFailed { rank: 1, .. }), "{err}");
    }
}
