//
// Copyright (c) The Keel Core Contributors
//
// SPDX-License-Identifier: MIT
//

//! Front-end sessions on the local UNIX-domain socket.
//!
//! One length-prefixed XML document per request and reply (a 32-bit
//! big-endian length followed by the document bytes). Server-push frames
//! (event notifications) interleave with replies on the same socket. The
//! hello exchange and NETCONF 1.1 chunked framing belong to the transport
//! front-ends; they hand the engine fully reassembled `<rpc>` documents.

use std::path::Path;

use keel_utils::task::Task;
use keel_utils::{Responder, SessionId};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

// Requests larger than this are rejected as malformed.
const MAX_FRAME_SIZE: u32 = 16 * 1024 * 1024;

// Messages from the session layer to the engine.
#[derive(Debug)]
pub enum SessionMsg {
    Connected {
        stream: UnixStream,
    },
    Request {
        session: SessionId,
        xml: String,
        responder: Responder<String>,
    },
    Disconnected {
        session: SessionId,
    },
}

// Frames pushed from the engine to a session outside the request/reply
// exchange.
#[derive(Debug)]
pub enum PushMsg {
    Frame(String),
    // Session terminated by the engine (kill-session).
    Close,
}

// ===== helper functions =====

async fn read_frame(
    stream: &mut UnixStream,
) -> std::io::Result<Option<Vec<u8>>> {
    let mut len_buf = [0u8; 4];
    match stream.read_exact(&mut len_buf).await {
        Ok(_) => (),
        Err(error) if error.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Ok(None);
        }
        Err(error) => return Err(error),
    }
    let len = u32::from_be_bytes(len_buf);
    if len > MAX_FRAME_SIZE {
        return Err(std::io::Error::other("frame too large"));
    }
    let mut buf = vec![0u8; len as usize];
    stream.read_exact(&mut buf).await?;
    Ok(Some(buf))
}

async fn write_frame(
    stream: &mut UnixStream,
    payload: &[u8],
) -> std::io::Result<()> {
    stream.write_all(&(payload.len() as u32).to_be_bytes()).await?;
    stream.write_all(payload).await?;
    stream.flush().await
}

// ===== global functions =====

/// Binds the front-end socket and spawns the accept loop. New connections
/// are handed to the engine for session setup.
pub fn listen(
    path: &Path,
    session_tx: mpsc::Sender<SessionMsg>,
) -> std::io::Result<Task<()>> {
    // A stale socket from a previous run would fail the bind.
    if path.exists() {
        std::fs::remove_file(path)?;
    }
    let listener = UnixListener::bind(path)?;
    debug!(path = %path.display(), "listening for front-end connections");

    Ok(Task::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((stream, _)) => {
                    if session_tx
                        .send(SessionMsg::Connected { stream })
                        .await
                        .is_err()
                    {
                        return;
                    }
                }
                Err(error) => {
                    warn!(%error, "failed to accept connection");
                }
            }
        }
    }))
}

/// Spawns the I/O task of an accepted session. Requests flow to the engine,
/// replies and pushed frames flow back; dropping the returned handle (or a
/// `PushMsg::Close`) tears the session down.
pub fn start_session(
    session: SessionId,
    mut stream: UnixStream,
    session_tx: mpsc::Sender<SessionMsg>,
    mut push_rx: mpsc::UnboundedReceiver<PushMsg>,
) -> Task<()> {
    Task::spawn(async move {
        loop {
            tokio::select! {
                frame = read_frame(&mut stream) => {
                    let frame = match frame {
                        Ok(Some(frame)) => frame,
                        Ok(None) => break,
                        Err(error) => {
                            warn!(%session, %error, "session read failed");
                            break;
                        }
                    };
                    let xml = String::from_utf8_lossy(&frame).into_owned();

                    // Hand the request to the engine and relay the reply.
                    let (responder, response) = oneshot::channel();
                    if session_tx
                        .send(SessionMsg::Request {
                            session,
                            xml,
                            responder,
                        })
                        .await
                        .is_err()
                    {
                        break;
                    }
                    let Ok(reply) = response.await else { break };
                    if let Err(error) =
                        write_frame(&mut stream, reply.as_bytes()).await
                    {
                        warn!(%session, %error, "session write failed");
                        break;
                    }
                }
                push = push_rx.recv() => {
                    match push {
                        Some(PushMsg::Frame(frame)) => {
                            if write_frame(&mut stream, frame.as_bytes())
                                .await
                                .is_err()
                            {
                                break;
                            }
                        }
                        // Engine closed the session (kill-session) or went
                        // away entirely.
                        Some(PushMsg::Close) | None => break,
                    }
                }
            }
        }

        let _ = session_tx
            .send(SessionMsg::Disconnected { session })
            .await;
    })
}
