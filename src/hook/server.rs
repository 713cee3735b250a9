//! `HookServer` — bind/accept loop with per-connection task spawn.
//!
//! Ports `Server.ListenAndServe`/`serveClient` from `pkg/server/server.go`.
//! `nix`'s socket calls are all blocking syscalls with no async variant,
//! so the accept loop runs on a dedicated OS thread and hands connections
//! to the async side over an mpsc channel; shutdown closes the raw
//! listening descriptor to unblock that thread's `accept(2)` call, the
//! same trick the original relies on via `net.UnixListener.Close()`.
//! Handler task tracking (`JoinSet`, wait-for-drain-on-shutdown) is
//! grounded on the teacher's `runtime` boot-then-serve-then-stop idiom.

use std::path::Path;

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::orchestrator::TrafficLimitFetcher;

use super::handler::HookHandler;
use super::socket::{accept_on, HookConn, HookListener, PeekOutcome, SocketError};

pub struct HookServer<F: TrafficLimitFetcher> {
    listener: HookListener,
    handler: Arc<HookHandler<F>>,
}

impl<F: TrafficLimitFetcher> HookServer<F> {
    pub fn bind(path: &Path, handler: Arc<HookHandler<F>>) -> Result<Self, SocketError> {
        let listener = HookListener::bind(path)?;
        info!(path = %path.display(), "hook server listening");
        Ok(Self { listener, handler })
    }

    /// Accept connections until `shutdown` fires, spawning one task per
    /// connection. On shutdown, stops accepting new connections and waits
    /// for every spawned handler task to finish before returning.
    pub async fn serve(self, mut shutdown: watch::Receiver<bool>) {
        let HookServer { listener, handler } = self;
        let raw_fd = listener.into_raw_fd();

        let (conn_tx, mut conn_rx) = tokio::sync::mpsc::channel::<HookConn>(16);
        let accept_thread = std::thread::spawn(move || loop {
            match accept_on(raw_fd) {
                Ok(conn) => {
                    if conn_tx.blocking_send(conn).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    warn!(error = %e, "accept loop exiting");
                    break;
                }
            }
        });

        let mut tasks = JoinSet::new();
        loop {
            tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                maybe_conn = conn_rx.recv() => match maybe_conn {
                    Some(conn) => {
                        let handler = Arc::clone(&handler);
                        tasks.spawn(async move { serve_one(handler, conn).await });
                    }
                    None => break,
                },
            }
        }

        // Unblocks the accept thread's in-progress `accept(2)` call.
        let _ = nix::unistd::close(raw_fd);
        let _ = accept_thread.join();

        info!(pending = tasks.len(), "hook server draining in-flight connections");
        while tasks.join_next().await.is_some() {}
        info!("hook server shut down");
    }
}

async fn serve_one<F: TrafficLimitFetcher>(handler: Arc<HookHandler<F>>, conn: HookConn) {
    let peer_pid = conn.peer_pid();

    let length = match tokio::task::block_in_place(|| conn.peek_length()) {
        Ok(PeekOutcome::Length(n)) => n,
        Ok(PeekOutcome::Timeout) => {
            warn!(peer_pid, "read timed out");
            return;
        }
        Ok(PeekOutcome::PeerClosed) => {
            warn!(peer_pid, "peer closed before sending a request");
            return;
        }
        Err(e) => {
            error!(peer_pid, error = %e, "peek failed");
            return;
        }
    };

    let datagram = match tokio::task::block_in_place(|| conn.read_exact(length)) {
        Ok(buf) => buf,
        Err(e) => {
            error!(peer_pid, error = %e, "read failed");
            return;
        }
    };

    match handler.handle(peer_pid, &datagram).await {
        Some(reply) => {
            if let Err(e) = tokio::task::block_in_place(|| conn.write_all(&reply)) {
                warn!(peer_pid, error = %e, "write reply failed");
            }
        }
        None => {
            // "Fail" per spec.md §4.5: close the connection with no
            // reply. Dropping `conn` here does that.
        }
    }
}
