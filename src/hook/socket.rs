//! Raw `SOCK_SEQPACKET` transport for the hook protocol.
//!
//! std's and tokio's Unix socket types don't expose `SOCK_SEQPACKET`, so
//! the listener, peer-credential retrieval, and peek-length technique are
//! built directly on `nix::sys::socket`. Ported from
//! `pkg/server/server.go`'s `ListenAndServe`/`AcceptUnix`/`GetsockoptUcred`
//! and `pkg/clienthandler/clienthandler.go`'s cgo `readpeek` helper
//! (`MSG_PEEK|MSG_TRUNC` on a 1-byte buffer yields the full datagram size).

use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::path::Path;
use std::time::Duration;

use nix::errno::Errno;
use nix::sys::socket::{
    accept, bind, getsockopt, listen, recv, send, setsockopt, socket, sockopt, AddressFamily,
    Backlog, MsgFlags, SockFlag, SockType, UnixAddr,
};
use nix::sys::stat::Mode;
use nix::sys::time::TimeVal;
use thiserror::Error;

/// Receive and send timeout applied per `spec.md` §4.4, matching the
/// original's `io_timeout` constant.
pub const IO_TIMEOUT: Duration = Duration::from_secs(10);

const LISTEN_BACKLOG: i32 = 64;

#[derive(Debug, Error)]
pub enum SocketError {
    #[error("socket setup failed: {0}")]
    Setup(#[source] Errno),
    #[error("accept failed: {0}")]
    Accept(#[source] Errno),
    #[error("socket option failed: {0}")]
    SockOpt(#[source] Errno),
    #[error("send/recv failed: {0}")]
    Io(#[source] Errno),
}

/// Outcome of the peek-length step (`spec.md` §4.4 step 2).
pub enum PeekOutcome {
    Length(usize),
    Timeout,
    PeerClosed,
}

pub struct HookListener {
    fd: OwnedFd,
}

pub struct HookConn {
    fd: OwnedFd,
    pub peer_pid: i32,
    pub peer_uid: u32,
    pub peer_gid: u32,
}

fn timeval_of(d: Duration) -> TimeVal {
    TimeVal::new(d.as_secs() as i64, d.subsec_micros() as i64)
}

impl HookListener {
    /// Remove any stale socket file, bind with umask 0077 (owner-only
    /// permissions, restored afterward), and start listening.
    pub fn bind(path: &Path) -> Result<Self, SocketError> {
        let _ = std::fs::remove_file(path);
        let addr = UnixAddr::new(path).map_err(SocketError::Setup)?;

        let fd = socket(AddressFamily::Unix, SockType::SeqPacket, SockFlag::empty(), None)
            .map_err(SocketError::Setup)?;

        let old_mask = nix::sys::stat::umask(Mode::from_bits_truncate(0o077));
        let bind_result = bind(fd.as_raw_fd(), &addr);
        nix::sys::stat::umask(old_mask);
        bind_result.map_err(SocketError::Setup)?;

        listen(&fd, Backlog::new(LISTEN_BACKLOG).expect("64 is a valid backlog")).map_err(SocketError::Setup)?;

        Ok(Self { fd })
    }

    pub fn raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }

    /// Accept one connection, extracting peer credentials immediately
    /// (used for logging and cgroup resolution; no authorization decision
    /// beyond the filesystem permissions on the socket itself).
    pub fn accept(&self) -> Result<HookConn, SocketError> {
        accept_on(self.fd.as_raw_fd())
    }

    /// Release the listening descriptor without closing it, handing
    /// sole ownership to the caller. Used by the server's dedicated
    /// accept thread, which needs a plain `RawFd` it can race a
    /// shutdown-triggered `close(2)` against — something `OwnedFd`'s
    /// single-owner model can't express directly.
    pub fn into_raw_fd(self) -> RawFd {
        let raw = self.fd.as_raw_fd();
        std::mem::forget(self.fd);
        raw
    }
}

/// Accept one connection off a listening descriptor, by raw fd. Shared by
/// `HookListener::accept` and the server's dedicated accept thread (which
/// only ever holds a `RawFd`, not an `OwnedFd`, once shutdown-close needs
/// to race it).
pub fn accept_on(listen_fd: RawFd) -> Result<HookConn, SocketError> {
    let raw = accept(listen_fd).map_err(SocketError::Accept)?;
    // SAFETY: `accept` on success returns a freshly owned descriptor.
    let fd = unsafe { OwnedFd::from_raw_fd(raw) };

    let creds = getsockopt(&fd, sockopt::PeerCredentials).map_err(SocketError::SockOpt)?;
    Ok(HookConn {
        fd,
        peer_pid: creds.pid(),
        peer_uid: creds.uid(),
        peer_gid: creds.gid(),
    })
}

impl HookConn {
    pub fn peer_pid(&self) -> i32 {
        self.peer_pid
    }

    /// Peek the incoming datagram's length without consuming it.
    pub fn peek_length(&self) -> Result<PeekOutcome, SocketError> {
        setsockopt(&self.fd, sockopt::ReceiveTimeout, &timeval_of(IO_TIMEOUT))
            .map_err(SocketError::SockOpt)?;

        let mut probe = [0u8; 1];
        match recv(self.fd.as_raw_fd(), &mut probe, MsgFlags::MSG_PEEK | MsgFlags::MSG_TRUNC) {
            Ok(0) => Ok(PeekOutcome::PeerClosed),
            Ok(n) => Ok(PeekOutcome::Length(n)),
            Err(Errno::EWOULDBLOCK) => Ok(PeekOutcome::Timeout),
            Err(e) => Err(SocketError::Io(e)),
        }
    }

    /// Read exactly `length` bytes — the datagram sized by `peek_length`.
    pub fn read_exact(&self, length: usize) -> Result<Vec<u8>, SocketError> {
        let mut buf = vec![0u8; length];
        let n = recv(self.fd.as_raw_fd(), &mut buf, MsgFlags::empty()).map_err(SocketError::Io)?;
        buf.truncate(n);
        Ok(buf)
    }

    /// Write the reply datagram under a 10-second send timeout.
    pub fn write_all(&self, data: &[u8]) -> Result<(), SocketError> {
        setsockopt(&self.fd, sockopt::SendTimeout, &timeval_of(IO_TIMEOUT)).map_err(SocketError::SockOpt)?;
        send(self.fd.as_raw_fd(), data, MsgFlags::empty()).map_err(SocketError::Io)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeval_of_converts_whole_seconds() {
        let tv = timeval_of(Duration::from_secs(10));
        assert_eq!(tv.tv_sec(), 10);
        assert_eq!(tv.tv_usec(), 0);
    }
}
