//! Per-connection session handling.
//!
//! A connection goes through [`handshake`] (introduce, roster, initial
//! sync) and is then served by [`serve_user`] until the peer leaves, breaks
//! the protocol or the relay shuts down.

use crate::error::{ProtocolError, ProtocolResult, StorageError, StorageResult};
use crate::registry::{SharedFile, UserRecord};
use crate::server::SyncRelay;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use sync_types::frame::{read_request, read_string, write_reply, write_string};
use sync_types::path::{prefixed_wire_path, resolve_wire_path, to_wire_path};
use sync_types::transfer::{collect_files, receive_files, send_files};
use sync_types::{FileEntry, OutgoingFile, Reply, Request};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::time::{Instant, Sleep};

/// Byte stream a session runs on.
pub trait RelayStream: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> RelayStream for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

/// Run the introduce sequence and register the user.
///
/// 1. read the username; taken or invalid names get `NameTaken`;
/// 2. register it atomically;
/// 3. create the user directory and send `Welcome`;
/// 4. answer the `ListUsers` request with the roster;
/// 5. answer the `PollFiles` request with the user's own files.
///
/// Steps 1 to 4 are bounded by `hello_timeout_secs`. The file stream of step
/// 5 may take as long as it needs, but fails if the peer accepts no bytes for
/// `hello_timeout_secs`. Any failure after step 2 removes exactly the record
/// it created.
pub async fn handshake<S: RelayStream>(
    relay: &SyncRelay,
    stream: &mut S,
) -> ProtocolResult<Arc<UserRecord>> {
    let timeout_secs = relay.config().server.hello_timeout_secs;
    let deadline = Instant::now() + relay.config().server.hello_timeout();

    let name = tokio::time::timeout_at(deadline, read_string(stream))
        .await
        .map_err(|_| ProtocolError::HandshakeTimeout(timeout_secs))??;

    let user = match relay.registry().register(&name) {
        Ok(user) => user,
        Err(e) => {
            write_reply(stream, Reply::NameTaken).await?;
            stream.flush().await?;
            return Err(e);
        }
    };

    let result = match tokio::time::timeout_at(deadline, welcome(relay, stream, &user)).await {
        Ok(Ok(())) => initial_sync(relay, stream, &user).await,
        Ok(Err(e)) => Err(e),
        Err(_) => Err(ProtocolError::HandshakeTimeout(timeout_secs)),
    };

    match result {
        Ok(()) => Ok(user),
        Err(e) => {
            relay.registry().remove(&user);
            relay.registry().publish_tree().await;
            Err(e)
        }
    }
}

async fn welcome<S: RelayStream>(
    relay: &SyncRelay,
    stream: &mut S,
    user: &UserRecord,
) -> ProtocolResult<()> {
    tokio::fs::create_dir_all(user.dir())
        .await
        .map_err(StorageError::from)?;
    write_reply(stream, Reply::Welcome).await?;
    stream.flush().await?;
    tracing::info!("New user {} connected!", user.name());
    relay.registry().publish_tree().await;

    expect_request(stream, Request::ListUsers).await?;
    send_roster(relay, stream).await?;

    expect_request(stream, Request::PollFiles).await
}

async fn initial_sync<S: RelayStream>(
    relay: &SyncRelay,
    stream: &mut S,
    user: &UserRecord,
) -> ProtocolResult<()> {
    let dir = user.dir().to_path_buf();
    let files = tokio::task::spawn_blocking(move || collect_files(&dir, &dir))
        .await
        .map_err(|e| StorageError::Io(std::io::Error::other(e)))??;

    let mut writer = IdleWriter::new(stream, relay.config().server.hello_timeout());
    write_reply(&mut writer, Reply::FilesFollow).await?;
    let bytes = send_files(&mut writer, &files).await?;
    relay.metrics().record_sent(files.len(), bytes);
    tracing::info!("Successfully synced files with user {}.", user.name());
    Ok(())
}

/// Write half that fails once no bytes have been accepted for `idle`.
struct IdleWriter<'a, S> {
    inner: &'a mut S,
    idle: Duration,
    timer: Pin<Box<Sleep>>,
}

impl<'a, S> IdleWriter<'a, S> {
    fn new(inner: &'a mut S, idle: Duration) -> Self {
        Self {
            inner,
            idle,
            timer: Box::pin(tokio::time::sleep(idle)),
        }
    }

    fn check_stall(&mut self, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.timer.as_mut().poll(cx) {
            Poll::Ready(()) => Poll::Ready(Err(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                format!("peer accepted no data for {:?}", self.idle),
            ))),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for IdleWriter<'_, S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        let this = self.get_mut();
        match Pin::new(&mut *this.inner).poll_write(cx, buf) {
            Poll::Ready(Ok(n)) => {
                if n > 0 {
                    let next = Instant::now() + this.idle;
                    this.timer.as_mut().reset(next);
                }
                Poll::Ready(Ok(n))
            }
            Poll::Ready(Err(e)) => Poll::Ready(Err(e)),
            Poll::Pending => this.check_stall(cx).map(|r| r.map(|()| 0)),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        let this = self.get_mut();
        match Pin::new(&mut *this.inner).poll_flush(cx) {
            Poll::Pending => this.check_stall(cx),
            ready => ready,
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut *self.get_mut().inner).poll_shutdown(cx)
    }
}

async fn expect_request<S: RelayStream>(stream: &mut S, expected: Request) -> ProtocolResult<()> {
    let actual = read_request(stream).await?;
    if actual != expected {
        return Err(ProtocolError::UnexpectedRequest { expected, actual });
    }
    Ok(())
}

/// Serve requests for `user` until the peer leaves, an error occurs or the
/// user's token is cancelled. Always removes the user afterwards.
pub async fn serve_user<S: RelayStream>(relay: Arc<SyncRelay>, mut stream: S, user: Arc<UserRecord>) {
    let cancel = user.cancel_token().clone();

    let result: ProtocolResult<()> = loop {
        let request = tokio::select! {
            _ = cancel.cancelled() => break Ok(()),
            request = read_request(&mut stream) => request,
        };
        let request = match request {
            Ok(request) => request,
            Err(e) => break Err(e.into()),
        };
        tracing::debug!("Request from {}: {:?}", user.name(), request);

        tokio::select! {
            _ = cancel.cancelled() => break Ok(()),
            handled = dispatch(&relay, &mut stream, &user, request) => {
                if let Err(e) = handled {
                    break Err(e);
                }
            }
        }
    };

    match result {
        Ok(()) => tracing::debug!("Worker for {} cancelled", user.name()),
        Err(e) if e.is_disconnect() => tracing::debug!("{} closed the connection", user.name()),
        Err(e) => {
            relay.metrics().errors_total.fetch_add(1, Ordering::Relaxed);
            tracing::error!(
                "Error, couldn't establish a connection with user {}: {}",
                user.name(),
                e
            );
        }
    }

    tracing::info!("Disconnecting user {}...", user.name());
    relay.registry().remove(&user);
    let _ = stream.shutdown().await;
    tracing::info!("User {} disconnected.", user.name());
    relay.registry().publish_tree().await;
}

async fn dispatch<S: RelayStream>(
    relay: &SyncRelay,
    stream: &mut S,
    user: &UserRecord,
    request: Request,
) -> ProtocolResult<()> {
    match request {
        Request::ListUsers => send_roster(relay, stream).await,
        Request::PushFiles => handle_push(relay, stream, user).await,
        Request::DeleteFile => handle_delete(relay, stream, user).await,
        Request::PollFiles => handle_poll(relay, stream, user).await,
        Request::RegisterShare => handle_share(relay, stream, user).await,
    }
}

async fn send_roster<S: RelayStream>(relay: &SyncRelay, stream: &mut S) -> ProtocolResult<()> {
    write_string(stream, &relay.registry().roster()).await?;
    stream.flush().await?;
    Ok(())
}

async fn handle_push<S: RelayStream>(
    relay: &SyncRelay,
    stream: &mut S,
    user: &UserRecord,
) -> ProtocolResult<()> {
    write_reply(stream, Reply::PushAck).await?;
    stream.flush().await?;

    let received = receive_files(stream, user.dir()).await?;
    let bytes: u64 = received.iter().map(|f| f.len).sum();
    relay.metrics().record_received(received.len(), bytes);
    tracing::info!(
        "Received {} files ({} bytes) from user {}",
        received.len(),
        bytes,
        user.name()
    );

    relay.registry().publish_tree().await;
    Ok(())
}

async fn handle_delete<S: RelayStream>(
    relay: &SyncRelay,
    stream: &mut S,
    user: &UserRecord,
) -> ProtocolResult<()> {
    write_reply(stream, Reply::DeleteAck).await?;
    stream.flush().await?;

    let wire = read_string(stream).await?;
    let target = resolve_wire_path(user.dir(), &wire)?;
    if remove_path(&target).await.map_err(StorageError::from)? {
        tracing::info!("Deleted {} for user {}", wire, user.name());
    } else {
        tracing::debug!("Delete of missing {} for user {}", wire, user.name());
    }

    relay.registry().publish_tree().await;
    Ok(())
}

/// Remove a file or directory tree. A missing target is not an error.
async fn remove_path(target: &Path) -> std::io::Result<bool> {
    let removed = match tokio::fs::symlink_metadata(target).await {
        Ok(meta) if meta.is_dir() => tokio::fs::remove_dir_all(target).await,
        Ok(_) => tokio::fs::remove_file(target).await,
        Err(e) => Err(e),
    };
    match removed {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

async fn handle_poll<S: RelayStream>(
    relay: &SyncRelay,
    stream: &mut S,
    user: &UserRecord,
) -> ProtocolResult<()> {
    let drained = user.drain_shares().await;

    let mut outgoing = Vec::with_capacity(drained.len());
    for share in drained {
        match tokio::fs::metadata(&share.source).await {
            Ok(meta) if meta.is_file() => outgoing.push(OutgoingFile {
                entry: FileEntry {
                    path: share.wire_path,
                    len: meta.len(),
                },
                source: share.source,
            }),
            _ => tracing::warn!(
                "Shared file {} from {} no longer exists, dropped",
                share.wire_path,
                share.sharer
            ),
        }
    }

    if outgoing.is_empty() {
        write_reply(stream, Reply::NothingPending).await?;
        stream.flush().await?;
        return Ok(());
    }

    write_reply(stream, Reply::FilesFollow).await?;
    let bytes = send_files(stream, &outgoing).await?;
    relay.metrics().record_sent(outgoing.len(), bytes);
    tracing::info!(
        "Delivered {} shared files to user {}",
        outgoing.len(),
        user.name()
    );
    Ok(())
}

async fn handle_share<S: RelayStream>(
    relay: &SyncRelay,
    stream: &mut S,
    user: &UserRecord,
) -> ProtocolResult<()> {
    write_reply(stream, Reply::ShareAck).await?;
    stream.flush().await?;

    let file = read_string(stream).await?;
    let target = read_string(stream).await?;

    match register_share(relay, user, &file, &target).await {
        Ok(()) => {
            relay.metrics().shares_registered.fetch_add(1, Ordering::Relaxed);
            tracing::info!(
                "User {} shared file {} with user {}",
                user.name(),
                file,
                target
            );
        }
        Err(e) => tracing::warn!(
            "Error, user {} would like to share file {} with user {}: {}",
            user.name(),
            file,
            target,
            e
        ),
    }
    Ok(())
}

async fn register_share(
    relay: &SyncRelay,
    user: &UserRecord,
    file: &str,
    target: &str,
) -> StorageResult<()> {
    if !relay.registry().contains(target) {
        return Err(StorageError::UnknownUser(target.to_string()));
    }

    let dir = user.dir().to_path_buf();
    let requested = file.to_string();
    let (source, relative) =
        tokio::task::spawn_blocking(move || locate_shared_file(&dir, &requested))
            .await
            .map_err(|e| StorageError::Io(std::io::Error::other(e)))?
            .ok_or_else(|| StorageError::NotFound {
                username: user.name().to_string(),
                path: file.to_string(),
            })?;

    let share = SharedFile {
        sharer: user.name().to_string(),
        source,
        wire_path: prefixed_wire_path(user.name(), &relative),
    };
    relay.registry().enqueue_share(target, share).await
}

/// Find `requested` under `dir`: an exact relative path first, otherwise the
/// first file (in sorted walk order) with that name.
fn locate_shared_file(dir: &Path, requested: &str) -> Option<(PathBuf, String)> {
    if let Ok(exact) = resolve_wire_path(dir, requested) {
        if exact.is_file() {
            let relative = to_wire_path(dir, &exact).ok()?;
            return Some((exact, relative));
        }
    }

    walkdir::WalkDir::new(dir)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .find(|entry| entry.file_name() == std::ffi::OsStr::new(requested))
        .and_then(|entry| {
            let relative = to_wire_path(dir, entry.path()).ok()?;
            Some((entry.into_path(), relative))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use std::time::Duration;
    use sync_types::frame::{read_count, read_introduce_reply, read_len, read_reply, write_request};
    use tokio::io::{AsyncReadExt, DuplexStream};

    fn relay() -> (tempfile::TempDir, Arc<SyncRelay>) {
        let dir = tempfile::tempdir().unwrap();
        let relay = SyncRelay::new(Config::for_root(dir.path()));
        (dir, relay)
    }

    fn write(root: &Path, rel: &str, body: &[u8]) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, body).unwrap();
    }

    /// Log `name` in over a duplex pair and return the client half plus the
    /// files of the initial sync.
    async fn login(relay: &Arc<SyncRelay>, name: &str, landing: &Path) -> (DuplexStream, Vec<FileEntry>) {
        let (mut client, server) = tokio::io::duplex(64 * 1024);
        let relay = relay.clone();
        tokio::spawn(async move { relay.admit(server, "test".into()).await });

        write_string(&mut client, name).await.unwrap();
        assert_eq!(
            read_introduce_reply(&mut client).await.unwrap(),
            Ok(Reply::Welcome)
        );
        write_request(&mut client, Request::ListUsers).await.unwrap();
        read_string(&mut client).await.unwrap();
        write_request(&mut client, Request::PollFiles).await.unwrap();
        assert_eq!(read_reply(&mut client).await.unwrap(), Reply::FilesFollow);
        let files = receive_files(&mut client, landing).await.unwrap();
        (client, files)
    }

    // ===== Handshake Tests =====

    #[tokio::test]
    async fn handshake_sends_own_files() {
        let (dir, relay) = relay();
        write(dir.path(), "alice/notes.txt", b"hello");
        write(dir.path(), "alice/docs/plan.md", b"plan");
        let landing = tempfile::tempdir().unwrap();

        let (_client, files) = login(&relay, "alice", landing.path()).await;

        let paths: Vec<_> = files.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, vec!["docs/plan.md", "notes.txt"]);
        assert_eq!(
            std::fs::read(landing.path().join("notes.txt")).unwrap(),
            b"hello"
        );
        assert!(relay.registry().contains("alice"));
    }

    #[tokio::test]
    async fn new_user_gets_empty_directory() {
        let (dir, relay) = relay();
        let landing = tempfile::tempdir().unwrap();
        let (_client, files) = login(&relay, "newbie", landing.path()).await;
        assert!(files.is_empty());
        assert!(dir.path().join("newbie").is_dir());
    }

    #[tokio::test]
    async fn empty_name_rejected() {
        let (_dir, relay) = relay();
        let (mut client, mut server) = tokio::io::duplex(1024);
        let handshake = tokio::spawn({
            let relay = relay.clone();
            async move { handshake(&relay, &mut server).await }
        });

        write_string(&mut client, "").await.unwrap();
        assert_eq!(
            read_introduce_reply(&mut client).await.unwrap(),
            Ok(Reply::NameTaken)
        );
        assert!(matches!(
            handshake.await.unwrap(),
            Err(ProtocolError::EmptyUsername)
        ));
        assert!(relay.registry().is_empty());
    }

    #[tokio::test]
    async fn broken_sequence_removes_record() {
        let (_dir, relay) = relay();
        let (mut client, mut server) = tokio::io::duplex(1024);
        let handshake = tokio::spawn({
            let relay = relay.clone();
            async move { handshake(&relay, &mut server).await }
        });

        write_string(&mut client, "alice").await.unwrap();
        read_introduce_reply(&mut client).await.unwrap().unwrap();
        write_request(&mut client, Request::PushFiles).await.unwrap();

        assert!(matches!(
            handshake.await.unwrap(),
            Err(ProtocolError::UnexpectedRequest {
                expected: Request::ListUsers,
                actual: Request::PushFiles
            })
        ));
        assert!(relay.registry().is_empty());
    }

    #[tokio::test]
    async fn silent_peer_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::for_root(dir.path());
        config.server.hello_timeout_secs = 1;
        let relay = SyncRelay::new(config);
        let (mut client, mut server) = tokio::io::duplex(1024);

        write_string(&mut client, "alice").await.unwrap();
        let result = handshake(&relay, &mut server).await;
        assert!(matches!(result, Err(ProtocolError::HandshakeTimeout(1))));
        assert!(relay.registry().is_empty());
    }

    /// Log in over a small pipe and stop right before the initial file stream.
    async fn login_until_files(relay: &Arc<SyncRelay>, name: &str) -> DuplexStream {
        let (mut client, server) = tokio::io::duplex(8 * 1024);
        let relay = relay.clone();
        tokio::spawn(async move { relay.admit(server, "test".into()).await });

        write_string(&mut client, name).await.unwrap();
        read_introduce_reply(&mut client).await.unwrap().unwrap();
        write_request(&mut client, Request::ListUsers).await.unwrap();
        read_string(&mut client).await.unwrap();
        write_request(&mut client, Request::PollFiles).await.unwrap();
        client
    }

    #[tokio::test]
    async fn slow_initial_sync_outlives_hello_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::for_root(dir.path());
        config.server.hello_timeout_secs = 1;
        let relay = SyncRelay::new(config);
        let body: Vec<u8> = (0..256 * 1024u32).map(|i| (i % 241) as u8).collect();
        write(dir.path(), "alice/big.bin", &body);

        let mut client = login_until_files(&relay, "alice").await;
        assert_eq!(read_reply(&mut client).await.unwrap(), Reply::FilesFollow);
        assert_eq!(read_count(&mut client).await.unwrap(), 1);
        assert_eq!(read_len(&mut client).await.unwrap(), body.len() as u64);
        assert_eq!(read_string(&mut client).await.unwrap(), "big.bin");

        // Drain at roughly 128 KiB/s so the stream takes about two seconds
        let started = std::time::Instant::now();
        let mut received = Vec::with_capacity(body.len());
        let mut chunk = vec![0u8; 8 * 1024];
        while received.len() < body.len() {
            let want = chunk.len().min(body.len() - received.len());
            let n = client.read(&mut chunk[..want]).await.unwrap();
            assert!(n > 0, "stream cut after {} bytes", received.len());
            received.extend_from_slice(&chunk[..n]);
            tokio::time::sleep(Duration::from_millis(60)).await;
        }
        assert!(started.elapsed() > Duration::from_secs(1));
        assert_eq!(received, body);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(relay.registry().contains("alice"));
        write_request(&mut client, Request::ListUsers).await.unwrap();
        assert_eq!(read_string(&mut client).await.unwrap(), "alice");
    }

    #[tokio::test]
    async fn stalled_initial_sync_is_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::for_root(dir.path());
        config.server.hello_timeout_secs = 1;
        let relay = SyncRelay::new(config);
        write(dir.path(), "alice/big.bin", &vec![1u8; 256 * 1024]);

        // Never read the file stream
        let _client = login_until_files(&relay, "alice").await;

        for _ in 0..60 {
            if relay.metrics().handshakes_rejected.load(Ordering::Relaxed) == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert_eq!(relay.metrics().handshakes_rejected.load(Ordering::Relaxed), 1);
        assert!(!relay.registry().contains("alice"));
    }

    // ===== Request Loop Tests =====

    #[tokio::test]
    async fn push_then_delete() {
        let (dir, relay) = relay();
        let landing = tempfile::tempdir().unwrap();
        let (mut client, _) = login(&relay, "alice", landing.path()).await;

        let src = tempfile::tempdir().unwrap();
        write(src.path(), "photos/cat.jpg", b"meow");
        let files = collect_files(src.path(), src.path()).unwrap();
        write_request(&mut client, Request::PushFiles).await.unwrap();
        assert_eq!(read_reply(&mut client).await.unwrap(), Reply::PushAck);
        send_files(&mut client, &files).await.unwrap();

        write_request(&mut client, Request::ListUsers).await.unwrap();
        assert_eq!(read_string(&mut client).await.unwrap(), "alice");
        assert_eq!(
            std::fs::read(dir.path().join("alice/photos/cat.jpg")).unwrap(),
            b"meow"
        );

        write_request(&mut client, Request::DeleteFile).await.unwrap();
        assert_eq!(read_reply(&mut client).await.unwrap(), Reply::DeleteAck);
        write_string(&mut client, "photos").await.unwrap();
        write_request(&mut client, Request::ListUsers).await.unwrap();
        read_string(&mut client).await.unwrap();
        assert!(!dir.path().join("alice/photos").exists());

        // Missing target is fine
        write_request(&mut client, Request::DeleteFile).await.unwrap();
        read_reply(&mut client).await.unwrap();
        write_string(&mut client, "photos/never.txt").await.unwrap();
        write_request(&mut client, Request::ListUsers).await.unwrap();
        assert_eq!(read_string(&mut client).await.unwrap(), "alice");
    }

    #[tokio::test]
    async fn share_reaches_target_once() {
        let (dir, relay) = relay();
        write(dir.path(), "alice/reports/q3.pdf", b"%PDF-q3");
        let landing_a = tempfile::tempdir().unwrap();
        let landing_b = tempfile::tempdir().unwrap();
        let (mut alice, _) = login(&relay, "alice", landing_a.path()).await;
        let (mut bob, _) = login(&relay, "bob", landing_b.path()).await;

        write_request(&mut alice, Request::RegisterShare).await.unwrap();
        assert_eq!(read_reply(&mut alice).await.unwrap(), Reply::ShareAck);
        write_string(&mut alice, "q3.pdf").await.unwrap();
        write_string(&mut alice, "bob").await.unwrap();
        write_request(&mut alice, Request::ListUsers).await.unwrap();
        assert_eq!(read_string(&mut alice).await.unwrap(), "alice,bob");

        write_request(&mut bob, Request::PollFiles).await.unwrap();
        assert_eq!(read_reply(&mut bob).await.unwrap(), Reply::FilesFollow);
        let files = receive_files(&mut bob, landing_b.path()).await.unwrap();
        assert_eq!(files[0].path, "alice/reports/q3.pdf");
        assert_eq!(
            std::fs::read(landing_b.path().join("alice/reports/q3.pdf")).unwrap(),
            b"%PDF-q3"
        );

        write_request(&mut bob, Request::PollFiles).await.unwrap();
        assert_eq!(read_reply(&mut bob).await.unwrap(), Reply::NothingPending);
    }

    #[tokio::test]
    async fn share_with_unknown_target_is_dropped() {
        let (dir, relay) = relay();
        write(dir.path(), "alice/a.txt", b"a");
        let landing = tempfile::tempdir().unwrap();
        let (mut alice, _) = login(&relay, "alice", landing.path()).await;

        write_request(&mut alice, Request::RegisterShare).await.unwrap();
        read_reply(&mut alice).await.unwrap();
        write_string(&mut alice, "a.txt").await.unwrap();
        write_string(&mut alice, "ghost").await.unwrap();

        // Session survives
        write_request(&mut alice, Request::ListUsers).await.unwrap();
        assert_eq!(read_string(&mut alice).await.unwrap(), "alice");
        assert_eq!(relay.metrics().shares_registered.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn unknown_code_ends_only_that_session() {
        let (_dir, relay) = relay();
        let landing = tempfile::tempdir().unwrap();
        let (mut alice, _) = login(&relay, "alice", landing.path()).await;
        let (mut bob, _) = login(&relay, "bob", landing.path()).await;

        alice.write_i32(99).await.unwrap();
        let mut buf = [0u8; 1];
        assert_eq!(
            tokio::io::AsyncReadExt::read(&mut alice, &mut buf).await.unwrap(),
            0
        );

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!relay.registry().contains("alice"));
        write_request(&mut bob, Request::ListUsers).await.unwrap();
        assert_eq!(read_string(&mut bob).await.unwrap(), "bob");
        assert_eq!(relay.metrics().errors_total.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn traversal_delete_is_fatal() {
        let (dir, relay) = relay();
        write(dir.path(), "keep.txt", b"keep");
        let landing = tempfile::tempdir().unwrap();
        let (mut alice, _) = login(&relay, "alice", landing.path()).await;

        write_request(&mut alice, Request::DeleteFile).await.unwrap();
        read_reply(&mut alice).await.unwrap();
        write_string(&mut alice, "../keep.txt").await.unwrap();

        let mut buf = [0u8; 1];
        assert_eq!(
            tokio::io::AsyncReadExt::read(&mut alice, &mut buf).await.unwrap(),
            0
        );
        assert!(dir.path().join("keep.txt").exists());
    }

    #[tokio::test]
    async fn vanished_share_sends_nothing_pending() {
        let (dir, relay) = relay();
        write(dir.path(), "alice/tmp.txt", b"t");
        let landing = tempfile::tempdir().unwrap();
        let (mut alice, _) = login(&relay, "alice", landing.path()).await;
        let (mut bob, _) = login(&relay, "bob", landing.path()).await;

        write_request(&mut alice, Request::RegisterShare).await.unwrap();
        read_reply(&mut alice).await.unwrap();
        write_string(&mut alice, "tmp.txt").await.unwrap();
        write_string(&mut alice, "bob").await.unwrap();
        write_request(&mut alice, Request::ListUsers).await.unwrap();
        read_string(&mut alice).await.unwrap();

        std::fs::remove_file(dir.path().join("alice/tmp.txt")).unwrap();
        write_request(&mut bob, Request::PollFiles).await.unwrap();
        assert_eq!(read_reply(&mut bob).await.unwrap(), Reply::NothingPending);
    }

    // ===== Lookup Tests =====

    #[test]
    fn locate_prefers_exact_path() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a/report.pdf", b"1");
        write(dir.path(), "b/report.pdf", b"2");

        let (path, rel) = locate_shared_file(dir.path(), "b/report.pdf").unwrap();
        assert_eq!(rel, "b/report.pdf");
        assert_eq!(std::fs::read(path).unwrap(), b"2");

        let (_, rel) = locate_shared_file(dir.path(), "report.pdf").unwrap();
        assert_eq!(rel, "a/report.pdf");

        assert!(locate_shared_file(dir.path(), "missing.pdf").is_none());
    }
}
