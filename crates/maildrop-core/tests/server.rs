//! End-to-end POP3 sessions over TCP against the in-memory store

use maildrop_common::config::Pop3Config;
use maildrop_core::Pop3Server;
use maildrop_storage::MemoryMaildropStore;
use pretty_assertions::assert_eq;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

const MESSAGE: &str = "From: alice@example.com\nSubject: hello\n\nfirst line\n.\nlast line\n";

struct Client {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl Client {
    async fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.unwrap();
        let (reader, writer) = stream.into_split();
        Self {
            reader: BufReader::new(reader),
            writer,
        }
    }

    async fn read_line(&mut self) -> String {
        let mut line = String::new();
        self.reader.read_line(&mut line).await.unwrap();
        line
    }

    /// Read lines up to and including one starting with `terminator`
    async fn read_until(&mut self, terminator: &str) -> String {
        let mut response = String::new();
        loop {
            let line = self.read_line().await;
            assert!(!line.is_empty(), "connection closed mid-response");
            response.push_str(&line);
            if line.starts_with(terminator) && !line.starts_with("..") {
                return response;
            }
        }
    }

    async fn send_raw(&mut self, bytes: &[u8]) {
        self.writer.write_all(bytes).await.unwrap();
    }

    async fn send(&mut self, request: &str) {
        self.writer
            .write_all(format!("{}\r\n", request).as_bytes())
            .await
            .unwrap();
    }

    async fn command(&mut self, request: &str) -> String {
        self.send(request).await;
        self.read_line().await
    }
}

async fn start(timeout_secs: u64) -> (Arc<MemoryMaildropStore>, SocketAddr) {
    let (store, addr, _server, _task) = start_server(timeout_secs).await;
    (store, addr)
}

async fn start_server(
    timeout_secs: u64,
) -> (
    Arc<MemoryMaildropStore>,
    SocketAddr,
    Arc<Pop3Server>,
    JoinHandle<anyhow::Result<()>>,
) {
    let store = Arc::new(MemoryMaildropStore::new());
    store.add_mailbox("alice", "secret").await;
    store.insert_message("alice", 7, "uid-7", MESSAGE).await.unwrap();
    store
        .insert_message("alice", 9, "uid-9", "Subject: second\n\nbody\n")
        .await
        .unwrap();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let config = Pop3Config {
        bind: addr.to_string(),
        timeout_secs,
        max_connections: 4,
    };
    let server = Arc::new(Pop3Server::new(config, "mail.example.com", store.clone()));
    let task = tokio::spawn(server.clone().serve(listener));

    (store, addr, server, task)
}

async fn wait_unlocked(store: &MemoryMaildropStore, name: &str) {
    for _ in 0..100 {
        if !store.is_locked(name).await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("mailbox {} still locked", name);
}

#[tokio::test]
async fn test_full_session() {
    let (store, addr) = start(30).await;
    let mut client = Client::connect(addr).await;

    assert_eq!(
        client.read_line().await,
        "+OK mail.example.com POP3 server ready\r\n"
    );
    assert_eq!(
        client.command("USER alice").await,
        "+OK alice is a valid mailbox USER alice\r\n"
    );
    assert_eq!(
        client.command("PASS secret").await,
        "+OK maildrop locked and ready PASS secret\r\n"
    );
    assert!(store.is_locked("alice").await);

    let total = MESSAGE.len() + "Subject: second\n\nbody\n".len();
    assert_eq!(client.command("STAT").await, format!("+OK 2 {}\r\n", total));

    client.send("UIDL").await;
    assert_eq!(
        client.read_until(".").await,
        "+OK\r\n1 uid-7\r\n2 uid-9\r\n.\r\n"
    );

    client.send("RETR 1").await;
    assert_eq!(
        client.read_until(".").await,
        "+OK\r\nFrom: alice@example.com\r\nSubject: hello\r\n\r\nfirst line\r\n..\r\nlast line\r\n. RETR 1\r\n"
    );

    assert_eq!(
        client.command("DELE 1").await,
        "+OK message 1 deleted DELE 1\r\n"
    );
    assert_eq!(
        client.command("QUIT").await,
        "+OK 1 messages removed, POP3 server signing off (1 messages left) QUIT\r\n"
    );

    // Server closes the connection after QUIT
    assert_eq!(client.read_line().await, "");
    assert!(!store.contains(7).await);
    assert!(store.contains(9).await);
    assert!(!store.is_locked("alice").await);
}

#[tokio::test]
async fn test_quit_before_login() {
    let (store, addr) = start(30).await;
    let mut client = Client::connect(addr).await;
    client.read_line().await;

    assert_eq!(
        client.command("STAT").await,
        "-ERR command STAT invalid in AUTHORIZATION state\r\n"
    );
    assert_eq!(
        client.command("QUIT").await,
        "+OK POP3 server signing off QUIT\r\n"
    );
    assert_eq!(client.read_line().await, "");
    assert_eq!(store.calls().close_session, 1);
    assert_eq!(store.calls().release_lock, 0);
}

#[tokio::test]
async fn test_second_session_sees_lock() {
    let (_store, addr) = start(30).await;
    let mut first = Client::connect(addr).await;
    first.read_line().await;
    first.command("USER alice").await;
    first.command("PASS secret").await;

    let mut second = Client::connect(addr).await;
    second.read_line().await;
    assert_eq!(
        second.command("USER alice").await,
        "-ERR mailbox alice currently locked USER alice\r\n"
    );
}

#[tokio::test]
async fn test_disconnect_releases_lock_without_deleting() {
    let (store, addr) = start(30).await;
    let mut client = Client::connect(addr).await;
    client.read_line().await;
    client.command("USER alice").await;
    client.command("PASS secret").await;
    client.command("DELE 1").await;
    drop(client);

    wait_unlocked(&store, "alice").await;
    assert!(store.contains(7).await);
    assert_eq!(store.calls().delete_many, 0);
}

#[tokio::test]
async fn test_idle_timeout_closes_session() {
    let (store, addr) = start(1).await;
    let mut client = Client::connect(addr).await;
    client.read_line().await;
    client.command("USER alice").await;
    client.command("PASS secret").await;
    client.command("DELE 2").await;

    // No reply is written on timeout; the connection just closes.
    let closed = tokio::time::timeout(Duration::from_secs(5), client.read_line())
        .await
        .unwrap();
    assert_eq!(closed, "");

    wait_unlocked(&store, "alice").await;
    assert!(store.contains(9).await);
}

#[tokio::test]
async fn test_invalid_utf8_line_is_rejected_not_fatal() {
    let (store, addr) = start(30).await;
    let mut client = Client::connect(addr).await;
    client.read_line().await;
    client.command("USER alice").await;
    client.command("PASS secret").await;
    client.command("DELE 1").await;

    client.send_raw(b"NOOP \xff\r\n").await;
    assert_eq!(
        client.read_line().await,
        "-ERR excessive number of arguments NOOP \u{fffd}\r\n"
    );

    client.send_raw(b"\xffQUIT\r\n").await;
    assert_eq!(
        client.read_line().await,
        "-ERR command \u{fffd}QUIT invalid in TRANSACTION state \u{fffd}QUIT\r\n"
    );

    assert_eq!(
        client.command("QUIT").await,
        "+OK 1 messages removed, POP3 server signing off (1 messages left) QUIT\r\n"
    );
    assert!(!store.contains(7).await);
    assert!(!store.is_locked("alice").await);
}

#[tokio::test]
async fn test_shutdown_closes_open_sessions() {
    let (store, addr, server, task) = start_server(30).await;
    let mut client = Client::connect(addr).await;
    client.read_line().await;
    client.command("USER alice").await;
    client.command("PASS secret").await;
    client.command("DELE 1").await;
    assert!(store.is_locked("alice").await);

    server.shutdown();
    tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .unwrap()
        .unwrap()
        .unwrap();

    // Closed like a timeout: lock released, marks discarded, no reply
    assert!(!store.is_locked("alice").await);
    assert!(store.contains(7).await);
    assert_eq!(store.calls().delete_many, 0);
    assert_eq!(store.calls().close_session, 1);
    assert_eq!(client.read_line().await, "");
}
