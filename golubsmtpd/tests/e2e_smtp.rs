//! End-to-end: a real TCP listener, full stack behind it, one SMTP
//! conversation through to a delivered maildir file.

use std::{net::IpAddr, sync::Arc, time::Duration, time::Instant};

use golubsmtpd::{AllowAllGate, ConnectionGate, Server};
use golubsmtpd_common::{
    aliases::AliasMap, auth::MemoryAuthenticator, config::Config, Signal,
};
use golubsmtpd_delivery::LogOnlyRelay;
use golubsmtpd_queue::{queue::QueueLimits, MessageQueue, Processor};
use golubsmtpd_smtp::{EmailValidator, RcptValidator, SessionContext};
use golubsmtpd_spool::Spool;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
    sync::broadcast,
};

struct Stack {
    _dir: tempfile::TempDir,
    config: Arc<Config>,
    queue: Arc<MessageQueue>,
    shutdown: broadcast::Sender<Signal>,
    address: std::net::SocketAddr,
}

async fn start_stack(tune: impl FnOnce(&mut Config)) -> Stack {
    let dir = tempfile::tempdir().unwrap();

    let mut config = Config::default();
    config.server.hostname = "mx.e2e.test".to_string();
    config.server.read_timeout_secs = 5;
    config.server.write_timeout_secs = 5;
    config.server.spool_dir = dir.path().join("spool").to_string_lossy().into_owned();
    config.server.virtual_domains = vec!["hosted.example".to_string()];
    config.delivery.virtual_users.base_dir_path =
        dir.path().join("vmail").to_string_lossy().into_owned();
    tune(&mut config);
    let config = Arc::new(config);

    let spool = Spool::new(&config.server.spool_dir);
    spool.init().unwrap();

    let authenticator =
        Arc::new(MemoryAuthenticator::default().with_user("carol@hosted.example", "secret"));
    let (shutdown, _) = broadcast::channel(8);

    let processor = Processor::new(
        Arc::clone(&config),
        spool.clone(),
        Arc::new(LogOnlyRelay),
        shutdown.clone(),
    );
    let queue = Arc::new(MessageQueue::new(
        QueueLimits::from(&config.queue),
        processor,
    ));
    queue.start_consumer();

    let validator = Arc::new(RcptValidator::new(
        Arc::clone(&config),
        authenticator.clone(),
        Arc::new(AliasMap::default()),
    ));

    let context = Arc::new(SessionContext {
        config: Arc::clone(&config),
        spool,
        queue: Arc::clone(&queue),
        validator,
        email: EmailValidator::new(Arc::clone(&config)),
        authenticator,
    });

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();

    let gate: Arc<dyn ConnectionGate> = Arc::new(AllowAllGate);
    let server = Arc::new(Server::new(context, gate, shutdown.clone()));
    tokio::spawn(Arc::clone(&server).serve(listener));

    Stack {
        _dir: dir,
        config,
        queue,
        shutdown,
        address,
    }
}

struct Client {
    stream: TcpStream,
    buffer: Vec<u8>,
}

impl Client {
    async fn connect(address: std::net::SocketAddr) -> Self {
        let stream = TcpStream::connect(address).await.unwrap();
        Self {
            stream,
            buffer: Vec::new(),
        }
    }

    async fn expect(&mut self, prefix: &str) -> String {
        loop {
            if let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
                let mut line: Vec<u8> = self.buffer.drain(..=pos).collect();
                line.pop();
                if line.last() == Some(&b'\r') {
                    line.pop();
                }
                let line = String::from_utf8(line).unwrap();
                assert!(
                    line.starts_with(prefix),
                    "expected {prefix:?}, got {line:?}"
                );
                return line;
            }
            let mut chunk = [0u8; 512];
            let n = self.stream.read(&mut chunk).await.unwrap();
            assert!(n > 0, "server closed connection");
            self.buffer.extend_from_slice(&chunk[..n]);
        }
    }

    async fn send(&mut self, line: &str) {
        self.stream.write_all(line.as_bytes()).await.unwrap();
        self.stream.write_all(b"\r\n").await.unwrap();
    }
}

#[tokio::test]
async fn accepts_and_delivers_over_tcp() {
    let stack = start_stack(|_| {}).await;
    let mut client = Client::connect(stack.address).await;

    client.expect("220 mx.e2e.test").await;
    client.send("EHLO client.example").await;
    client.expect("250-").await;
    client.expect("250-AUTH PLAIN LOGIN").await;
    client.expect("250 HELP").await;

    client.send("MAIL FROM:<sender@elsewhere.example>").await;
    client.expect("250").await;
    client.send("RCPT TO:<carol@hosted.example>").await;
    client.expect("250").await;
    client.send("DATA").await;
    client.expect("354").await;
    client.send("Subject: e2e\r\n\r\nhello\r\n.").await;
    client.expect("250 Message accepted for delivery").await;
    client.send("QUIT").await;
    client.expect("221").await;

    let maildir_new = std::path::Path::new(&stack.config.delivery.virtual_users.base_dir_path)
        .join("hosted.example")
        .join("carol")
        .join("Maildir")
        .join("new");

    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let delivered = maildir_new.is_dir()
            && std::fs::read_dir(&maildir_new).unwrap().count() == 1;
        if delivered {
            break;
        }
        assert!(Instant::now() < deadline, "delivery did not complete");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    stack.shutdown.send(Signal::Shutdown).unwrap();
    stack.queue.stop(Duration::from_secs(5)).await.unwrap();
}

#[tokio::test]
async fn per_ip_connection_limit() {
    let stack = start_stack(|config| {
        config.server.max_connections_per_ip = 1;
    })
    .await;

    let mut first = Client::connect(stack.address).await;
    first.expect("220").await;

    // The second connection from the same IP is dropped before greeting.
    let mut second = TcpStream::connect(stack.address).await.unwrap();
    let mut chunk = [0u8; 64];
    let n = tokio::time::timeout(Duration::from_secs(5), second.read(&mut chunk))
        .await
        .expect("expected the server to close the connection")
        .unwrap();
    assert_eq!(n, 0, "second connection should be closed without greeting");

    // Closing the first connection frees the slot.
    first.send("QUIT").await;
    first.expect("221").await;
    drop(first);

    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let mut retry = Client::connect(stack.address).await;
        let mut chunk = [0u8; 64];
        let n = tokio::time::timeout(Duration::from_secs(1), retry.stream.read(&mut chunk))
            .await
            .ok()
            .and_then(|r| r.ok())
            .unwrap_or(0);
        if n > 0 {
            break;
        }
        assert!(Instant::now() < deadline, "slot was never released");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    let _ = stack.shutdown.send(Signal::Shutdown);
}

#[tokio::test]
async fn shutdown_drains_sessions() {
    let stack = start_stack(|_| {}).await;
    let mut client = Client::connect(stack.address).await;
    client.expect("220").await;

    stack.shutdown.send(Signal::Shutdown).unwrap();
    client.expect("421").await;

    stack.queue.stop(Duration::from_secs(5)).await.unwrap();
}

#[tokio::test]
async fn gate_rejection_closes_connection() {
    #[derive(Debug)]
    struct DenyAllGate;

    #[async_trait::async_trait]
    impl ConnectionGate for DenyAllGate {
        async fn check(&self, _ip: IpAddr) -> bool {
            false
        }
    }

    // Build a stack manually so the deny gate is installed.
    let dir = tempfile::tempdir().unwrap();
    let mut config = Config::default();
    config.server.hostname = "mx.deny.test".to_string();
    config.server.spool_dir = dir.path().join("spool").to_string_lossy().into_owned();
    let config = Arc::new(config);

    let spool = Spool::new(&config.server.spool_dir);
    spool.init().unwrap();
    let authenticator = Arc::new(MemoryAuthenticator::default());
    let (shutdown, _) = broadcast::channel(8);
    let processor = Processor::new(
        Arc::clone(&config),
        spool.clone(),
        Arc::new(LogOnlyRelay),
        shutdown.clone(),
    );
    let queue = Arc::new(MessageQueue::new(
        QueueLimits::from(&config.queue),
        processor,
    ));
    let validator = Arc::new(RcptValidator::new(
        Arc::clone(&config),
        authenticator.clone(),
        Arc::new(AliasMap::default()),
    ));
    let context = Arc::new(SessionContext {
        config: Arc::clone(&config),
        spool,
        queue,
        validator,
        email: EmailValidator::new(Arc::clone(&config)),
        authenticator,
    });

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();
    let server = Arc::new(Server::new(context, Arc::new(DenyAllGate), shutdown.clone()));
    tokio::spawn(Arc::clone(&server).serve(listener));

    let mut stream = TcpStream::connect(address).await.unwrap();
    let mut chunk = [0u8; 64];
    let n = tokio::time::timeout(Duration::from_secs(5), stream.read(&mut chunk))
        .await
        .expect("expected the server to close the connection")
        .unwrap();
    assert_eq!(n, 0, "gated connection should close without greeting");
}
