//! In-process scripted server for connection tests.
//!
//! [`MockConnector`] hands the driver one end of a `tokio::io::duplex` pipe
//! per connect attempt; the other end is delivered to [`MockListener::accept`]
//! wrapped in a [`ServerConn`] speaking frames through [`MessageCodec`].

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::{SinkExt, StreamExt};
use tokio::io::DuplexStream;
use tokio::sync::mpsc;
use tokio_util::codec::Framed;

use super::config::ConnectionConfig;
use super::connection::Connection;
use super::transport::{BoxedTransport, Connector};
use crate::protocol::{Envelope, Event, Message, MessageCodec, ProtocolVersion, EVENT_STREAM_ID};

const PIPE_CAPACITY: usize = 64 * 1024;

pub(crate) struct MockConnector {
    accept_tx: mpsc::UnboundedSender<DuplexStream>,
    refuse: Arc<AtomicBool>,
}

impl Connector for MockConnector {
    fn connect(&self) -> BoxFuture<'_, io::Result<BoxedTransport>> {
        Box::pin(async move {
            if self.refuse.load(Ordering::SeqCst) {
                return Err(io::Error::new(io::ErrorKind::ConnectionRefused, "connection refused"));
            }
            let (client, server) = tokio::io::duplex(PIPE_CAPACITY);
            self.accept_tx
                .send(server)
                .map_err(|_| io::Error::new(io::ErrorKind::ConnectionRefused, "listener dropped"))?;
            Ok(Box::new(client) as BoxedTransport)
        })
    }

    fn peer(&self) -> String {
        "mock".to_string()
    }
}

pub(crate) struct MockListener {
    accept_rx: mpsc::UnboundedReceiver<DuplexStream>,
    refuse: Arc<AtomicBool>,
}

impl MockListener {
    pub(crate) async fn accept(&mut self) -> ServerConn {
        let stream = self.accept_rx.recv().await.expect("connector dropped");
        ServerConn {
            framed: Framed::new(stream, MessageCodec::new()),
            version: ProtocolVersion::V2,
        }
    }

    pub(crate) fn refuse_connections(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }
}

/// Route driver logs to the test harness; `RUST_LOG` selects the level.
pub(crate) fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub(crate) fn mock_pair() -> (MockConnector, MockListener) {
    init_tracing();
    let (accept_tx, accept_rx) = mpsc::unbounded_channel();
    let refuse = Arc::new(AtomicBool::new(false));
    (
        MockConnector {
            accept_tx,
            refuse: refuse.clone(),
        },
        MockListener { accept_rx, refuse },
    )
}

/// Server side of one accepted pipe.
pub(crate) struct ServerConn {
    framed: Framed<DuplexStream, MessageCodec>,
    /// Version used for replies, follows the last request received
    version: ProtocolVersion,
}

impl ServerConn {
    /// Next request; panics on EOF.
    pub(crate) async fn recv(&mut self) -> Envelope {
        self.try_recv().await.expect("client closed the connection")
    }

    /// Next request, `None` once the client has closed its side.
    pub(crate) async fn try_recv(&mut self) -> Option<Envelope> {
        let frame = self.framed.next().await?.expect("bad frame from client");
        let envelope = frame.into_envelope().expect("undecodable request");
        assert!(!envelope.is_response, "client sent a response frame");
        self.version = envelope.version;
        Some(envelope)
    }

    pub(crate) async fn reply(&mut self, stream_id: i8, message: Message) {
        let envelope = Envelope::response(self.version, stream_id, message);
        self.framed.send(envelope).await.expect("reply failed");
    }

    pub(crate) async fn send_event(&mut self, event: Event) {
        self.reply(EVENT_STREAM_ID, Message::Event(event)).await;
    }

    /// Answer STARTUP with READY.
    pub(crate) async fn handshake(&mut self) {
        let startup = self.recv().await;
        assert!(
            matches!(startup.message, Message::Startup(_)),
            "expected STARTUP, got {}",
            startup.message.name()
        );
        self.reply(startup.stream_id, Message::Ready).await;
    }
}

pub(crate) fn test_config() -> ConnectionConfig {
    ConnectionConfig::default()
}

/// Connect a fresh connection to a scripted server that answered STARTUP.
pub(crate) async fn connect_pair(config: ConnectionConfig) -> (Connection, ServerConn, MockListener) {
    let (connector, mut listener) = mock_pair();
    let conn = Connection::with_connector(config, Arc::new(connector)).expect("valid config");

    let connecting = tokio::spawn({
        let conn = conn.clone();
        async move { conn.connect().await }
    });
    let mut server = listener.accept().await;
    server.handshake().await;
    connecting.await.expect("connect task").expect("connect");

    (conn, server, listener)
}
