//! Connection
//!
//! 하나의 전송 계층 위에서 스트림 ID로 요청을 다중화하는 연결
//!
//! 요청은 스트림 ID를 할당받아 쓰기 루프로 전달되고, 응답은 읽기 루프에서
//! 같은 스트림 ID의 대기자에게 전달됩니다. 응답 순서는 요청 순서와 무관합니다.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, Weak};

use bytes::Bytes;
use futures::future::try_join_all;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::io::{ReadHalf, WriteHalf};
use tokio::sync::{broadcast, mpsc, oneshot, watch, Notify};
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, trace, warn};

use super::config::{AuthToken, ConnectionConfig};
use super::cursor::{Cursor, Statement};
use super::error::{DriverError, DriverResult};
use super::events::{ConnectionEvent, ConnectionState};
use super::prepared::{PreparedCache, PreparedStatement};
use super::query::{QueryParams, QueryResult};
use super::streams::{Acquire, StreamIdPool, StreamLease};
use super::transport::{BoxedTransport, Connector, TcpConnector};
use crate::protocol::{
    BatchMessage, BatchQuery, BatchType, Consistency, CredentialsMessage, Envelope, EventType,
    ExecuteMessage, Frame, Message, MessageCodec, Metadata, PrepareMessage, ProtocolError,
    ProtocolVersion, QueryMessage, QueryOptions, RegisterMessage, ResultMessage, SaslToken,
    StartupMessage, Value,
};

/// AUTH_CHALLENGE 최대 왕복 횟수
const MAX_AUTH_ROUNDS: usize = 16;

type FrameReader = FramedRead<ReadHalf<BoxedTransport>, MessageCodec>;
type FrameWriter = FramedWrite<WriteHalf<BoxedTransport>, MessageCodec>;
type PrepareWaiter = oneshot::Sender<DriverResult<PreparedStatement>>;

/// 쓰기 루프로 전달되는 항목
#[derive(Debug)]
enum Outbound {
    /// 요청 프레임
    Frame(Envelope),
    /// 쓰기 측 종료
    Shutdown,
}

// ============================================================================
// Shared State
// ============================================================================

/// 잠금으로 보호되는 연결 상태
///
/// 잠금은 상태 변경 동안에만 유지하며 네트워크 대기 중에는 유지하지 않습니다.
struct Shared {
    state: ConnectionState,
    /// `close()` 호출됨
    shutdown: bool,
    streams: StreamIdPool,
    /// 현재 전송 계층의 쓰기 채널
    outbound: Option<mpsc::UnboundedSender<Outbound>>,
    io_task: Option<JoinHandle<()>>,
    reconnect_task: Option<JoinHandle<()>>,
    prepared: PreparedCache,
    /// 진행 중인 PREPARE (쿼리 -> 합류한 대기자)
    preparing: HashMap<String, Vec<PrepareWaiter>>,
    /// 재연결 시 다시 등록할 이벤트
    registered: Vec<EventType>,
    /// 전송 계층 세대
    generation: u64,
}

struct Inner {
    config: ConnectionConfig,
    connector: Arc<dyn Connector>,
    shared: Mutex<Shared>,
    events: broadcast::Sender<ConnectionEvent>,
    state_tx: watch::Sender<ConnectionState>,
    /// 진행 중인 요청이 모두 끝났을 때 알림
    drained: Notify,
}

impl Inner {
    fn set_state(&self, shared: &mut Shared, state: ConnectionState) {
        if shared.state != state {
            debug!(from = %shared.state, to = %state, "connection state changed");
        }
        shared.state = state;
        self.state_tx.send_replace(state);
    }

    fn emit(&self, event: ConnectionEvent) {
        // no subscribers is fine
        let _ = self.events.send(event);
    }

    /// 전송 계층을 버리고 진행 중인 요청과 대기자를 모두 실패시킴
    fn teardown(&self, shared: &mut Shared, reason: &str) {
        shared.generation += 1;
        shared.outbound = None;
        if let Some(task) = shared.io_task.take() {
            task.abort();
        }
        shared.streams.reset(&DriverError::connection_closed(reason));
        shared.prepared.clear();
        self.drained.notify_waiters();
    }

    /// 읽기 루프에서 받은 프레임 처리
    fn dispatch(&self, frame: Frame) {
        let stream_id = frame.stream_id();

        if stream_id < 0 {
            match frame.into_envelope() {
                Ok(Envelope {
                    message: Message::Event(event),
                    ..
                }) => {
                    trace!(event_type = %event.event_type(), "event received");
                    self.emit(ConnectionEvent::Event(event));
                }
                Ok(envelope) => {
                    warn!(opcode = envelope.message.name(), "unexpected message on event stream")
                }
                Err(e) => warn!(error = %e, "failed to decode event"),
            }
            return;
        }

        let result = frame
            .into_envelope()
            .map_err(DriverError::from)
            .and_then(|envelope| match envelope {
                Envelope {
                    message: Message::Error(err),
                    ..
                } => Err(DriverError::from(err)),
                envelope => Ok(envelope),
            });

        let handler = {
            let mut shared = self.shared.lock();
            let handler = shared.streams.complete(stream_id);
            if shared.state == ConnectionState::Closing && shared.streams.in_flight() == 0 {
                self.drained.notify_waiters();
            }
            handler
        };

        match handler {
            Some(tx) => {
                trace!(stream_id, "response received");
                // caller may have gone away
                let _ = tx.send(result);
            }
            None => warn!(stream_id, "response for unknown stream id ignored"),
        }
    }

    /// 쓰기에 실패한 요청 하나만 실패 처리
    fn fail_stream(&self, stream_id: i8, error: DriverError) {
        let handler = self.shared.lock().streams.complete(stream_id);
        if let Some(tx) = handler {
            let _ = tx.send(Err(error));
        }
    }

    /// 전송 계층 종료 처리
    fn on_transport_closed(self: &Arc<Self>, generation: u64, error: DriverError) {
        let mut shared = self.shared.lock();
        if shared.generation != generation || shared.outbound.is_none() {
            return;
        }

        let state = shared.state;
        let unexpected = state == ConnectionState::Active && !shared.shutdown;
        if unexpected {
            warn!(error = %error, "transport lost");
        } else {
            debug!(reason = %error, "transport closed");
        }

        // the task running this is already finishing
        shared.io_task = None;
        let reason = match &error {
            DriverError::ConnectionClosed(reason) => reason.clone(),
            other => other.to_string(),
        };
        self.teardown(&mut shared, &reason);

        match state {
            // connect() decides what happens next
            ConnectionState::Connecting => {}
            ConnectionState::Active if unexpected && self.config.auto_reconnect => {
                self.set_state(&mut shared, ConnectionState::Faulted);
                self.emit(ConnectionEvent::Error(error));
                self.emit(ConnectionEvent::Reconnecting);
                shared.reconnect_task = Some(tokio::spawn(reconnect_loop(Arc::downgrade(self))));
            }
            _ => {
                if unexpected {
                    self.emit(ConnectionEvent::Error(error));
                }
                self.set_state(&mut shared, ConnectionState::Closed);
                self.emit(ConnectionEvent::Closed);
            }
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        let shared = self.shared.get_mut();
        if let Some(task) = shared.io_task.take() {
            task.abort();
        }
        if let Some(task) = shared.reconnect_task.take() {
            task.abort();
        }
    }
}

// ============================================================================
// Connection
// ============================================================================

/// 서버 연결
///
/// 복제 비용이 낮은 핸들이며 모든 복제본이 같은 전송 계층을 공유합니다.
///
/// # Example
///
/// ```no_run
/// use cql_driver::driver::{Connection, ConnectionConfig, QueryParams};
///
/// # async fn example() -> cql_driver::driver::DriverResult<()> {
/// let config = ConnectionConfig::builder("127.0.0.1:9042")?
///     .with_keyspace("app")
///     .build()?;
/// let conn = Connection::new(config)?;
/// conn.connect().await?;
///
/// let result = conn.query("SELECT * FROM users", QueryParams::new()).await?;
/// if let Some(rows) = result.rows() {
///     println!("{} rows", rows.len());
/// }
///
/// conn.close().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Connection {
    inner: Arc<Inner>,
}

impl Connection {
    /// TCP 연결 생성 (아직 연결하지 않음)
    pub fn new(config: ConnectionConfig) -> DriverResult<Self> {
        let connector = TcpConnector::new(config.address.clone());
        Self::with_connector(config, Arc::new(connector))
    }

    /// 사용자 전송 계층으로 연결 생성
    pub fn with_connector(config: ConnectionConfig, connector: Arc<dyn Connector>) -> DriverResult<Self> {
        config.validate()?;

        let (events, _) = broadcast::channel(config.event_buffer);
        let (state_tx, _) = watch::channel(ConnectionState::Idle);
        let shared = Shared {
            state: ConnectionState::Idle,
            shutdown: false,
            streams: StreamIdPool::new(config.max_streams, config.max_waiters),
            outbound: None,
            io_task: None,
            reconnect_task: None,
            prepared: PreparedCache::new(config.prepared_cache_size),
            preparing: HashMap::new(),
            registered: Vec::new(),
            generation: 0,
        };

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                connector,
                shared: Mutex::new(shared),
                events,
                state_tx,
                drained: Notify::new(),
            }),
        })
    }

    /// 연결 생성 후 바로 연결
    pub async fn open(config: ConnectionConfig) -> DriverResult<Self> {
        let conn = Self::new(config)?;
        conn.connect().await?;
        Ok(conn)
    }

    /// 연결 설정
    pub fn config(&self) -> &ConnectionConfig {
        &self.inner.config
    }

    /// 프로토콜 버전
    pub fn protocol_version(&self) -> ProtocolVersion {
        self.inner.config.protocol_version
    }

    /// 현재 상태
    pub fn state(&self) -> ConnectionState {
        self.inner.shared.lock().state
    }

    /// 상태 변경 구독
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    /// 연결 이벤트 구독
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.inner.events.subscribe()
    }

    /// 응답을 기다리는 요청 수
    pub fn in_flight(&self) -> usize {
        self.inner.shared.lock().streams.in_flight()
    }

    /// 스트림 ID를 기다리는 요청 수
    pub fn queued(&self) -> usize {
        self.inner.shared.lock().streams.waiting()
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// 연결 및 핸드셰이크
    ///
    /// STARTUP, 필요한 경우 인증, `USE <keyspace>`, 이벤트 재등록 순서로
    /// 진행합니다. 전체 과정은 `connect_timeout` 안에 끝나야 합니다.
    pub async fn connect(&self) -> DriverResult<()> {
        self.connect_inner(false).await
    }

    async fn connect_inner(&self, reconnect: bool) -> DriverResult<()> {
        {
            let mut shared = self.inner.shared.lock();
            if reconnect {
                if shared.shutdown || shared.state != ConnectionState::Faulted {
                    return Ok(());
                }
            } else {
                if !shared.state.can_connect() {
                    return Err(DriverError::connection(format!(
                        "cannot connect while {}",
                        shared.state
                    )));
                }
                shared.shutdown = false;
                if let Some(task) = shared.reconnect_task.take() {
                    task.abort();
                }
            }
            self.inner.set_state(&mut shared, ConnectionState::Connecting);
        }

        debug!(peer = %self.inner.connector.peer(), reconnect, "connecting");
        let timeout = self.inner.config.connect_timeout;
        let result = match tokio::time::timeout(timeout, self.establish()).await {
            Ok(result) => result,
            Err(_) => Err(DriverError::ConnectTimeout(timeout)),
        };

        let mut shared = self.inner.shared.lock();
        match result {
            Ok(()) if !shared.shutdown => {
                shared.reconnect_task = None;
                self.inner.set_state(&mut shared, ConnectionState::Active);
                self.inner.emit(ConnectionEvent::Connected);
                debug!(peer = %self.inner.connector.peer(), "connected");
                Ok(())
            }
            Ok(()) => {
                self.inner.teardown(&mut shared, "connection closed during connect");
                self.inner.set_state(&mut shared, ConnectionState::Closed);
                self.inner.emit(ConnectionEvent::Closed);
                Err(DriverError::connection_closed("connection closed during connect"))
            }
            Err(err) => {
                debug!(error = %err, "connect failed");
                self.inner.teardown(&mut shared, &err.to_string());
                let next = if reconnect && !shared.shutdown {
                    ConnectionState::Faulted
                } else {
                    ConnectionState::Closed
                };
                self.inner.set_state(&mut shared, next);
                Err(err)
            }
        }
    }

    async fn establish(&self) -> DriverResult<()> {
        let transport = self
            .inner
            .connector
            .connect()
            .await
            .map_err(|e| DriverError::connection(e.to_string()))?;
        self.install_transport(transport);

        self.startup().await?;

        if let Some(keyspace) = &self.inner.config.keyspace {
            self.use_keyspace(keyspace).await?;
        }

        let registered = self.inner.shared.lock().registered.clone();
        if !registered.is_empty() {
            self.send_register(registered).await?;
        }
        Ok(())
    }

    fn install_transport(&self, transport: BoxedTransport) {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut shared = self.inner.shared.lock();
        shared.generation += 1;
        let generation = shared.generation;
        shared.outbound = Some(tx);
        shared.io_task = Some(tokio::spawn(run_io(
            Arc::downgrade(&self.inner),
            transport,
            rx,
            generation,
            self.inner.config.max_frame_size,
        )));
    }

    async fn startup(&self) -> DriverResult<()> {
        let startup = StartupMessage::new(self.inner.config.cql_version.clone());
        let response = self.request_raw(Message::Startup(startup), false).await?;
        match response.message {
            Message::Ready => Ok(()),
            Message::Authenticate(auth) => self.authenticate(&auth.authenticator).await,
            other => Err(DriverError::unexpected("READY", other.name())),
        }
    }

    async fn authenticate(&self, authenticator: &str) -> DriverResult<()> {
        let (username, password) = match &self.inner.config.auth {
            AuthToken::Basic { username, password } => (username.as_str(), password.as_str()),
            AuthToken::None => {
                return Err(DriverError::authentication(format!(
                    "server requires authentication ({}) but no credentials are configured",
                    authenticator
                )))
            }
        };
        debug!(authenticator, "authenticating");

        let result = if self.inner.config.protocol_version.supports_batch() {
            self.sasl_plain(username, password).await
        } else {
            self.send_credentials(username, password).await
        };

        result.map_err(|e| match e {
            DriverError::Server(err) => DriverError::authentication(err.to_string()),
            other => other,
        })
    }

    async fn send_credentials(&self, username: &str, password: &str) -> DriverResult<()> {
        let credentials = CredentialsMessage::username_password(username, password);
        let response = self.request_raw(Message::Credentials(credentials), false).await?;
        match response.message {
            Message::Ready => Ok(()),
            other => Err(DriverError::unexpected("READY", other.name())),
        }
    }

    async fn sasl_plain(&self, username: &str, password: &str) -> DriverResult<()> {
        let token = SaslToken::plain(username, password);
        let mut response = self.request_raw(Message::AuthResponse(token.clone()), false).await?;

        for _ in 0..MAX_AUTH_ROUNDS {
            match response.message {
                Message::AuthSuccess(_) | Message::Ready => return Ok(()),
                // PLAIN has no challenge step of its own; answer with the same token
                Message::AuthChallenge(_) => {
                    response = self.request_raw(Message::AuthResponse(token.clone()), false).await?;
                }
                other => return Err(DriverError::unexpected("AUTH_SUCCESS", other.name())),
            }
        }
        Err(DriverError::authentication("too many authentication challenges"))
    }

    async fn use_keyspace(&self, keyspace: &str) -> DriverResult<()> {
        let options = QueryOptions::new(self.inner.config.consistency);
        let message = Message::Query(QueryMessage::new(format!("USE {}", keyspace), options));
        let response = self.request_raw(message, false).await?;
        match response.message {
            Message::Result(_) => {
                debug!(keyspace, "keyspace selected");
                Ok(())
            }
            other => Err(DriverError::unexpected("RESULT", other.name())),
        }
    }

    async fn send_register(&self, events: Vec<EventType>) -> DriverResult<()> {
        let response = self
            .request_raw(Message::Register(RegisterMessage::new(events)), false)
            .await?;
        match response.message {
            Message::Ready => Ok(()),
            other => Err(DriverError::unexpected("READY", other.name())),
        }
    }

    /// 연결 종료
    ///
    /// 대기열의 호출자는 즉시 연결 종료 에러로 실패합니다. 진행 중인 요청이
    /// 끝나기를 `close_timeout`까지 기다린 뒤 전송 계층을 닫습니다. 시간 안에
    /// 끝나지 않은 요청은 연결 종료 에러로 실패합니다.
    /// 이미 닫힌 연결에 대해서는 아무것도 하지 않습니다.
    pub async fn close(&self) -> DriverResult<()> {
        let connecting = {
            let mut shared = self.inner.shared.lock();
            shared.shutdown = true;
            match shared.state {
                ConnectionState::Idle | ConnectionState::Closed => return Ok(()),
                ConnectionState::Faulted => {
                    if let Some(task) = shared.reconnect_task.take() {
                        task.abort();
                    }
                    self.inner.set_state(&mut shared, ConnectionState::Closed);
                    self.inner.emit(ConnectionEvent::Closed);
                    return Ok(());
                }
                ConnectionState::Connecting => true,
                ConnectionState::Active => {
                    self.inner.set_state(&mut shared, ConnectionState::Closing);
                    // queued callers never reach the wire; in-flight requests drain
                    let failed = shared
                        .streams
                        .fail_waiters(&DriverError::connection_closed("connection is closing"));
                    if failed > 0 {
                        debug!(waiters = failed, "failed queued requests on close");
                    }
                    false
                }
                ConnectionState::Closing => false,
            }
        };

        debug!(peer = %self.inner.connector.peer(), "closing connection");
        let mut state_rx = self.inner.state_tx.subscribe();
        let graceful = tokio::time::timeout(self.inner.config.close_timeout, async {
            if !connecting {
                self.drain().await;
                self.send_shutdown();
            }
            // a pending connect() sees the shutdown flag and tears down on its own
            let _ = state_rx.wait_for(|state| *state == ConnectionState::Closed).await;
        })
        .await;

        if graceful.is_err() {
            warn!("close timed out, dropping transport");
            self.force_close();
        }
        Ok(())
    }

    async fn drain(&self) {
        loop {
            let notified = self.inner.drained.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.inner.shared.lock().streams.in_flight() == 0 {
                return;
            }
            notified.await;
        }
    }

    fn send_shutdown(&self) {
        let shared = self.inner.shared.lock();
        if let Some(outbound) = &shared.outbound {
            let _ = outbound.send(Outbound::Shutdown);
        }
    }

    fn force_close(&self) {
        let mut shared = self.inner.shared.lock();
        self.inner.teardown(&mut shared, "connection closed by client");
        if shared.state != ConnectionState::Closed {
            self.inner.set_state(&mut shared, ConnectionState::Closed);
            self.inner.emit(ConnectionEvent::Closed);
        }
    }

    // ========================================================================
    // Request Dispatch
    // ========================================================================

    fn ensure_active(&self) -> DriverResult<()> {
        match self.inner.shared.lock().state {
            ConnectionState::Active => Ok(()),
            ConnectionState::Idle => Err(DriverError::connection("connection is not open")),
            state => Err(DriverError::connection_closed(format!("connection is {}", state))),
        }
    }

    async fn request(&self, message: Message, tracing: bool) -> DriverResult<Envelope> {
        self.ensure_active()?;
        self.request_raw(message, tracing).await
    }

    /// 스트림 ID 할당, 전송, 응답 대기
    async fn request_raw(&self, message: Message, tracing: bool) -> DriverResult<Envelope> {
        let lease = self.acquire_stream().await?;
        let (tx, rx) = oneshot::channel();

        {
            let mut shared = self.inner.shared.lock();
            if shared.state == ConnectionState::Closing {
                shared.streams.release(lease);
                return Err(DriverError::connection_closed("connection is closing"));
            }
            let outbound = match &shared.outbound {
                Some(outbound) => outbound.clone(),
                None => {
                    shared.streams.release(lease);
                    return Err(DriverError::connection_closed("transport is not connected"));
                }
            };
            if shared.streams.bind(lease, tx).is_err() {
                return Err(DriverError::connection_closed("transport was reset"));
            }

            let mut envelope = Envelope::request(self.inner.config.protocol_version, lease.id, message);
            if tracing {
                envelope = envelope.with_tracing();
            }
            trace!(stream_id = lease.id, opcode = envelope.message.name(), "request queued");

            if outbound.send(Outbound::Frame(envelope)).is_err() {
                shared.streams.complete(lease.id);
                return Err(DriverError::connection_closed("transport is not connected"));
            }
        }

        rx.await
            .unwrap_or_else(|_| Err(DriverError::connection_closed("response channel dropped")))
    }

    async fn acquire_stream(&self) -> DriverResult<StreamLease> {
        let acquired = {
            let mut shared = self.inner.shared.lock();
            if shared.outbound.is_none() {
                return Err(DriverError::connection_closed("transport is not connected"));
            }
            shared.streams.acquire()?
        };

        match acquired {
            Acquire::Ready(lease) => Ok(lease),
            Acquire::Wait(rx) => {
                let mut waiting = WaitingLease {
                    inner: &self.inner,
                    rx,
                    done: false,
                };
                waiting.wait().await
            }
        }
    }

    // ========================================================================
    // Operations
    // ========================================================================

    /// QUERY 실행
    pub async fn query(&self, cql: &str, params: QueryParams) -> DriverResult<QueryResult> {
        let options = params.to_options(self.inner.config.consistency);
        let message = Message::Query(QueryMessage::new(cql, options));
        into_result(self.request(message, params.tracing).await?)
    }

    /// 문장 준비
    ///
    /// 캐시에 있으면 서버에 요청하지 않습니다. 같은 쿼리의 PREPARE가 이미
    /// 진행 중이면 새 요청을 보내지 않고 그 응답을 함께 받습니다.
    pub async fn prepare(&self, cql: &str) -> DriverResult<PreparedStatement> {
        self.ensure_active()?;

        let (joined, generation) = {
            let mut shared = self.inner.shared.lock();
            if let Some(statement) = shared.prepared.get(cql) {
                return Ok(statement);
            }
            let generation = shared.generation;
            match shared.preparing.get_mut(cql) {
                Some(waiters) => {
                    let (tx, rx) = oneshot::channel();
                    waiters.push(tx);
                    (Some(rx), generation)
                }
                None => {
                    shared.preparing.insert(cql.to_string(), Vec::new());
                    (None, generation)
                }
            }
        };

        if let Some(rx) = joined {
            trace!(query = cql, "joined in-flight prepare");
            return rx
                .await
                .unwrap_or_else(|_| Err(DriverError::connection_closed("prepare was abandoned")));
        }

        let guard = PrepareGuard {
            inner: &self.inner,
            query: cql,
            done: false,
        };
        let result = self.prepare_on_wire(cql).await;
        guard.finish(&result, generation);
        result
    }

    async fn prepare_on_wire(&self, cql: &str) -> DriverResult<PreparedStatement> {
        let response = self
            .request(Message::Prepare(PrepareMessage::new(cql)), false)
            .await?;
        match response.message {
            Message::Result(ResultMessage::Prepared(prepared)) => {
                debug!(query = cql, "statement prepared");
                Ok(PreparedStatement::new(cql, prepared))
            }
            Message::Result(other) => Err(DriverError::unexpected("PREPARED", other.name())),
            other => Err(DriverError::unexpected("RESULT", other.name())),
        }
    }

    /// 캐시에서 문장 제거 - 다음 사용 시 다시 준비됩니다
    pub fn unprepare(&self, cql: &str) -> bool {
        self.inner.shared.lock().prepared.remove(cql).is_some()
    }

    /// 캐시된 문장 수
    pub fn prepared_count(&self) -> usize {
        self.inner.shared.lock().prepared.len()
    }

    /// EXECUTE 실행
    ///
    /// 서버가 Unprepared로 응답하면 해당 ID를 캐시에서 제거하고 에러를 반환합니다.
    /// 메타데이터 없이 받은 행은 캐시된 문장의 결과 컬럼 타입으로 디코딩됩니다.
    pub async fn execute(&self, id: Bytes, params: QueryParams) -> DriverResult<QueryResult> {
        self.execute_with(id, None, params).await
    }

    async fn execute_with(
        &self,
        id: Bytes,
        result_metadata: Option<&Metadata>,
        params: QueryParams,
    ) -> DriverResult<QueryResult> {
        let options = params.to_options(self.inner.config.consistency);
        let message = Message::Execute(ExecuteMessage::new(id.clone(), options));
        let response = self.request(message, params.tracing).await;
        if let Err(err) = &response {
            if err.is_unprepared() {
                self.inner.shared.lock().prepared.remove_id(&id);
            }
        }

        let mut result = into_result(response?)?;
        if result.lacks_columns() {
            let cached = match result_metadata {
                Some(_) => None,
                None => self.inner.shared.lock().prepared.result_metadata(&id),
            };
            match result_metadata.or(cached.as_ref()) {
                Some(metadata) => {
                    result.apply_columns(&metadata.columns)?;
                }
                None => trace!("no result metadata for skipped columns, rows stay untyped"),
            }
        }
        Ok(result)
    }

    /// 준비된 문장에 값을 바인드해 실행
    ///
    /// `skip_metadata`로 받은 행은 문장의 결과 메타데이터(v2)로 타입을 복원합니다.
    pub async fn execute_prepared(
        &self,
        statement: &PreparedStatement,
        values: &[Value],
        params: QueryParams,
    ) -> DriverResult<QueryResult> {
        let bound = statement.bind(values)?;
        self.execute_with(statement.id().clone(), statement.result_metadata(), params.with_values(bound))
            .await
    }

    /// 준비(캐시 사용) 후 실행
    ///
    /// 서버에서 문장이 사라진 경우(Unprepared) 한 번 다시 준비해서 재시도합니다.
    pub async fn execute_cql(&self, cql: &str, values: &[Value], params: QueryParams) -> DriverResult<QueryResult> {
        let statement = self.prepare(cql).await?;
        match self.execute_prepared(&statement, values, params.clone()).await {
            Err(err) if err.is_unprepared() => {
                warn!(query = cql, "statement unprepared on server, preparing again");
                self.unprepare(cql);
                let statement = self.prepare(cql).await?;
                self.execute_prepared(&statement, values, params).await
            }
            other => other,
        }
    }

    /// BATCH 실행 (v2)
    pub async fn batch(
        &self,
        batch_type: BatchType,
        queries: Vec<BatchQuery>,
        consistency: Option<Consistency>,
    ) -> DriverResult<QueryResult> {
        let mut batch = BatchMessage::new(batch_type, consistency.unwrap_or(self.inner.config.consistency));
        batch.queries = queries;

        let response = self.request(Message::Batch(batch), false).await;
        if let Err(err) = &response {
            if let Some(id) = err.server_error().and_then(|e| e.unprepared_id()) {
                self.inner.shared.lock().prepared.remove_id(id);
            }
        }
        into_result(response?)
    }

    /// 모든 문장을 준비(캐시 사용)한 뒤 BATCH 실행
    ///
    /// Unprepared 에러 시 모든 문장을 다시 준비해서 한 번 재시도합니다.
    pub async fn batch_cql(
        &self,
        batch_type: BatchType,
        entries: &[(&str, Vec<Value>)],
        consistency: Option<Consistency>,
    ) -> DriverResult<QueryResult> {
        match self.batch_prepared(batch_type, entries, consistency).await {
            Err(err) if err.is_unprepared() => {
                warn!(statements = entries.len(), "batch statement unprepared on server, preparing again");
                for (cql, _) in entries {
                    self.unprepare(cql);
                }
                self.batch_prepared(batch_type, entries, consistency).await
            }
            other => other,
        }
    }

    async fn batch_prepared(
        &self,
        batch_type: BatchType,
        entries: &[(&str, Vec<Value>)],
        consistency: Option<Consistency>,
    ) -> DriverResult<QueryResult> {
        let statements = try_join_all(entries.iter().map(|(cql, _)| self.prepare(cql))).await?;
        let queries = statements
            .iter()
            .zip(entries)
            .map(|(statement, (_, values))| -> DriverResult<BatchQuery> {
                Ok(BatchQuery::prepared(statement.id().clone(), statement.bind(values)?))
            })
            .collect::<DriverResult<Vec<_>>>()?;
        self.batch(batch_type, queries, consistency).await
    }

    /// 서버 이벤트 등록
    ///
    /// 등록한 이벤트는 재연결 후 다시 등록됩니다.
    pub async fn register(&self, events: &[EventType]) -> DriverResult<()> {
        self.ensure_active()?;
        {
            let mut shared = self.inner.shared.lock();
            for event in events {
                if !shared.registered.contains(event) {
                    shared.registered.push(*event);
                }
            }
        }
        self.send_register(events.to_vec()).await
    }

    /// OPTIONS - 서버가 지원하는 STARTUP 옵션
    pub async fn options(&self) -> DriverResult<BTreeMap<String, Vec<String>>> {
        let response = self.request(Message::Options, false).await?;
        match response.message {
            Message::Supported(supported) => Ok(supported.options),
            other => Err(DriverError::unexpected("SUPPORTED", other.name())),
        }
    }

    /// 페이지 단위로 행을 읽는 QUERY 커서
    pub async fn query_paged(&self, cql: &str, params: QueryParams) -> DriverResult<Cursor> {
        let statement = Statement::Query(cql.to_string());
        self.open_cursor(statement, params).await
    }

    /// 페이지 단위로 행을 읽는 EXECUTE 커서
    pub async fn execute_paged(&self, id: Bytes, params: QueryParams) -> DriverResult<Cursor> {
        let statement = Statement::Prepared {
            id,
            result_metadata: None,
        };
        self.open_cursor(statement, params).await
    }

    /// 준비된 문장에 값을 바인드한 EXECUTE 커서
    pub async fn execute_prepared_paged(
        &self,
        statement: &PreparedStatement,
        values: &[Value],
        params: QueryParams,
    ) -> DriverResult<Cursor> {
        let bound = statement.bind(values)?;
        let statement = Statement::Prepared {
            id: statement.id().clone(),
            result_metadata: statement.result_metadata().cloned(),
        };
        self.open_cursor(statement, params.with_values(bound)).await
    }

    async fn open_cursor(&self, statement: Statement, params: QueryParams) -> DriverResult<Cursor> {
        let first = self.fetch_page(&statement, params.clone()).await?;
        Cursor::new(self.clone(), statement, params, first)
    }

    pub(crate) async fn fetch_page(&self, statement: &Statement, params: QueryParams) -> DriverResult<QueryResult> {
        match statement {
            Statement::Query(cql) => self.query(cql, params).await,
            Statement::Prepared { id, result_metadata } => {
                self.execute_with(id.clone(), result_metadata.as_ref(), params).await
            }
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("peer", &self.inner.connector.peer())
            .field("state", &self.state())
            .finish()
    }
}

fn into_result(envelope: Envelope) -> DriverResult<QueryResult> {
    let Envelope { message, trace_id, .. } = envelope;
    match message {
        Message::Result(result) => Ok(QueryResult::new(result, trace_id)),
        other => Err(DriverError::unexpected("RESULT", other.name())),
    }
}

// ============================================================================
// Guards
// ============================================================================

/// 대기열에서 스트림 ID를 기다리는 동안 취소되면 받은 ID를 반환
struct WaitingLease<'a> {
    inner: &'a Inner,
    rx: oneshot::Receiver<DriverResult<StreamLease>>,
    done: bool,
}

impl WaitingLease<'_> {
    async fn wait(&mut self) -> DriverResult<StreamLease> {
        let result = (&mut self.rx)
            .await
            .unwrap_or_else(|_| Err(DriverError::connection_closed("stream pool was dropped")));
        self.done = true;
        result
    }
}

impl Drop for WaitingLease<'_> {
    fn drop(&mut self) {
        if self.done {
            return;
        }
        self.rx.close();
        if let Ok(Ok(lease)) = self.rx.try_recv() {
            self.inner.shared.lock().streams.release(lease);
        }
    }
}

/// 진행 중인 PREPARE가 취소되면 합류한 대기자에게 알림
struct PrepareGuard<'a> {
    inner: &'a Inner,
    query: &'a str,
    done: bool,
}

impl PrepareGuard<'_> {
    fn finish(mut self, result: &DriverResult<PreparedStatement>, generation: u64) {
        self.done = true;
        let waiters = {
            let mut shared = self.inner.shared.lock();
            if let Ok(statement) = result {
                // ids from a previous transport are not cached
                if shared.generation == generation {
                    shared.prepared.insert(statement.clone());
                }
            }
            shared.preparing.remove(self.query).unwrap_or_default()
        };
        for waiter in waiters {
            let _ = waiter.send(result.clone());
        }
    }
}

impl Drop for PrepareGuard<'_> {
    fn drop(&mut self) {
        if self.done {
            return;
        }
        let waiters = self.inner.shared.lock().preparing.remove(self.query);
        for waiter in waiters.unwrap_or_default() {
            let _ = waiter.send(Err(DriverError::connection_closed("prepare was cancelled")));
        }
    }
}

// ============================================================================
// I/O Task
// ============================================================================

async fn run_io(
    inner: Weak<Inner>,
    transport: BoxedTransport,
    outbound: mpsc::UnboundedReceiver<Outbound>,
    generation: u64,
    max_frame_size: usize,
) {
    let (reader, writer) = tokio::io::split(transport);
    let reader = FramedRead::new(reader, MessageCodec::with_max_size(max_frame_size));
    let writer = FramedWrite::new(writer, MessageCodec::with_max_size(max_frame_size));

    let result = tokio::select! {
        result = read_loop(&inner, reader) => result,
        result = write_loop(&inner, writer, outbound) => result,
    };

    let error = match result {
        Ok(()) => DriverError::connection_closed("connection closed by client"),
        Err(err) => err,
    };
    if let Some(inner) = inner.upgrade() {
        inner.on_transport_closed(generation, error);
    }
}

async fn read_loop(inner: &Weak<Inner>, mut reader: FrameReader) -> DriverResult<()> {
    while let Some(frame) = reader.next().await {
        let frame = frame?;
        trace!(stream_id = frame.stream_id(), length = frame.body.len(), "frame received");
        match inner.upgrade() {
            Some(inner) => inner.dispatch(frame),
            None => return Ok(()),
        }
    }
    Err(DriverError::connection_closed("server closed the connection"))
}

async fn write_loop(
    inner: &Weak<Inner>,
    mut writer: FrameWriter,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
) -> DriverResult<()> {
    while let Some(item) = outbound.recv().await {
        match item {
            Outbound::Frame(envelope) => {
                let stream_id = envelope.stream_id;
                match writer.send(envelope).await {
                    Ok(()) => trace!(stream_id, "frame sent"),
                    // An unencodable request fails alone; nothing reached the wire
                    Err(ProtocolError::Codec(err)) => {
                        debug!(stream_id, error = %err, "request encoding failed");
                        if let Some(inner) = inner.upgrade() {
                            inner.fail_stream(stream_id, DriverError::Codec(err));
                        }
                    }
                    Err(ProtocolError::Io(err)) => return Err(err.into()),
                }
            }
            Outbound::Shutdown => {
                writer.close().await?;
                return Ok(());
            }
        }
    }
    Ok(())
}

async fn reconnect_loop(inner: Weak<Inner>) {
    loop {
        let interval = match inner.upgrade() {
            Some(inner) => inner.config.reconnect_interval,
            None => return,
        };
        tokio::time::sleep(interval).await;

        let conn = match inner.upgrade() {
            Some(inner) => Connection { inner },
            None => return,
        };
        {
            let shared = conn.inner.shared.lock();
            if shared.shutdown || shared.state != ConnectionState::Faulted {
                return;
            }
        }

        match conn.connect_inner(true).await {
            Ok(()) => return,
            Err(err) => {
                warn!(error = %err, "reconnect failed");
                conn.inner.emit(ConnectionEvent::Error(err));
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::driver::testing::{connect_pair, mock_pair, test_config};
    use crate::protocol::{
        AuthenticateMessage, ColumnSpec, CqlType, ErrorCode, ErrorDetails, ErrorMessage, Event, Metadata,
        PreparedResult, ResultSet, Row, SchemaChange,
    };

    fn prepared(id: u8) -> Message {
        Message::Result(ResultMessage::Prepared(PreparedResult {
            id: Bytes::from(vec![id]),
            metadata: Metadata::new(vec![ColumnSpec::new("ks", "t", "id", CqlType::Int)]),
            result_metadata: None,
        }))
    }

    fn keyspace_result(name: &str) -> Message {
        Message::Result(ResultMessage::SetKeyspace(name.to_string()))
    }

    fn query_text(envelope: &Envelope) -> String {
        match &envelope.message {
            Message::Query(query) => query.query.clone(),
            other => panic!("expected QUERY, got {}", other.name()),
        }
    }

    #[tokio::test]
    async fn test_connect_and_query() {
        let (conn, mut server, _listener) = connect_pair(test_config()).await;
        assert_eq!(conn.state(), ConnectionState::Active);

        let query = tokio::spawn({
            let conn = conn.clone();
            async move { conn.query("SELECT now() FROM system.local", QueryParams::new()).await }
        });

        let request = server.recv().await;
        assert_eq!(query_text(&request), "SELECT now() FROM system.local");
        server.reply(request.stream_id, Message::Result(ResultMessage::Void)).await;

        let result = query.await.unwrap().unwrap();
        assert_eq!(result.result(), &ResultMessage::Void);
        assert_eq!(conn.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_connect_emits_connected() {
        let (connector, mut listener) = mock_pair();
        let conn = Connection::with_connector(test_config(), Arc::new(connector)).unwrap();
        let mut events = conn.subscribe();

        let connecting = tokio::spawn({
            let conn = conn.clone();
            async move { conn.connect().await }
        });
        let mut server = listener.accept().await;
        server.handshake().await;
        connecting.await.unwrap().unwrap();

        assert!(matches!(events.recv().await.unwrap(), ConnectionEvent::Connected));
        assert!(conn.connect().await.is_err());
    }

    #[tokio::test]
    async fn test_handshake_with_sasl_and_keyspace() {
        let config = ConnectionConfig::builder("db:9042")
            .unwrap()
            .with_keyspace("app")
            .with_auth(AuthToken::basic("cassandra", "secret"))
            .build()
            .unwrap();
        let (connector, mut listener) = mock_pair();
        let conn = Connection::with_connector(config, Arc::new(connector)).unwrap();

        let connecting = tokio::spawn({
            let conn = conn.clone();
            async move { conn.connect().await }
        });
        let mut server = listener.accept().await;

        let startup = server.recv().await;
        assert!(matches!(startup.message, Message::Startup(_)));
        server
            .reply(
                startup.stream_id,
                Message::Authenticate(AuthenticateMessage {
                    authenticator: "org.apache.cassandra.auth.PasswordAuthenticator".to_string(),
                }),
            )
            .await;

        let auth = server.recv().await;
        match &auth.message {
            Message::AuthResponse(token) => {
                assert_eq!(token.token.as_deref(), Some(&b"\0cassandra\0secret"[..]))
            }
            other => panic!("expected AUTH_RESPONSE, got {}", other.name()),
        }
        server.reply(auth.stream_id, Message::AuthChallenge(SaslToken::default())).await;

        let auth = server.recv().await;
        assert!(matches!(auth.message, Message::AuthResponse(_)));
        server.reply(auth.stream_id, Message::AuthSuccess(SaslToken::default())).await;

        let use_keyspace = server.recv().await;
        assert_eq!(query_text(&use_keyspace), "USE app");
        server.reply(use_keyspace.stream_id, keyspace_result("app")).await;

        connecting.await.unwrap().unwrap();
        assert_eq!(conn.state(), ConnectionState::Active);
    }

    #[tokio::test]
    async fn test_handshake_with_v1_credentials() {
        let config = ConnectionConfig::builder("db")
            .unwrap()
            .with_protocol_version(ProtocolVersion::V1)
            .with_auth(AuthToken::basic("user", "pw"))
            .build()
            .unwrap();
        let (connector, mut listener) = mock_pair();
        let conn = Connection::with_connector(config, Arc::new(connector)).unwrap();

        let connecting = tokio::spawn({
            let conn = conn.clone();
            async move { conn.connect().await }
        });
        let mut server = listener.accept().await;

        let startup = server.recv().await;
        assert_eq!(startup.version, ProtocolVersion::V1);
        server
            .reply(
                startup.stream_id,
                Message::Authenticate(AuthenticateMessage {
                    authenticator: "PasswordAuthenticator".to_string(),
                }),
            )
            .await;

        let credentials = server.recv().await;
        match &credentials.message {
            Message::Credentials(c) => {
                assert_eq!(c.credentials.get("username").map(String::as_str), Some("user"));
                assert_eq!(c.credentials.get("password").map(String::as_str), Some("pw"));
            }
            other => panic!("expected CREDENTIALS, got {}", other.name()),
        }
        server.reply(credentials.stream_id, Message::Ready).await;

        connecting.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_authentication_required_without_credentials() {
        let (connector, mut listener) = mock_pair();
        let conn = Connection::with_connector(test_config(), Arc::new(connector)).unwrap();

        let connecting = tokio::spawn({
            let conn = conn.clone();
            async move { conn.connect().await }
        });
        let mut server = listener.accept().await;
        let startup = server.recv().await;
        server
            .reply(
                startup.stream_id,
                Message::Authenticate(AuthenticateMessage {
                    authenticator: "PasswordAuthenticator".to_string(),
                }),
            )
            .await;

        let err = connecting.await.unwrap().unwrap_err();
        assert!(matches!(err, DriverError::Authentication(_)));
        assert_eq!(conn.state(), ConnectionState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_timeout() {
        let config = ConnectionConfig::builder("db")
            .unwrap()
            .with_connect_timeout(Duration::from_secs(2))
            .build()
            .unwrap();
        let (connector, mut listener) = mock_pair();
        let conn = Connection::with_connector(config, Arc::new(connector)).unwrap();

        let connecting = tokio::spawn({
            let conn = conn.clone();
            async move { conn.connect().await }
        });
        // accept but never answer STARTUP
        let mut server = listener.accept().await;
        let _startup = server.recv().await;

        let err = connecting.await.unwrap().unwrap_err();
        assert!(matches!(err, DriverError::ConnectTimeout(_)));
        assert_eq!(conn.state(), ConnectionState::Closed);
        assert_eq!(conn.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let (connector, listener) = mock_pair();
        listener.refuse_connections(true);
        let conn = Connection::with_connector(test_config(), Arc::new(connector)).unwrap();

        let err = conn.connect().await.unwrap_err();
        assert!(matches!(err, DriverError::Connection(_)));
        assert_eq!(conn.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn test_requests_before_connect_fail() {
        let (connector, _listener) = mock_pair();
        let conn = Connection::with_connector(test_config(), Arc::new(connector)).unwrap();
        let err = conn.query("SELECT 1", QueryParams::new()).await.unwrap_err();
        assert!(matches!(err, DriverError::Connection(_)));
    }

    #[tokio::test]
    async fn test_out_of_order_responses() {
        let (conn, mut server, _listener) = connect_pair(test_config()).await;

        let first = tokio::spawn({
            let conn = conn.clone();
            async move { conn.query("first", QueryParams::new()).await }
        });
        let a = server.recv().await;
        let second = tokio::spawn({
            let conn = conn.clone();
            async move { conn.query("second", QueryParams::new()).await }
        });
        let b = server.recv().await;
        assert_ne!(a.stream_id, b.stream_id);

        // answer in reverse order, echoing the query text
        server.reply(b.stream_id, keyspace_result(&query_text(&b))).await;
        server.reply(a.stream_id, keyspace_result(&query_text(&a))).await;

        assert_eq!(second.await.unwrap().unwrap().keyspace(), Some("second"));
        assert_eq!(first.await.unwrap().unwrap().keyspace(), Some("first"));
    }

    #[tokio::test]
    async fn test_stream_exhaustion_queues_fifo() {
        let config = ConnectionConfig::builder("db")
            .unwrap()
            .with_max_streams(2)
            .with_max_waiters(1)
            .build()
            .unwrap();
        let (conn, mut server, _listener) = connect_pair(config).await;

        let spawn_query = |text: &'static str| {
            let conn = conn.clone();
            tokio::spawn(async move { conn.query(text, QueryParams::new()).await })
        };

        let q1 = spawn_query("q1");
        let r1 = server.recv().await;
        let q2 = spawn_query("q2");
        let r2 = server.recv().await;

        let q3 = spawn_query("q3");
        while conn.queued() == 0 {
            tokio::task::yield_now().await;
        }

        // the wait queue is full
        let err = conn.query("q4", QueryParams::new()).await.unwrap_err();
        assert!(matches!(err, DriverError::TooManyRequests { max_waiters: 1 }));

        server.reply(r1.stream_id, keyspace_result("q1")).await;
        let r3 = server.recv().await;
        assert_eq!(query_text(&r3), "q3");
        assert_eq!(r3.stream_id, r1.stream_id);

        server.reply(r2.stream_id, keyspace_result("q2")).await;
        server.reply(r3.stream_id, keyspace_result("q3")).await;

        assert_eq!(q1.await.unwrap().unwrap().keyspace(), Some("q1"));
        assert_eq!(q2.await.unwrap().unwrap().keyspace(), Some("q2"));
        assert_eq!(q3.await.unwrap().unwrap().keyspace(), Some("q3"));
        assert_eq!(conn.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_transport_drop_fails_pending_and_waiters() {
        let config = ConnectionConfig::builder("db")
            .unwrap()
            .with_max_streams(1)
            .with_max_waiters(4)
            .build()
            .unwrap();
        let (conn, mut server, _listener) = connect_pair(config).await;
        let mut events = conn.subscribe();

        let pending: Vec<_> = (0..3)
            .map(|i| {
                let conn = conn.clone();
                tokio::spawn(async move { conn.query(&format!("q{}", i), QueryParams::new()).await })
            })
            .collect();
        let _first = server.recv().await;
        while conn.queued() < 2 {
            tokio::task::yield_now().await;
        }

        drop(server);

        for handle in pending {
            let err = handle.await.unwrap().unwrap_err();
            assert!(err.is_connection_closed(), "unexpected {:?}", err);
        }
        assert_eq!(conn.state(), ConnectionState::Closed);
        assert!(matches!(events.recv().await.unwrap(), ConnectionEvent::Error(_)));
        assert!(matches!(events.recv().await.unwrap(), ConnectionEvent::Closed));
    }

    #[tokio::test]
    async fn test_close_is_graceful_and_idempotent() {
        let (conn, mut server, _listener) = connect_pair(test_config()).await;
        let mut events = conn.subscribe();

        conn.close().await.unwrap();
        assert_eq!(conn.state(), ConnectionState::Closed);
        assert!(server.try_recv().await.is_none());
        assert!(matches!(events.recv().await.unwrap(), ConnectionEvent::Closed));

        conn.close().await.unwrap();
        let err = conn.query("SELECT 1", QueryParams::new()).await.unwrap_err();
        assert!(err.is_connection_closed());

        let (connector, _listener) = mock_pair();
        let idle = Connection::with_connector(test_config(), Arc::new(connector)).unwrap();
        idle.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_close_waits_for_in_flight() {
        let (conn, mut server, _listener) = connect_pair(test_config()).await;

        let query = tokio::spawn({
            let conn = conn.clone();
            async move { conn.query("slow", QueryParams::new()).await }
        });
        let request = server.recv().await;

        let closing = tokio::spawn({
            let conn = conn.clone();
            async move { conn.close().await }
        });
        while conn.state() != ConnectionState::Closing {
            tokio::task::yield_now().await;
        }

        // new requests are refused while draining
        assert!(conn.query("late", QueryParams::new()).await.is_err());

        server.reply(request.stream_id, Message::Result(ResultMessage::Void)).await;
        assert!(query.await.unwrap().is_ok());
        closing.await.unwrap().unwrap();
        assert_eq!(conn.state(), ConnectionState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_timeout_fails_outstanding() {
        let config = ConnectionConfig::builder("db")
            .unwrap()
            .with_close_timeout(Duration::from_secs(1))
            .build()
            .unwrap();
        let (conn, mut server, _listener) = connect_pair(config).await;

        let query = tokio::spawn({
            let conn = conn.clone();
            async move { conn.query("never answered", QueryParams::new()).await }
        });
        let _request = server.recv().await;

        conn.close().await.unwrap();
        assert!(query.await.unwrap().unwrap_err().is_connection_closed());
        assert_eq!(conn.state(), ConnectionState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_fails_outstanding_and_queued_once() {
        let config = ConnectionConfig::builder("db")
            .unwrap()
            .with_max_streams(1)
            .with_max_waiters(4)
            .with_close_timeout(Duration::from_secs(1))
            .build()
            .unwrap();
        let (conn, mut server, _listener) = connect_pair(config).await;

        let spawn_query = |text: &'static str| {
            let conn = conn.clone();
            tokio::spawn(async move { conn.query(text, QueryParams::new()).await })
        };

        let outstanding = spawn_query("q0");
        let first = server.recv().await;
        assert_eq!(query_text(&first), "q0");
        let queued = vec![spawn_query("q1"), spawn_query("q2")];
        while conn.queued() < 2 {
            tokio::task::yield_now().await;
        }

        let closing = tokio::spawn({
            let conn = conn.clone();
            async move { conn.close().await }
        });

        // queued callers fail as soon as the close starts
        for handle in queued {
            let err = handle.await.unwrap().unwrap_err();
            assert!(err.is_connection_closed(), "unexpected {:?}", err);
        }
        assert_eq!(conn.queued(), 0);
        assert_eq!(conn.in_flight(), 1);

        // the unanswered request fails once the drain times out
        let err = outstanding.await.unwrap().unwrap_err();
        assert!(err.is_connection_closed(), "unexpected {:?}", err);
        closing.await.unwrap().unwrap();
        assert_eq!(conn.state(), ConnectionState::Closed);

        // neither queued request was written
        assert!(server.try_recv().await.is_none());
    }

    #[tokio::test]
    async fn test_server_error_fails_only_its_request() {
        let (conn, mut server, _listener) = connect_pair(test_config()).await;

        let bad = tokio::spawn({
            let conn = conn.clone();
            async move { conn.query("SELEC", QueryParams::new()).await }
        });
        let request = server.recv().await;
        server
            .reply(
                request.stream_id,
                Message::Error(ErrorMessage::new(ErrorCode::SYNTAX_ERROR, "line 1:0 no viable alternative")),
            )
            .await;

        let err = bad.await.unwrap().unwrap_err();
        let server_error = err.server_error().unwrap();
        assert_eq!(server_error.code, ErrorCode::SYNTAX_ERROR);
        assert!(!err.is_connection_closed());

        let good = tokio::spawn({
            let conn = conn.clone();
            async move { conn.query("SELECT 1", QueryParams::new()).await }
        });
        let request = server.recv().await;
        server.reply(request.stream_id, Message::Result(ResultMessage::Void)).await;
        assert!(good.await.unwrap().is_ok());
        assert_eq!(conn.state(), ConnectionState::Active);
    }

    #[tokio::test]
    async fn test_unencodable_request_fails_alone() {
        let config = ConnectionConfig::builder("db")
            .unwrap()
            .with_protocol_version(ProtocolVersion::V1)
            .build()
            .unwrap();
        let (conn, mut server, _listener) = connect_pair(config).await;

        // v1 cannot express paging
        let err = conn
            .query("SELECT * FROM t", QueryParams::new().with_page_size(10))
            .await
            .unwrap_err();
        assert!(matches!(err, DriverError::Codec(_)));

        let good = tokio::spawn({
            let conn = conn.clone();
            async move { conn.query("SELECT * FROM t", QueryParams::new()).await }
        });
        let request = server.recv().await;
        assert_eq!(query_text(&request), "SELECT * FROM t");
        server.reply(request.stream_id, Message::Result(ResultMessage::Void)).await;
        assert!(good.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_unknown_stream_id_ignored() {
        let (conn, mut server, _listener) = connect_pair(test_config()).await;
        server.reply(42, Message::Result(ResultMessage::Void)).await;

        let query = tokio::spawn({
            let conn = conn.clone();
            async move { conn.query("SELECT 1", QueryParams::new()).await }
        });
        let request = server.recv().await;
        server.reply(request.stream_id, Message::Result(ResultMessage::Void)).await;
        assert!(query.await.unwrap().is_ok());
        assert_eq!(conn.state(), ConnectionState::Active);
    }

    #[tokio::test]
    async fn test_prepare_is_cached_and_coalesced() {
        let (conn, mut server, _listener) = connect_pair(test_config()).await;
        let cql = "SELECT * FROM ks.t WHERE id = ?";

        let server_side = async {
            let request = server.recv().await;
            assert!(matches!(request.message, Message::Prepare(_)));
            server.reply(request.stream_id, prepared(7)).await;
        };
        let (a, b, ()) = tokio::join!(conn.prepare(cql), conn.prepare(cql), server_side);
        assert_eq!(a.unwrap().id().as_ref(), &[7]);
        assert_eq!(b.unwrap().id().as_ref(), &[7]);
        assert_eq!(conn.prepared_count(), 1);

        // served from the cache, no frame is sent
        assert_eq!(conn.prepare(cql).await.unwrap().id().as_ref(), &[7]);
        assert_eq!(conn.in_flight(), 0);

        assert!(conn.unprepare(cql));
        assert!(!conn.unprepare(cql));
        assert_eq!(conn.prepared_count(), 0);
    }

    #[tokio::test]
    async fn test_skipped_metadata_rows_are_typed() {
        let (conn, mut server, _listener) = connect_pair(test_config()).await;
        let cql = "SELECT id, name FROM ks.t WHERE id = ?";

        let prepared_reply = Message::Result(ResultMessage::Prepared(PreparedResult {
            id: Bytes::from_static(&[5]),
            metadata: Metadata::new(vec![ColumnSpec::new("ks", "t", "id", CqlType::Int)]),
            result_metadata: Some(Metadata::new(vec![
                ColumnSpec::new("ks", "t", "id", CqlType::Int),
                ColumnSpec::new("ks", "t", "name", CqlType::Text),
            ])),
        }));
        let untyped_rows = || {
            let names: Arc<[String]> = vec!["0".to_string(), "1".to_string()].into();
            let row = Row::new(names, vec![Value::Blob(vec![0, 0, 0, 7]), Value::Blob(b"alice".to_vec())]);
            Message::Result(ResultMessage::Rows(ResultSet::new(Metadata::without_columns(2), vec![row])))
        };

        let client = async {
            let statement = conn.prepare(cql).await.unwrap();
            let params = QueryParams::new().with_skip_metadata(true);
            let direct = conn
                .execute_prepared(&statement, &[Value::Int(7)], params.clone())
                .await
                .unwrap();
            // by id alone, the result metadata comes from the cache
            let bound = statement.bind(&[Value::Int(7)]).unwrap();
            let by_id = conn
                .execute(statement.id().clone(), params.with_values(bound))
                .await
                .unwrap();
            (direct, by_id)
        };
        let server_side = async {
            let request = server.recv().await;
            server.reply(request.stream_id, prepared_reply).await;
            for _ in 0..2 {
                let request = server.recv().await;
                match &request.message {
                    Message::Execute(execute) => assert!(execute.options.skip_metadata),
                    other => panic!("expected EXECUTE, got {}", other.name()),
                }
                server.reply(request.stream_id, untyped_rows()).await;
            }
        };

        let ((direct, by_id), ()) = tokio::join!(client, server_side);
        for result in [direct, by_id] {
            let row = &result.rows().unwrap().rows[0];
            assert_eq!(row.get("id"), Some(&Value::Int(7)));
            assert_eq!(row.get("name"), Some(&Value::Text("alice".to_string())));
        }
    }

    #[tokio::test]
    async fn test_execute_cql_retries_once_when_unprepared() {
        let (conn, mut server, _listener) = connect_pair(test_config()).await;
        let cql = "SELECT * FROM ks.t WHERE id = ?";

        let execute = tokio::spawn({
            let conn = conn.clone();
            async move { conn.execute_cql(cql, &[Value::Int(1)], QueryParams::new()).await }
        });

        let prepare = server.recv().await;
        server.reply(prepare.stream_id, prepared(1)).await;

        let first = server.recv().await;
        match &first.message {
            Message::Execute(execute) => {
                assert_eq!(execute.id.as_ref(), &[1]);
                assert_eq!(execute.options.values.as_ref().map(Vec::len), Some(1));
            }
            other => panic!("expected EXECUTE, got {}", other.name()),
        }
        server
            .reply(
                first.stream_id,
                Message::Error(ErrorMessage::with_details(
                    ErrorCode::UNPREPARED,
                    "Prepared query with ID 01 not found",
                    ErrorDetails::Unprepared {
                        id: Bytes::from_static(&[1]),
                    },
                )),
            )
            .await;

        let prepare = server.recv().await;
        assert!(matches!(prepare.message, Message::Prepare(_)));
        server.reply(prepare.stream_id, prepared(2)).await;

        let second = server.recv().await;
        match &second.message {
            Message::Execute(execute) => assert_eq!(execute.id.as_ref(), &[2]),
            other => panic!("expected EXECUTE, got {}", other.name()),
        }
        server.reply(second.stream_id, Message::Result(ResultMessage::Void)).await;

        assert!(execute.await.unwrap().is_ok());
        assert_eq!(conn.prepare(cql).await.unwrap().id().as_ref(), &[2]);
    }

    #[tokio::test]
    async fn test_batch_cql() {
        let (conn, mut server, _listener) = connect_pair(test_config()).await;

        let batch = tokio::spawn({
            let conn = conn.clone();
            async move {
                conn.batch_cql(
                    BatchType::Logged,
                    &[
                        ("INSERT INTO ks.t (id) VALUES (?)", vec![Value::Int(1)]),
                        ("INSERT INTO ks.t (id) VALUES (?)", vec![Value::Int(2)]),
                    ],
                    Some(Consistency::One),
                )
                .await
            }
        });

        // both entries share one PREPARE
        let prepare = server.recv().await;
        assert!(matches!(prepare.message, Message::Prepare(_)));
        server.reply(prepare.stream_id, prepared(3)).await;

        let request = server.recv().await;
        match &request.message {
            Message::Batch(batch) => {
                assert_eq!(batch.queries.len(), 2);
                assert_eq!(batch.consistency, Consistency::One);
                assert_eq!(batch.queries[1].values[0].as_deref(), Some(&[0, 0, 0, 2][..]));
            }
            other => panic!("expected BATCH, got {}", other.name()),
        }
        server.reply(request.stream_id, Message::Result(ResultMessage::Void)).await;
        assert!(batch.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_register_and_receive_events() {
        let (conn, mut server, _listener) = connect_pair(test_config()).await;
        let mut events = conn.subscribe();

        let register = tokio::spawn({
            let conn = conn.clone();
            async move { conn.register(&[EventType::SchemaChange]).await }
        });
        let request = server.recv().await;
        match &request.message {
            Message::Register(register) => assert_eq!(register.events, vec![EventType::SchemaChange]),
            other => panic!("expected REGISTER, got {}", other.name()),
        }
        server.reply(request.stream_id, Message::Ready).await;
        register.await.unwrap().unwrap();

        let change = Event::SchemaChange(SchemaChange {
            change: "CREATED".to_string(),
            keyspace: "app".to_string(),
            table: "users".to_string(),
        });
        server.send_event(change.clone()).await;

        match events.recv().await.unwrap() {
            ConnectionEvent::Event(event) => assert_eq!(event, change),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(conn.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_options() {
        let (conn, mut server, _listener) = connect_pair(test_config()).await;

        let options = tokio::spawn({
            let conn = conn.clone();
            async move { conn.options().await }
        });
        let request = server.recv().await;
        assert!(matches!(request.message, Message::Options));

        let mut supported = BTreeMap::new();
        supported.insert("CQL_VERSION".to_string(), vec!["3.0.0".to_string(), "3.1.0".to_string()]);
        server
            .reply(
                request.stream_id,
                Message::Supported(crate::protocol::message::SupportedMessage {
                    options: supported.clone(),
                }),
            )
            .await;

        assert_eq!(options.await.unwrap().unwrap(), supported);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_after_transport_loss() {
        let config = ConnectionConfig::builder("db")
            .unwrap()
            .with_auto_reconnect(true)
            .with_reconnect_interval(Duration::from_secs(1))
            .build()
            .unwrap();
        let (conn, mut server, mut listener) = connect_pair(config).await;

        let register = tokio::spawn({
            let conn = conn.clone();
            async move { conn.register(&[EventType::StatusChange]).await }
        });
        let request = server.recv().await;
        server.reply(request.stream_id, Message::Ready).await;
        register.await.unwrap().unwrap();

        let mut events = conn.subscribe();
        drop(server);

        assert!(matches!(events.recv().await.unwrap(), ConnectionEvent::Error(_)));
        assert!(matches!(events.recv().await.unwrap(), ConnectionEvent::Reconnecting));
        assert_eq!(conn.state(), ConnectionState::Faulted);

        let mut server = listener.accept().await;
        server.handshake().await;

        // registrations survive the reconnect
        let request = server.recv().await;
        match &request.message {
            Message::Register(register) => assert_eq!(register.events, vec![EventType::StatusChange]),
            other => panic!("expected REGISTER, got {}", other.name()),
        }
        server.reply(request.stream_id, Message::Ready).await;

        assert!(matches!(events.recv().await.unwrap(), ConnectionEvent::Connected));
        assert_eq!(conn.state(), ConnectionState::Active);

        conn.close().await.unwrap();
        assert_eq!(conn.state(), ConnectionState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_stops_reconnecting() {
        let config = ConnectionConfig::builder("db")
            .unwrap()
            .with_auto_reconnect(true)
            .with_reconnect_interval(Duration::from_secs(1))
            .build()
            .unwrap();
        let (conn, server, listener) = connect_pair(config).await;
        listener.refuse_connections(true);
        let mut events = conn.subscribe();
        drop(server);

        assert!(matches!(events.recv().await.unwrap(), ConnectionEvent::Error(_)));
        assert!(matches!(events.recv().await.unwrap(), ConnectionEvent::Reconnecting));

        // a refused attempt keeps the connection faulted
        assert!(matches!(events.recv().await.unwrap(), ConnectionEvent::Error(_)));
        assert_eq!(conn.state(), ConnectionState::Faulted);

        conn.close().await.unwrap();
        assert_eq!(conn.state(), ConnectionState::Closed);
        assert!(matches!(events.recv().await.unwrap(), ConnectionEvent::Closed));
    }
}
