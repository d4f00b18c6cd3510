//! Result Cursor
//!
//! 페이징 결과를 행 단위로 읽는 커서와 `Stream` 어댑터

use std::collections::VecDeque;
use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::Stream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, trace};

use super::connection::Connection;
use super::error::{DriverError, DriverResult};
use super::query::{QueryParams, QueryResult};
use crate::protocol::{Metadata, Row};

/// 다음 페이지를 요청할 문장
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Statement {
    Query(String),
    Prepared {
        id: Bytes,
        /// skip_metadata 응답의 행 디코딩에 사용
        result_metadata: Option<Metadata>,
    },
}

/// 빈 다음 페이지를 요청하면 일부 서버가 이 메시지로 실패합니다.
/// 결과의 끝으로 취급합니다.
const EMPTY_PAGE_DEFECT: &str = "Illegal Capacity";

fn is_empty_page_defect(err: &DriverError) -> bool {
    err.server_error()
        .map_or(false, |e| e.message.contains(EMPTY_PAGE_DEFECT))
}

// ============================================================================
// Cursor
// ============================================================================

/// 결과 커서
///
/// 현재 페이지를 모두 읽으면 페이징 상태로 다음 페이지를 요청합니다.
/// 다음 페이지 요청은 원래 요청과 같은 옵션과 바인드 값을 사용합니다.
///
/// # Example
///
/// ```no_run
/// use cql_driver::driver::{Connection, QueryParams};
///
/// # async fn example(conn: Connection) -> cql_driver::driver::DriverResult<()> {
/// let mut cursor = conn
///     .query_paged("SELECT * FROM events", QueryParams::new().with_page_size(500))
///     .await?;
/// while let Some(row) = cursor.next_row().await? {
///     println!("{:?}", row.get("id"));
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct Cursor {
    conn: Connection,
    statement: Statement,
    params: QueryParams,
    metadata: Option<Metadata>,
    rows: VecDeque<Row>,
    paging_state: Option<Bytes>,
    pages: usize,
    aborted: bool,
}

impl Cursor {
    pub(crate) fn new(
        conn: Connection,
        statement: Statement,
        params: QueryParams,
        first: QueryResult,
    ) -> DriverResult<Self> {
        let mut cursor = Self {
            conn,
            statement,
            // the continuation token is supplied per page
            params: QueryParams {
                paging_state: None,
                ..params
            },
            metadata: None,
            rows: VecDeque::new(),
            paging_state: None,
            pages: 0,
            aborted: false,
        };
        cursor.load(first)?;
        Ok(cursor)
    }

    fn load(&mut self, page: QueryResult) -> DriverResult<()> {
        self.pages += 1;
        match page.into_rows() {
            Some(mut set) => {
                trace!(rows = set.rows.len(), more = set.metadata.has_more_pages(), "page loaded");
                self.paging_state = set.metadata.paging_state.clone();
                // pages fetched with skip_metadata carry no column specs
                if let Some(known) = &self.metadata {
                    set.apply_columns(&known.columns)?;
                }
                if !set.metadata.columns.is_empty() || self.metadata.is_none() {
                    self.metadata = Some(set.metadata);
                }
                self.rows.extend(set.rows);
            }
            None => self.paging_state = None,
        }
        Ok(())
    }

    async fn fetch_next(&mut self) -> DriverResult<bool> {
        let paging_state = match self.paging_state.take() {
            Some(paging_state) => paging_state,
            None => return Ok(false),
        };

        let params = self.params.clone().with_paging_state(paging_state);
        match self.conn.fetch_page(&self.statement, params).await {
            Ok(page) => {
                self.load(page)?;
                Ok(true)
            }
            Err(err) if is_empty_page_defect(&err) => {
                debug!(error = %err, "empty follow-up page, ending result");
                Ok(false)
            }
            Err(err) => Err(err),
        }
    }

    /// 다음 행
    ///
    /// 현재 페이지가 끝나면 다음 페이지를 요청합니다. 요청이 실패하면 에러를
    /// 반환하고 이후에는 `None`을 반환합니다.
    pub async fn next_row(&mut self) -> DriverResult<Option<Row>> {
        loop {
            if self.aborted {
                return Ok(None);
            }
            if let Some(row) = self.rows.pop_front() {
                return Ok(Some(row));
            }
            if !self.fetch_next().await? {
                return Ok(None);
            }
        }
    }

    /// 다음 페이지의 행 전체
    ///
    /// 현재 버퍼에 남은 행이 있으면 먼저 그 행들을 반환합니다.
    pub async fn next_page(&mut self) -> DriverResult<Option<Vec<Row>>> {
        if self.aborted {
            return Ok(None);
        }
        if self.rows.is_empty() && !self.fetch_next().await? {
            return Ok(None);
        }
        Ok(Some(self.rows.drain(..).collect()))
    }

    /// 남은 모든 행 수집
    pub async fn collect_rows(mut self) -> DriverResult<Vec<Row>> {
        let mut rows = Vec::new();
        while let Some(row) = self.next_row().await? {
            rows.push(row);
        }
        Ok(rows)
    }

    /// 중단 - 이후 페이지를 요청하지 않고 `None`을 반환합니다
    pub fn abort(&mut self) {
        self.aborted = true;
        self.rows.clear();
        self.paging_state = None;
    }

    /// 중단 여부
    pub fn is_aborted(&self) -> bool {
        self.aborted
    }

    /// 다음 페이지 존재 여부
    pub fn has_more_pages(&self) -> bool {
        !self.aborted && self.paging_state.is_some()
    }

    /// 결과 메타데이터
    pub fn metadata(&self) -> Option<&Metadata> {
        self.metadata.as_ref()
    }

    /// 현재 버퍼의 행 수
    pub fn buffered(&self) -> usize {
        self.rows.len()
    }

    /// 지금까지 받은 페이지 수
    pub fn pages_fetched(&self) -> usize {
        self.pages
    }

    /// `Stream`으로 변환
    ///
    /// 백그라운드 태스크가 최대 `buffer`개의 행을 미리 읽습니다.
    /// 스트림을 버리면 페이지 요청도 중단됩니다.
    pub fn into_stream(self, buffer: usize) -> RowStream {
        RowStream::new(self, buffer)
    }
}

// ============================================================================
// RowStream
// ============================================================================

/// 행 스트림
pub struct RowStream {
    inner: Pin<Box<dyn Stream<Item = DriverResult<Row>> + Send>>,
    task: JoinHandle<()>,
}

impl RowStream {
    fn new(mut cursor: Cursor, buffer: usize) -> Self {
        let (tx, rx) = mpsc::channel(buffer.max(1));

        let task = tokio::spawn(async move {
            loop {
                match cursor.next_row().await {
                    Ok(Some(row)) => {
                        if tx.send(Ok(row)).await.is_err() {
                            // receiver dropped
                            cursor.abort();
                            return;
                        }
                    }
                    Ok(None) => return,
                    Err(e) => {
                        let _ = tx.send(Err(e)).await;
                        return;
                    }
                }
            }
        });

        Self {
            inner: Box::pin(ReceiverStream::new(rx)),
            task,
        }
    }
}

impl Stream for RowStream {
    type Item = DriverResult<Row>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.as_mut().poll_next(cx)
    }
}

impl Drop for RowStream {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl fmt::Debug for RowStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RowStream").finish_non_exhaustive()
    }
}
