//! Stream ID Pool
//!
//! 연결당 스트림 ID 할당, 응답 대기자 매핑, FIFO 대기열

use std::collections::{HashMap, VecDeque};

use tokio::sync::oneshot;
use tracing::trace;

use super::error::{DriverError, DriverResult};
use crate::protocol::Envelope;

/// 응답 전달 채널
pub(crate) type ResponseSender = oneshot::Sender<DriverResult<Envelope>>;

/// 스트림 ID 전달 채널
pub(crate) type LeaseSender = oneshot::Sender<DriverResult<StreamLease>>;

// ============================================================================
// StreamLease - 할당된 스트림 ID
// ============================================================================

/// 할당된 스트림 ID
///
/// `epoch`는 풀이 리셋될 때마다 증가하므로 이전 전송 계층에서 받은
/// 스트림 ID의 반환은 무시됩니다.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct StreamLease {
    pub(crate) id: i8,
    pub(crate) epoch: u64,
}

/// 스트림 ID 획득 결과
#[derive(Debug)]
pub(crate) enum Acquire {
    /// 즉시 할당
    Ready(StreamLease),
    /// 대기열에 등록됨
    Wait(oneshot::Receiver<DriverResult<StreamLease>>),
}

// ============================================================================
// StreamIdPool
// ============================================================================

/// 스트림 ID 풀
#[derive(Debug)]
pub(crate) struct StreamIdPool {
    /// 사용 가능한 ID (낮은 번호부터)
    free: Vec<i8>,
    /// 진행 중인 요청의 응답 채널
    pending: HashMap<i8, ResponseSender>,
    /// ID를 기다리는 호출자
    waiters: VecDeque<LeaseSender>,
    /// 대기열 최대 길이
    max_waiters: usize,
    /// 전체 ID 수
    capacity: usize,
    /// 리셋 세대
    epoch: u64,
}

impl StreamIdPool {
    /// 새 풀 생성 (ID 0..capacity)
    pub(crate) fn new(capacity: usize, max_waiters: usize) -> Self {
        Self {
            free: Self::all_ids(capacity),
            pending: HashMap::new(),
            waiters: VecDeque::new(),
            max_waiters,
            capacity,
            epoch: 0,
        }
    }

    fn all_ids(capacity: usize) -> Vec<i8> {
        // pop() yields the lowest id first
        (0..capacity.min(128)).rev().map(|id| id as i8).collect()
    }

    /// 스트림 ID 획득
    ///
    /// 풀이 비어 있으면 대기열에 등록하고, 대기열도 가득 차 있으면
    /// `TooManyRequests`를 반환합니다.
    pub(crate) fn acquire(&mut self) -> DriverResult<Acquire> {
        if let Some(id) = self.free.pop() {
            trace!(stream_id = id, "stream acquired");
            return Ok(Acquire::Ready(StreamLease { id, epoch: self.epoch }));
        }

        // Cancelled waiters do not count against the queue depth
        self.waiters.retain(|waiter| !waiter.is_closed());
        if self.waiters.len() >= self.max_waiters {
            return Err(DriverError::TooManyRequests {
                max_waiters: self.max_waiters,
            });
        }

        let (tx, rx) = oneshot::channel();
        self.waiters.push_back(tx);
        trace!(waiters = self.waiters.len(), "stream pool exhausted, queued");
        Ok(Acquire::Wait(rx))
    }

    /// 응답 채널 등록
    ///
    /// 리셋 이후의 오래된 lease이면 채널을 돌려줍니다.
    pub(crate) fn bind(&mut self, lease: StreamLease, tx: ResponseSender) -> Result<(), ResponseSender> {
        if lease.epoch != self.epoch {
            return Err(tx);
        }
        self.pending.insert(lease.id, tx);
        Ok(())
    }

    /// 응답 수신 처리 - 응답 채널을 꺼내고 ID를 반환
    pub(crate) fn complete(&mut self, id: i8) -> Option<ResponseSender> {
        let tx = self.pending.remove(&id)?;
        self.release(StreamLease { id, epoch: self.epoch });
        Some(tx)
    }

    /// 스트림 ID 반환
    ///
    /// 대기자가 있으면 풀을 거치지 않고 가장 오래 기다린 대기자에게 넘깁니다.
    pub(crate) fn release(&mut self, lease: StreamLease) {
        if lease.epoch != self.epoch {
            return;
        }
        self.pending.remove(&lease.id);

        while let Some(waiter) = self.waiters.pop_front() {
            match waiter.send(Ok(lease)) {
                Ok(()) => {
                    trace!(stream_id = lease.id, "stream handed to waiter");
                    return;
                }
                // waiter gave up; try the next one
                Err(_) => continue,
            }
        }

        if !self.free.contains(&lease.id) {
            // keep lowest-first order
            let pos = self.free.partition_point(|&free| free > lease.id);
            self.free.insert(pos, lease.id);
        }
    }

    /// 모든 대기자와 진행 중인 요청을 실패시키고 풀을 초기화
    pub(crate) fn reset(&mut self, error: &DriverError) {
        self.epoch += 1;

        for (_, tx) in self.pending.drain() {
            let _ = tx.send(Err(error.clone()));
        }
        for waiter in self.waiters.drain(..) {
            let _ = waiter.send(Err(error.clone()));
        }
        self.free = Self::all_ids(self.capacity);
    }

    /// 대기자만 실패시킴 - 진행 중인 요청은 그대로 둡니다
    pub(crate) fn fail_waiters(&mut self, error: &DriverError) -> usize {
        let mut failed = 0;
        for waiter in self.waiters.drain(..) {
            if waiter.send(Err(error.clone())).is_ok() {
                failed += 1;
            }
        }
        failed
    }

    /// 진행 중인 요청 수
    pub(crate) fn in_flight(&self) -> usize {
        self.capacity - self.free.len()
    }

    /// 대기 중인 호출자 수
    pub(crate) fn waiting(&self) -> usize {
        self.waiters.iter().filter(|waiter| !waiter.is_closed()).count()
    }

    /// 현재 세대
    pub(crate) fn epoch(&self) -> u64 {
        self.epoch
    }
}

// ============================================================================
// Tests
// ============================================================================
