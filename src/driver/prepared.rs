//! Prepared Statements
//!
//! Prepared 문장과 쿼리 문자열 기준 LRU 캐시

use std::collections::{BTreeMap, HashMap};

use bytes::Bytes;

use super::error::{DriverError, DriverResult};
use crate::protocol::{ColumnSpec, Metadata, PreparedResult, Value};

// ============================================================================
// PreparedStatement
// ============================================================================

/// 서버에서 준비된 문장
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedStatement {
    /// 원본 쿼리
    query: String,
    /// 문장 ID
    id: Bytes,
    /// 바인드 마커 메타데이터
    metadata: Metadata,
    /// 결과 컬럼 메타데이터 (v2)
    result_metadata: Option<Metadata>,
}

impl PreparedStatement {
    /// PREPARED 결과로 생성
    pub fn new(query: impl Into<String>, prepared: PreparedResult) -> Self {
        Self {
            query: query.into(),
            id: prepared.id,
            metadata: prepared.metadata,
            result_metadata: prepared.result_metadata,
        }
    }

    /// 원본 쿼리
    pub fn query(&self) -> &str {
        &self.query
    }

    /// 문장 ID
    pub fn id(&self) -> &Bytes {
        &self.id
    }

    /// 바인드 마커 메타데이터
    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    /// 결과 컬럼 메타데이터
    pub fn result_metadata(&self) -> Option<&Metadata> {
        self.result_metadata.as_ref()
    }

    /// 바인드 마커 목록
    pub fn bind_markers(&self) -> &[ColumnSpec] {
        &self.metadata.columns
    }

    /// 값을 바인드 마커 타입에 맞춰 직렬화
    ///
    /// `Value::Null`은 null 값으로 전송됩니다.
    pub fn bind(&self, values: &[Value]) -> DriverResult<Vec<Option<Bytes>>> {
        bind_values(&self.metadata, values)
    }
}

/// 메타데이터의 컬럼 타입으로 값 목록을 직렬화
pub fn bind_values(metadata: &Metadata, values: &[Value]) -> DriverResult<Vec<Option<Bytes>>> {
    let specs = &metadata.columns;
    if specs.len() != values.len() {
        return Err(DriverError::configuration(format!(
            "statement has {} bind markers but {} values were given",
            specs.len(),
            values.len()
        )));
    }

    specs
        .iter()
        .zip(values)
        .map(|(spec, value)| {
            spec.ty.serialize(value).map_err(|e| {
                DriverError::Codec(crate::protocol::CodecError::InvalidValue(format!(
                    "column '{}': {}",
                    spec.name, e
                )))
            })
        })
        .collect()
}

// ============================================================================
// PreparedCache - LRU 캐시
// ============================================================================

/// 쿼리 문자열 기준 Prepared 캐시
#[derive(Debug)]
pub(crate) struct PreparedCache {
    /// 최대 항목 수
    capacity: usize,
    /// 쿼리 -> (문장, 사용 시점)
    entries: HashMap<String, (PreparedStatement, u64)>,
    /// 사용 시점 -> 쿼리
    recency: BTreeMap<u64, String>,
    /// 사용 카운터
    tick: u64,
}

impl PreparedCache {
    /// 새 캐시 생성
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: HashMap::new(),
            recency: BTreeMap::new(),
            tick: 0,
        }
    }

    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }

    /// 조회 (최근 사용으로 갱신)
    pub(crate) fn get(&mut self, query: &str) -> Option<PreparedStatement> {
        let tick = self.next_tick();
        let (statement, used) = self.entries.get_mut(query)?;
        self.recency.remove(&*used);
        *used = tick;
        self.recency.insert(tick, query.to_string());
        Some(statement.clone())
    }

    /// 저장 - 용량 초과 시 가장 오래 사용하지 않은 항목 제거
    pub(crate) fn insert(&mut self, statement: PreparedStatement) {
        let tick = self.next_tick();
        let query = statement.query.clone();
        if let Some((_, used)) = self.entries.insert(query.clone(), (statement, tick)) {
            self.recency.remove(&used);
        }
        self.recency.insert(tick, query);

        while self.entries.len() > self.capacity {
            match self.recency.pop_first() {
                Some((_, oldest)) => {
                    self.entries.remove(&oldest);
                }
                None => break,
            }
        }
    }

    /// 항목 제거
    pub(crate) fn remove(&mut self, query: &str) -> Option<PreparedStatement> {
        let (statement, used) = self.entries.remove(query)?;
        self.recency.remove(&used);
        Some(statement)
    }

    /// 문장 ID로 제거
    pub(crate) fn remove_id(&mut self, id: &[u8]) -> Option<PreparedStatement> {
        let query = self
            .entries
            .iter()
            .find(|(_, (statement, _))| statement.id.as_ref() == id)
            .map(|(query, _)| query.clone())?;
        self.remove(&query)
    }

    /// 문장 ID로 결과 컬럼 메타데이터 조회 (사용 시점은 갱신하지 않음)
    pub(crate) fn result_metadata(&self, id: &[u8]) -> Option<Metadata> {
        self.entries
            .values()
            .find(|(statement, _)| statement.id.as_ref() == id)
            .and_then(|(statement, _)| statement.result_metadata.clone())
    }

    /// 캐시 포함 여부
    pub(crate) fn contains(&self, query: &str) -> bool {
        self.entries.contains_key(query)
    }

    /// 전체 삭제
    pub(crate) fn clear(&mut self) {
        self.entries.clear();
        self.recency.clear();
    }

    /// 항목 수
    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}

// ============================================================================
// Tests
// ============================================================================
