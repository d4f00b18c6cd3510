//! Query Parameters and Results
//!
//! 요청별 옵션과 RESULT 응답 래퍼

use bytes::Bytes;
use uuid::Uuid;

use super::error::DriverResult;
use crate::protocol::{
    ColumnSpec, Consistency, Metadata, QueryOptions, ResultMessage, ResultSet, SchemaChange,
};

// ============================================================================
// QueryParams - 요청 옵션
// ============================================================================

/// 요청 옵션
///
/// 지정하지 않은 일관성 수준은 연결 설정의 기본값을 사용합니다.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryParams {
    /// 바인드 값 (직렬화 완료)
    pub values: Option<Vec<Option<Bytes>>>,
    /// 일관성 수준
    pub consistency: Option<Consistency>,
    /// 페이지 크기
    pub page_size: Option<i32>,
    /// 다음 페이지 토큰
    pub paging_state: Option<Bytes>,
    /// Serial 일관성 수준
    pub serial_consistency: Option<Consistency>,
    /// 결과 메타데이터 생략 요청
    pub skip_metadata: bool,
    /// 요청 추적
    pub tracing: bool,
}

impl QueryParams {
    /// 기본 옵션
    pub fn new() -> Self {
        Self::default()
    }

    /// 바인드 값 설정
    pub fn with_values(mut self, values: Vec<Option<Bytes>>) -> Self {
        self.values = Some(values);
        self
    }

    /// 일관성 수준 설정
    pub fn with_consistency(mut self, consistency: Consistency) -> Self {
        self.consistency = Some(consistency);
        self
    }

    /// 페이지 크기 설정
    pub fn with_page_size(mut self, page_size: i32) -> Self {
        self.page_size = Some(page_size);
        self
    }

    /// 페이징 상태 설정
    pub fn with_paging_state(mut self, paging_state: Bytes) -> Self {
        self.paging_state = Some(paging_state);
        self
    }

    /// Serial 일관성 수준 설정
    pub fn with_serial_consistency(mut self, serial: Consistency) -> Self {
        self.serial_consistency = Some(serial);
        self
    }

    /// 메타데이터 생략 설정
    pub fn with_skip_metadata(mut self, skip: bool) -> Self {
        self.skip_metadata = skip;
        self
    }

    /// 추적 설정
    pub fn with_tracing(mut self, tracing: bool) -> Self {
        self.tracing = tracing;
        self
    }

    /// 와이어 옵션으로 변환
    pub(crate) fn to_options(&self, default_consistency: Consistency) -> QueryOptions {
        let mut options = QueryOptions::new(self.consistency.unwrap_or(default_consistency))
            .with_skip_metadata(self.skip_metadata);
        if let Some(values) = &self.values {
            options = options.with_values(values.clone());
        }
        if let Some(page_size) = self.page_size {
            options = options.with_page_size(page_size);
        }
        if let Some(paging_state) = &self.paging_state {
            options = options.with_paging_state(paging_state.clone());
        }
        if let Some(serial) = self.serial_consistency {
            options = options.with_serial_consistency(serial);
        }
        options
    }
}

// ============================================================================
// QueryResult - RESULT 응답
// ============================================================================

/// RESULT 응답
#[derive(Debug, Clone, PartialEq)]
pub struct QueryResult {
    result: ResultMessage,
    trace_id: Option<Uuid>,
}

impl QueryResult {
    pub(crate) fn new(result: ResultMessage, trace_id: Option<Uuid>) -> Self {
        Self { result, trace_id }
    }

    /// 결과 본문
    pub fn result(&self) -> &ResultMessage {
        &self.result
    }

    /// 추적 세션 ID
    pub fn trace_id(&self) -> Option<Uuid> {
        self.trace_id
    }

    /// 행 결과 여부
    pub fn is_rows(&self) -> bool {
        matches!(self.result, ResultMessage::Rows(_))
    }

    /// 행 결과
    pub fn rows(&self) -> Option<&ResultSet> {
        match &self.result {
            ResultMessage::Rows(rows) => Some(rows),
            _ => None,
        }
    }

    /// 행 결과 메타데이터
    pub fn metadata(&self) -> Option<&Metadata> {
        self.rows().map(|rows| &rows.metadata)
    }

    /// 컬럼 정보 없이 받은 행 결과 여부 (skip_metadata)
    pub(crate) fn lacks_columns(&self) -> bool {
        self.rows()
            .map_or(false, |rows| rows.metadata.columns.is_empty() && rows.metadata.column_count > 0)
    }

    /// 컬럼 정보 없이 받은 행을 주어진 컬럼 타입으로 다시 디코딩
    pub(crate) fn apply_columns(&mut self, columns: &[ColumnSpec]) -> DriverResult<bool> {
        match &mut self.result {
            ResultMessage::Rows(rows) => Ok(rows.apply_columns(columns)?),
            _ => Ok(false),
        }
    }

    /// `USE` 결과 키스페이스
    pub fn keyspace(&self) -> Option<&str> {
        match &self.result {
            ResultMessage::SetKeyspace(keyspace) => Some(keyspace),
            _ => None,
        }
    }

    /// 스키마 변경 결과
    pub fn schema_change(&self) -> Option<&SchemaChange> {
        match &self.result {
            ResultMessage::SchemaChange(change) => Some(change),
            _ => None,
        }
    }

    /// 행 결과로 변환
    pub fn into_rows(self) -> Option<ResultSet> {
        self.result.into_rows()
    }

    /// 결과 본문으로 변환
    pub fn into_inner(self) -> ResultMessage {
        self.result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::message::query_flags;

    #[test]
    fn test_params_to_options() {
        let params = QueryParams::new()
            .with_page_size(50)
            .with_serial_consistency(Consistency::LocalSerial);
        let options = params.to_options(Consistency::Quorum);
        assert_eq!(options.consistency, Consistency::Quorum);
        assert_eq!(options.page_size, Some(50));
        assert_eq!(options.flags(), query_flags::PAGE_SIZE | query_flags::SERIAL_CONSISTENCY);

        let options = QueryParams::new()
            .with_consistency(Consistency::One)
            .to_options(Consistency::Quorum);
        assert_eq!(options.consistency, Consistency::One);
        assert_eq!(options.flags(), 0);
    }

    #[test]
    fn test_result_accessors() {
        let result = QueryResult::new(ResultMessage::SetKeyspace("app".to_string()), None);
        assert_eq!(result.keyspace(), Some("app"));
        assert!(!result.is_rows());
        assert!(result.into_rows().is_none());
    }
}
