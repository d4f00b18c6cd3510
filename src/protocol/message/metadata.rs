//! Result metadata, rows and result sets.

use std::sync::Arc;

use bytes::Bytes;

use crate::protocol::buffer::ByteBuffer;
use crate::protocol::error::{CodecError, CodecResult};
use crate::protocol::types::{CqlType, Value};

/// Metadata flags.
pub mod metadata_flags {
    /// Keyspace and table are given once for all columns
    pub const GLOBAL_TABLES_SPEC: i32 = 0x0001;
    /// A paging state follows the column count
    pub const HAS_MORE_PAGES: i32 = 0x0002;
    /// Column specs are omitted
    pub const NO_METADATA: i32 = 0x0004;
}

/// One column of a result or of a prepared statement's bind markers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSpec {
    /// Keyspace name
    pub keyspace: String,
    /// Table name
    pub table: String,
    /// Column name
    pub name: String,
    /// Column type
    pub ty: CqlType,
}

impl ColumnSpec {
    /// Create a column spec.
    pub fn new(
        keyspace: impl Into<String>,
        table: impl Into<String>,
        name: impl Into<String>,
        ty: CqlType,
    ) -> Self {
        Self {
            keyspace: keyspace.into(),
            table: table.into(),
            name: name.into(),
            ty,
        }
    }
}

/// Column descriptions plus the paging continuation.
///
/// The flags word is derived from the fields: `paging_state` sets
/// `HAS_MORE_PAGES`, `no_metadata` sets `NO_METADATA`, and columns that all
/// share one keyspace/table are written with `GLOBAL_TABLES_SPEC`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Metadata {
    /// Number of columns per row
    pub column_count: usize,
    /// Column specs, empty when `no_metadata` is set
    pub columns: Vec<ColumnSpec>,
    /// Continuation token for the next page
    pub paging_state: Option<Bytes>,
    /// The server omitted the column specs
    pub no_metadata: bool,
}

impl Metadata {
    /// Metadata describing the given columns.
    pub fn new(columns: Vec<ColumnSpec>) -> Self {
        Self {
            column_count: columns.len(),
            columns,
            paging_state: None,
            no_metadata: false,
        }
    }

    /// Metadata without column specs.
    pub fn without_columns(column_count: usize) -> Self {
        Self {
            column_count,
            columns: Vec::new(),
            paging_state: None,
            no_metadata: true,
        }
    }

    /// Attach a paging state.
    pub fn with_paging_state(mut self, paging_state: Bytes) -> Self {
        self.paging_state = Some(paging_state);
        self
    }

    /// Whether another page can be fetched.
    pub fn has_more_pages(&self) -> bool {
        self.paging_state.is_some()
    }

    /// Column names in order.
    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    fn global_table(&self) -> Option<(&str, &str)> {
        let first = self.columns.first()?;
        self.columns
            .iter()
            .all(|c| c.keyspace == first.keyspace && c.table == first.table)
            .then_some((first.keyspace.as_str(), first.table.as_str()))
    }

    /// Flags word derived from the fields.
    pub fn flags(&self) -> i32 {
        let mut flags = 0;
        if self.paging_state.is_some() {
            flags |= metadata_flags::HAS_MORE_PAGES;
        }
        if self.no_metadata {
            flags |= metadata_flags::NO_METADATA;
        } else if self.global_table().is_some() {
            flags |= metadata_flags::GLOBAL_TABLES_SPEC;
        }
        flags
    }

    /// Decode `<flags><columns_count>[<paging_state>][<global_table_spec>?<col_spec_1>...]`.
    pub fn decode(buf: &mut ByteBuffer) -> CodecResult<Self> {
        let flags = buf.read_i32()?;
        let column_count = buf.read_i32()?;
        let column_count = usize::try_from(column_count)
            .map_err(|_| CodecError::InvalidValue(format!("column count {}", column_count)))?;

        let paging_state = if flags & metadata_flags::HAS_MORE_PAGES != 0 {
            buf.read_bytes()?
        } else {
            None
        };

        if flags & metadata_flags::NO_METADATA != 0 {
            return Ok(Self {
                column_count,
                columns: Vec::new(),
                paging_state,
                no_metadata: true,
            });
        }

        let global = if flags & metadata_flags::GLOBAL_TABLES_SPEC != 0 {
            Some((buf.read_string()?, buf.read_string()?))
        } else {
            None
        };

        let mut columns = Vec::with_capacity(column_count.min(buf.remaining() / 4 + 1));
        for _ in 0..column_count {
            let (keyspace, table) = match &global {
                Some((keyspace, table)) => (keyspace.clone(), table.clone()),
                None => (buf.read_string()?, buf.read_string()?),
            };
            let name = buf.read_string()?;
            let ty = CqlType::read_option(buf)?;
            columns.push(ColumnSpec { keyspace, table, name, ty });
        }

        Ok(Self {
            column_count,
            columns,
            paging_state,
            no_metadata: false,
        })
    }

    /// Encode this metadata.
    pub fn encode(&self, buf: &mut ByteBuffer) -> CodecResult<()> {
        if !self.no_metadata && self.columns.len() != self.column_count {
            return Err(CodecError::InvalidValue(format!(
                "column count {} does not match {} column specs",
                self.column_count,
                self.columns.len()
            )));
        }

        buf.write_i32(self.flags());
        buf.write_i32(to_i32(self.column_count)?);
        if let Some(state) = &self.paging_state {
            buf.write_bytes(Some(state.as_ref()))?;
        }
        if self.no_metadata {
            return Ok(());
        }

        let global = self.global_table();
        if let Some((keyspace, table)) = global {
            buf.write_string(keyspace)?;
            buf.write_string(table)?;
        }
        for column in &self.columns {
            if global.is_none() {
                buf.write_string(&column.keyspace)?;
                buf.write_string(&column.table)?;
            }
            buf.write_string(&column.name)?;
            column.ty.write_option(buf)?;
        }
        Ok(())
    }
}

fn to_i32(n: usize) -> CodecResult<i32> {
    i32::try_from(n).map_err(|_| CodecError::Overflow(format!("{} does not fit an [int]", n)))
}

// ============================================================================
// Row
// ============================================================================

/// A decoded row.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    names: Arc<[String]>,
    values: Vec<Value>,
}

impl Row {
    /// Create a row from column names and values.
    pub fn new(names: Arc<[String]>, values: Vec<Value>) -> Self {
        Self { names, values }
    }

    /// Decode raw cells against their column specs.
    ///
    /// Cells without a spec (metadata skipped) are returned as blobs.
    pub fn decode(names: Arc<[String]>, columns: &[ColumnSpec], cells: &[Option<Bytes>]) -> CodecResult<Self> {
        let values = cells
            .iter()
            .enumerate()
            .map(|(i, cell)| match columns.get(i) {
                Some(column) => column.ty.deserialize(cell.as_deref()),
                None => Ok(cell.as_ref().map_or(Value::Null, |b| Value::Blob(b.to_vec()))),
            })
            .collect::<CodecResult<Vec<_>>>()?;
        Ok(Self { names, values })
    }

    /// Column names.
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Values in column order.
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Number of columns.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// True for a row without columns.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Value by column name.
    pub fn get(&self, name: &str) -> Option<&Value> {
        let index = self.names.iter().position(|n| n == name)?;
        self.values.get(index)
    }

    /// Value by column index.
    pub fn get_index(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    /// Consume the row into its values.
    pub fn into_values(self) -> Vec<Value> {
        self.values
    }
}

// ============================================================================
// ResultSet
// ============================================================================

/// One page of rows with its metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultSet {
    /// Metadata, including the paging state
    pub metadata: Metadata,
    /// Rows of this page
    pub rows: Vec<Row>,
}

impl ResultSet {
    /// Create a result set.
    pub fn new(metadata: Metadata, rows: Vec<Row>) -> Self {
        Self { metadata, rows }
    }

    /// Number of rows in this page.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// True when the page holds no rows.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Continuation token for the next page.
    pub fn paging_state(&self) -> Option<&Bytes> {
        self.metadata.paging_state.as_ref()
    }

    /// Decode `<metadata><rows_count><rows_content>`.
    pub fn decode(buf: &mut ByteBuffer) -> CodecResult<Self> {
        let metadata = Metadata::decode(buf)?;
        let row_count = buf.read_i32()?;
        let row_count = usize::try_from(row_count)
            .map_err(|_| CodecError::InvalidValue(format!("row count {}", row_count)))?;

        if row_count == 0 {
            return Ok(Self { metadata, rows: Vec::new() });
        }
        if metadata.column_count == 0 {
            return Err(CodecError::InvalidValue(format!("{} rows without columns", row_count)));
        }
        // every cell carries at least its 4-byte length
        let needed = row_count
            .checked_mul(metadata.column_count)
            .and_then(|cells| cells.checked_mul(4))
            .unwrap_or(usize::MAX);
        if needed > buf.remaining() {
            return Err(CodecError::UnexpectedEof {
                needed,
                remaining: buf.remaining(),
            });
        }

        let names: Arc<[String]> = if metadata.no_metadata {
            (0..metadata.column_count).map(|i| i.to_string()).collect()
        } else {
            metadata.column_names().into()
        };

        let mut rows = Vec::with_capacity(row_count);
        let mut cells = Vec::with_capacity(metadata.column_count);
        for _ in 0..row_count {
            cells.clear();
            for _ in 0..metadata.column_count {
                cells.push(buf.read_bytes()?);
            }
            rows.push(Row::decode(names.clone(), &metadata.columns, &cells)?);
        }

        Ok(Self { metadata, rows })
    }

    /// Type the rows of a result whose metadata was skipped.
    ///
    /// Rows decoded without column specs hold blobs under positional names;
    /// they are decoded again against `columns`, usually the result metadata
    /// of the prepared statement. Returns `false` and leaves the rows alone
    /// when the result already has specs or the column count differs.
    pub fn apply_columns(&mut self, columns: &[ColumnSpec]) -> CodecResult<bool> {
        if !self.metadata.columns.is_empty() || columns.len() != self.metadata.column_count {
            return Ok(false);
        }

        let names: Arc<[String]> = columns.iter().map(|c| c.name.clone()).collect();
        for row in &mut self.rows {
            let cells = std::mem::take(&mut row.values)
                .into_iter()
                .map(|value| match value {
                    Value::Null => Ok(None),
                    Value::Blob(bytes) => Ok(Some(Bytes::from(bytes))),
                    other => Err(CodecError::InvalidValue(format!(
                        "untyped column holds {}",
                        other.kind()
                    ))),
                })
                .collect::<CodecResult<Vec<_>>>()?;
            *row = Row::decode(names.clone(), columns, &cells)?;
        }
        self.metadata.columns = columns.to_vec();
        Ok(true)
    }

    /// Encode metadata and rows, serializing each value with its column type.
    pub fn encode(&self, buf: &mut ByteBuffer) -> CodecResult<()> {
        self.metadata.encode(buf)?;
        buf.write_i32(to_i32(self.rows.len())?);
        for row in &self.rows {
            if row.len() != self.metadata.column_count {
                return Err(CodecError::InvalidValue(format!(
                    "row has {} values, metadata declares {} columns",
                    row.len(),
                    self.metadata.column_count
                )));
            }
            for (i, value) in row.values().iter().enumerate() {
                let cell = match self.metadata.columns.get(i) {
                    Some(column) => column.ty.serialize(value)?,
                    None => match value {
                        Value::Null => None,
                        Value::Blob(bytes) => Some(Bytes::copy_from_slice(bytes)),
                        other => {
                            return Err(CodecError::InvalidValue(format!(
                                "untyped column holds {}",
                                other.kind()
                            )))
                        }
                    },
                };
                buf.write_bytes(cell.as_deref())?;
            }
        }
        Ok(())
    }
}

impl IntoIterator for ResultSet {
    type Item = Row;
    type IntoIter = std::vec::IntoIter<Row>;

    fn into_iter(self) -> Self::IntoIter {
        self.rows.into_iter()
    }
}
