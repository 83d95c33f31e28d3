//! Operator-specific row mapping.
//!
//! Raw store pairs are positional value lists. A [`RowMapper`] turns one pair
//! into the `key`/`value` structs the relation exposes for its operator kind,
//! and names the key columns that the partition router hashes.
//!
//! | Operator                 | key                              | value                                  |
//! |--------------------------|----------------------------------|----------------------------------------|
//! | `aggregation`            | grouping columns                 | accumulators (v1 drops repeated keys)  |
//! | `session_window`         | grouping columns                 | accumulators + window struct           |
//! | `dedup`                  | distinguishing columns           | empty                                  |
//! | `dedup_within_watermark` | distinguishing columns           | `expires_at_ms` only when requested    |
//! | `arbitrary_state`        | grouping columns                 | `group_state` struct + timeout         |
//! | `stream_join` side       | join keys                        | input row without `matched`            |
//!
//! Shapes are validated once, when the mapper is built from the loaded
//! schema; a descriptor that does not fit its operator is a corrupt schema.
//! Per-row failures after that are decode errors.

pub mod join;

use crate::checkpoint::ResolvedQuery;
use crate::datum::{Datum, Serializer, StructValue};
use crate::error::{Result, StateError};
use crate::options::JoinSide;
use crate::schema::{
    DataType, Field, FormatVersion, OperatorKind, QuerySchemas, SchemaRegistry, StateSchema,
    join_store_names,
};
use crate::store::PartitionStoreReader;
use join::JoinSideMapper;
use std::sync::Arc;

/// Value field holding the eviction deadline of watermark-bounded dedup.
pub const DEDUP_EXPIRY_FIELD: &str = "expires_at_ms";
/// Value field holding the timeout of arbitrary per-key state.
pub const TIMEOUT_FIELD: &str = "timeout_timestamp";
/// Value field nesting user state in format version 2.
pub const GROUP_STATE_FIELD: &str = "group_state";
/// Raw key fields bounding a session window.
pub const SESSION_START_FIELD: &str = "session_start";
pub const SESSION_END_FIELD: &str = "session_end";
/// Output value field carrying the session window bounds.
pub const SESSION_WINDOW_FIELD: &str = "session_window";

/// One mapped state entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MappedRow {
    pub key: StructValue,
    pub value: StructValue,
}

/// Converts raw pairs of one store into typed rows.
pub trait RowMapper: Send + Sync {
    fn key_fields(&self) -> &[Field];
    fn value_fields(&self) -> &[Field];
    /// Output key columns hashed by the partition router, in hash order.
    fn routing_columns(&self) -> &[String];
    /// # Errors
    /// [`StateError::Decode`] if the bytes do not fit the store schema.
    fn map(&self, key: &[u8], value: &[u8]) -> Result<MappedRow>;
}

/// Raw key/value layout of one physical store.
#[derive(Clone, Debug)]
pub(crate) struct RawShape {
    serializer: Serializer,
    key: Vec<Field>,
    value: Vec<Field>,
}

impl RawShape {
    fn of(schema: &StateSchema) -> Self {
        Self {
            serializer: schema.serializer(),
            key: schema.key_fields().to_vec(),
            value: schema.value_fields().to_vec(),
        }
    }

    fn decode_key(&self, bytes: &[u8]) -> Result<Vec<Datum>> {
        self.serializer.decode(bytes, &self.key)
    }

    fn decode_value(&self, bytes: &[u8]) -> Result<Vec<Datum>> {
        self.serializer.decode(bytes, &self.value)
    }
}

fn names(fields: &[Field]) -> Vec<String> {
    fields.iter().map(|f| f.name.clone()).collect()
}

fn position(fields: &[Field], name: &str) -> Option<usize> {
    fields.iter().position(|f| f.name == name)
}

fn long_field(name: &str) -> Field {
    Field::new(name, DataType::Long)
}

/// Reads a physical store exactly as stored, internal fields included.
pub struct RawStoreMapper {
    shape: RawShape,
    routing: Vec<String>,
}

impl RawStoreMapper {
    fn new(schema: &StateSchema, store: &str) -> Self {
        let shape = RawShape::of(schema);
        // keyWithIndexToValue keys end with the per-key slot index, which the
        // join never hashes.
        let routing_fields = if store.ends_with("-keyWithIndexToValue")
            && shape.key.last().is_some_and(|f| f.name == join::INDEX_FIELD)
        {
            &shape.key[..shape.key.len() - 1]
        } else {
            &shape.key[..]
        };
        let routing = names(routing_fields);
        Self { shape, routing }
    }
}

impl RowMapper for RawStoreMapper {
    fn key_fields(&self) -> &[Field] {
        &self.shape.key
    }

    fn value_fields(&self) -> &[Field] {
        &self.shape.value
    }

    fn routing_columns(&self) -> &[String] {
        &self.routing
    }

    fn map(&self, key: &[u8], value: &[u8]) -> Result<MappedRow> {
        Ok(MappedRow {
            key: StructValue::from_parts(&self.shape.key, self.shape.decode_key(key)?),
            value: StructValue::from_parts(&self.shape.value, self.shape.decode_value(value)?),
        })
    }
}

/// Streaming aggregation. Format v1 values repeat the grouping columns ahead
/// of the accumulators; v2 values hold accumulators only.
pub struct AggregationMapper {
    shape: RawShape,
    value_fields: Vec<Field>,
    value_offset: usize,
    routing: Vec<String>,
}

impl AggregationMapper {
    fn new(schema: &StateSchema) -> std::result::Result<Self, String> {
        let shape = RawShape::of(schema);
        let value_offset = match schema.format_version() {
            FormatVersion::V1 => {
                let n = shape.key.len();
                if shape.value.len() < n
                    || shape.value[..n]
                        .iter()
                        .zip(&shape.key)
                        .any(|(v, k)| v.name != k.name)
                {
                    return Err(
                        "format v1 aggregation values must start with the grouping columns".into(),
                    );
                }
                n
            }
            FormatVersion::V2 => 0,
        };
        Ok(Self {
            value_fields: shape.value[value_offset..].to_vec(),
            routing: names(&shape.key),
            shape,
            value_offset,
        })
    }
}

impl RowMapper for AggregationMapper {
    fn key_fields(&self) -> &[Field] {
        &self.shape.key
    }

    fn value_fields(&self) -> &[Field] {
        &self.value_fields
    }

    fn routing_columns(&self) -> &[String] {
        &self.routing
    }

    fn map(&self, key: &[u8], value: &[u8]) -> Result<MappedRow> {
        let key_values = self.shape.decode_key(key)?;
        let mut values = self.shape.decode_value(value)?;
        values.drain(..self.value_offset);
        Ok(MappedRow {
            key: StructValue::from_parts(&self.shape.key, key_values),
            value: StructValue::from_parts(&self.value_fields, values),
        })
    }
}

/// Session-window aggregation: the raw key ends with the session bounds,
/// which move into the value as one `session_window {start, end}` struct.
pub struct SessionWindowMapper {
    shape: RawShape,
    key_fields: Vec<Field>,
    value_fields: Vec<Field>,
    routing: Vec<String>,
}

impl SessionWindowMapper {
    fn new(schema: &StateSchema) -> std::result::Result<Self, String> {
        let shape = RawShape::of(schema);
        let n = shape.key.len();
        let bounds_ok = n >= 3
            && shape.key[n - 2].name == SESSION_START_FIELD
            && shape.key[n - 1].name == SESSION_END_FIELD
            && shape.key[n - 2..]
                .iter()
                .all(|f| f.data_type == DataType::Long);
        if !bounds_ok {
            return Err(format!(
                "session window keys must end with `{SESSION_START_FIELD}` and `{SESSION_END_FIELD}` (long) after at least one grouping column"
            ));
        }
        let key_fields = shape.key[..n - 2].to_vec();
        let mut value_fields = shape.value.clone();
        value_fields.push(
            Field::new(
                SESSION_WINDOW_FIELD,
                DataType::Struct(vec![long_field("start"), long_field("end")]),
            )
            .required(),
        );
        Ok(Self {
            routing: names(&key_fields),
            key_fields,
            value_fields,
            shape,
        })
    }
}

impl RowMapper for SessionWindowMapper {
    fn key_fields(&self) -> &[Field] {
        &self.key_fields
    }

    fn value_fields(&self) -> &[Field] {
        &self.value_fields
    }

    fn routing_columns(&self) -> &[String] {
        &self.routing
    }

    fn map(&self, key: &[u8], value: &[u8]) -> Result<MappedRow> {
        let mut key_values = self.shape.decode_key(key)?;
        let end = key_values.pop().unwrap_or(Datum::Null);
        let start = key_values.pop().unwrap_or(Datum::Null);
        let mut values = self.shape.decode_value(value)?;
        values.push(Datum::Struct(vec![start, end]));
        Ok(MappedRow {
            key: StructValue::from_parts(&self.key_fields, key_values),
            value: StructValue::from_parts(&self.value_fields, values),
        })
    }
}

/// Deduplication. The watermark-bounded variant keeps an eviction deadline in
/// the value that is hidden unless internal fields are requested.
pub struct DedupMapper {
    shape: RawShape,
    value_fields: Vec<Field>,
    hidden: Option<usize>,
    routing: Vec<String>,
}

impl DedupMapper {
    fn new(schema: &StateSchema, include_internal: bool) -> std::result::Result<Self, String> {
        let shape = RawShape::of(schema);
        let hidden = match schema.operator() {
            OperatorKind::DedupWithinWatermark => {
                let idx = position(&shape.value, DEDUP_EXPIRY_FIELD)
                    .filter(|&i| shape.value[i].data_type == DataType::Long)
                    .ok_or_else(|| {
                        format!("watermark dedup values need a long `{DEDUP_EXPIRY_FIELD}` field")
                    })?;
                (!include_internal).then_some(idx)
            }
            _ => None,
        };
        let value_fields = shape
            .value
            .iter()
            .enumerate()
            .filter(|(i, _)| Some(*i) != hidden)
            .map(|(_, f)| f.clone())
            .collect();
        Ok(Self {
            routing: names(&shape.key),
            shape,
            value_fields,
            hidden,
        })
    }
}

impl RowMapper for DedupMapper {
    fn key_fields(&self) -> &[Field] {
        &self.shape.key
    }

    fn value_fields(&self) -> &[Field] {
        &self.value_fields
    }

    fn routing_columns(&self) -> &[String] {
        &self.routing
    }

    fn map(&self, key: &[u8], value: &[u8]) -> Result<MappedRow> {
        let key_values = self.shape.decode_key(key)?;
        let mut values = self.shape.decode_value(value)?;
        if let Some(idx) = self.hidden {
            values.remove(idx);
        }
        Ok(MappedRow {
            key: StructValue::from_parts(&self.shape.key, key_values),
            value: StructValue::from_parts(&self.value_fields, values),
        })
    }
}

/// Where arbitrary-state user fields sit in the raw value.
#[derive(Clone, Copy, Debug)]
enum StateLayout {
    /// v1: user fields flat, timeout at `timeout` among them.
    Flat { timeout: usize },
    /// v2: `group_state` struct and timeout at the given positions.
    Nested { group_state: usize, timeout: usize },
}

/// Arbitrary per-key state with timeout, normalised to
/// `{group_state: {..user fields..}, timeout_timestamp}` for both formats.
pub struct ArbitraryStateMapper {
    shape: RawShape,
    value_fields: Vec<Field>,
    layout: StateLayout,
    routing: Vec<String>,
}

impl ArbitraryStateMapper {
    fn new(schema: &StateSchema) -> std::result::Result<Self, String> {
        let shape = RawShape::of(schema);
        let timeout = position(&shape.value, TIMEOUT_FIELD)
            .filter(|&i| shape.value[i].data_type == DataType::Long)
            .ok_or_else(|| format!("arbitrary state values need a long `{TIMEOUT_FIELD}` field"))?;

        let (layout, user_fields) = match schema.format_version() {
            FormatVersion::V1 => {
                let user: Vec<Field> = shape
                    .value
                    .iter()
                    .enumerate()
                    .filter(|(i, _)| *i != timeout)
                    .map(|(_, f)| f.clone())
                    .collect();
                (StateLayout::Flat { timeout }, user)
            }
            FormatVersion::V2 => {
                let group_state = position(&shape.value, GROUP_STATE_FIELD)
                    .filter(|_| shape.value.len() == 2)
                    .ok_or_else(|| {
                        format!(
                            "format v2 arbitrary state values must be `{GROUP_STATE_FIELD}` and `{TIMEOUT_FIELD}`"
                        )
                    })?;
                let DataType::Struct(user) = &shape.value[group_state].data_type else {
                    return Err(format!("`{GROUP_STATE_FIELD}` must be a struct"));
                };
                (
                    StateLayout::Nested {
                        group_state,
                        timeout,
                    },
                    user.clone(),
                )
            }
        };
        let value_fields = vec![
            Field::new(GROUP_STATE_FIELD, DataType::Struct(user_fields)),
            shape.value[timeout].clone(),
        ];
        Ok(Self {
            routing: names(&shape.key),
            shape,
            value_fields,
            layout,
        })
    }
}

impl RowMapper for ArbitraryStateMapper {
    fn key_fields(&self) -> &[Field] {
        &self.shape.key
    }

    fn value_fields(&self) -> &[Field] {
        &self.value_fields
    }

    fn routing_columns(&self) -> &[String] {
        &self.routing
    }

    fn map(&self, key: &[u8], value: &[u8]) -> Result<MappedRow> {
        let key_values = self.shape.decode_key(key)?;
        let mut values = self.shape.decode_value(value)?;
        let (group_state, timeout) = match self.layout {
            StateLayout::Flat { timeout } => {
                let timeout = values.remove(timeout);
                (Datum::Struct(values), timeout)
            }
            StateLayout::Nested {
                group_state,
                timeout,
            } => (
                std::mem::replace(&mut values[group_state], Datum::Null),
                std::mem::replace(&mut values[timeout], Datum::Null),
            ),
        };
        Ok(MappedRow {
            key: StructValue::from_parts(&self.shape.key, key_values),
            value: StructValue::from_parts(&self.value_fields, vec![group_state, timeout]),
        })
    }
}

/// Build the mapper for a single store.
///
/// A store read by explicit name always uses its raw schema.
fn single_store_mapper(
    schema: &StateSchema,
    store: Option<&str>,
    include_internal: bool,
) -> std::result::Result<Arc<dyn RowMapper>, String> {
    if let Some(store) = store {
        return Ok(Arc::new(RawStoreMapper::new(schema, store)));
    }
    Ok(match schema.operator() {
        OperatorKind::Aggregation => Arc::new(AggregationMapper::new(schema)?),
        OperatorKind::SessionWindow => Arc::new(SessionWindowMapper::new(schema)?),
        OperatorKind::Dedup | OperatorKind::DedupWithinWatermark => {
            Arc::new(DedupMapper::new(schema, include_internal)?)
        }
        OperatorKind::ArbitraryState => Arc::new(ArbitraryStateMapper::new(schema)?),
        OperatorKind::StreamJoin => {
            return Err("stream-stream join state has no default store".into());
        }
    })
}

/// Produces the mapped rows of one partition for a query.
#[derive(Clone)]
pub enum RowSource {
    Single {
        store: Option<String>,
        mapper: Arc<dyn RowMapper>,
    },
    JoinSide {
        side: JoinSide,
        mapper: Arc<JoinSideMapper>,
    },
}

impl RowSource {
    /// Pick and validate the mapper for loaded schemas.
    ///
    /// # Errors
    /// [`StateError::CorruptSchema`] if a descriptor's fields do not fit its
    /// operator kind.
    pub fn for_query(query: &ResolvedQuery, schemas: &QuerySchemas) -> Result<Self> {
        let shape_error = |store: Option<&str>, message: String| {
            StateError::corrupt_schema(
                SchemaRegistry::descriptor_path(query.checkpoint.root(), query.operator_id, 0, store),
                message,
            )
        };
        match schemas {
            QuerySchemas::Single { store, schema } => {
                let mapper =
                    single_store_mapper(schema, store.as_deref(), query.include_internal_fields)
                        .map_err(|m| shape_error(store.as_deref(), m))?;
                Ok(Self::Single {
                    store: store.clone(),
                    mapper,
                })
            }
            QuerySchemas::JoinSide {
                side,
                key_to_num_values,
                key_with_index_to_value,
            } => {
                let mapper = JoinSideMapper::new(key_to_num_values, key_with_index_to_value)
                    .map_err(|m| shape_error(Some(&join_store_names(*side).1), m))?;
                Ok(Self::JoinSide {
                    side: *side,
                    mapper: Arc::new(mapper),
                })
            }
        }
    }

    #[must_use]
    pub fn key_fields(&self) -> &[Field] {
        match self {
            Self::Single { mapper, .. } => mapper.key_fields(),
            Self::JoinSide { mapper, .. } => mapper.key_fields(),
        }
    }

    #[must_use]
    pub fn value_fields(&self) -> &[Field] {
        match self {
            Self::Single { mapper, .. } => mapper.value_fields(),
            Self::JoinSide { mapper, .. } => mapper.value_fields(),
        }
    }

    #[must_use]
    pub fn routing_columns(&self) -> &[String] {
        match self {
            Self::Single { mapper, .. } => mapper.routing_columns(),
            Self::JoinSide { mapper, .. } => mapper.routing_columns(),
        }
    }

    /// Read and map every entry of one partition at the query's version.
    ///
    /// # Errors
    /// I/O errors surface as-is; undecodable entries fail with
    /// [`StateError::Decode`].
    pub fn read_partition(
        &self,
        query: &ResolvedQuery,
        reader: &PartitionStoreReader,
        partition_id: u32,
    ) -> Result<Vec<MappedRow>> {
        let version = query.state_version();
        match self {
            Self::Single { store, mapper } => {
                let dir = query.store_dir(partition_id, store.as_deref());
                let snapshot = reader.open(&dir, partition_id, version)?;
                reader
                    .scan(&snapshot)?
                    .map(|pair| pair.and_then(|(k, v)| mapper.map(&k, &v)))
                    .collect()
            }
            Self::JoinSide { side, mapper } => {
                let (counts_store, values_store) = join_store_names(*side);
                let counts = reader.open(
                    &query.store_dir(partition_id, Some(&counts_store)),
                    partition_id,
                    version,
                )?;
                let values = reader.open(
                    &query.store_dir(partition_id, Some(&values_store)),
                    partition_id,
                    version,
                )?;
                mapper.compose(reader.scan(&counts)?, reader.scan(&values)?)
            }
        }
    }
}
