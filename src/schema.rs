//! State schema descriptors and the registry that loads them.
//!
//! Every store keeps a JSON descriptor at
//! `state/<operator>/<partition>/[<store>/]_metadata/schema`. The descriptor
//! names the operator kind, the key and value field lists, the row
//! serializer, and the state format version. The format version is written
//! when the checkpoint is created and is never guessed from data.
//!
//! The registry loads the descriptor of **every** partition once per query,
//! before any partition data is read, and requires all of them to agree. A
//! descriptor that cannot be parsed fails the whole query with
//! [`StateError::CorruptSchema`].

use crate::checkpoint::ResolvedQuery;
use crate::datum::Serializer;
use crate::error::{Result, StateError};
use crate::options::{JoinSide, StoreSelector};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Only descriptor layout version this reader understands.
pub const DESCRIPTOR_VERSION: u32 = 1;

/// Declared type of a field.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    Bool,
    Int,
    Long,
    Double,
    String,
    Struct(Vec<Field>),
}

/// A named, typed field of a key or value schema.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: DataType,
    #[serde(default = "default_nullable")]
    pub nullable: bool,
}

const fn default_nullable() -> bool {
    true
}

impl Field {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            nullable: true,
        }
    }

    /// Same field, marked non-nullable.
    #[must_use]
    pub fn required(mut self) -> Self {
        self.nullable = false;
        self
    }
}

/// Kind of stateful operator that owns a store.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperatorKind {
    Aggregation,
    SessionWindow,
    Dedup,
    DedupWithinWatermark,
    ArbitraryState,
    StreamJoin,
}

/// State format version tag.
///
/// Its meaning is operator specific: for arbitrary state, `V1` keeps user
/// fields flat next to the timeout and `V2` nests them under `group_state`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FormatVersion {
    V1,
    V2,
}

impl FormatVersion {
    fn from_raw(v: u8) -> Option<Self> {
        match v {
            1 => Some(Self::V1),
            2 => Some(Self::V2),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_u8(self) -> u8 {
        match self {
            Self::V1 => 1,
            Self::V2 => 2,
        }
    }
}

/// On-disk layout of a schema descriptor file.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaDescriptor {
    pub version: u32,
    pub operator: OperatorKind,
    pub format_version: u8,
    pub serializer: Serializer,
    pub key_schema: Vec<Field>,
    pub value_schema: Vec<Field>,
}

impl SchemaDescriptor {
    pub fn new(operator: OperatorKind, key_schema: Vec<Field>, value_schema: Vec<Field>) -> Self {
        Self {
            version: DESCRIPTOR_VERSION,
            operator,
            format_version: 2,
            serializer: Serializer::Postcard,
            key_schema,
            value_schema,
        }
    }

    #[must_use]
    pub fn with_format_version(mut self, v: u8) -> Self {
        self.format_version = v;
        self
    }

    #[must_use]
    pub fn with_serializer(mut self, serializer: Serializer) -> Self {
        self.serializer = serializer;
        self
    }
}

/// Validated, immutable schema of one store.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StateSchema {
    operator: OperatorKind,
    format_version: FormatVersion,
    serializer: Serializer,
    key_fields: Vec<Field>,
    value_fields: Vec<Field>,
}

impl StateSchema {
    fn from_descriptor(desc: SchemaDescriptor, path: &Path) -> Result<Self> {
        if desc.version != DESCRIPTOR_VERSION {
            return Err(StateError::corrupt_schema(
                path,
                format!("unsupported descriptor version {}", desc.version),
            ));
        }
        let format_version = FormatVersion::from_raw(desc.format_version).ok_or_else(|| {
            StateError::corrupt_schema(
                path,
                format!("unknown state format version {}", desc.format_version),
            )
        })?;
        if desc.key_schema.is_empty() {
            return Err(StateError::corrupt_schema(path, "key schema has no fields"));
        }
        Ok(Self {
            operator: desc.operator,
            format_version,
            serializer: desc.serializer,
            key_fields: desc.key_schema,
            value_fields: desc.value_schema,
        })
    }

    #[must_use]
    pub const fn operator(&self) -> OperatorKind {
        self.operator
    }

    #[must_use]
    pub const fn format_version(&self) -> FormatVersion {
        self.format_version
    }

    #[must_use]
    pub const fn serializer(&self) -> Serializer {
        self.serializer
    }

    #[must_use]
    pub fn key_fields(&self) -> &[Field] {
        &self.key_fields
    }

    #[must_use]
    pub fn value_fields(&self) -> &[Field] {
        &self.value_fields
    }
}

/// Names of the four physical stores behind a stream-stream join.
#[must_use]
pub fn join_store_names(side: JoinSide) -> (String, String) {
    (
        format!("{}-keyToNumValues", side.as_str()),
        format!("{}-keyWithIndexToValue", side.as_str()),
    )
}

/// Schemas needed to answer one query, loaded once before partition work.
#[derive(Clone, Debug)]
pub enum QuerySchemas {
    /// One store: the operator's default store or a store named explicitly.
    Single {
        store: Option<String>,
        schema: Arc<StateSchema>,
    },
    /// Both physical stores of one logical join side.
    JoinSide {
        side: JoinSide,
        key_to_num_values: Arc<StateSchema>,
        key_with_index_to_value: Arc<StateSchema>,
    },
}

/// Loads schema descriptors from a checkpoint.
pub struct SchemaRegistry;

impl SchemaRegistry {
    /// Descriptor path for one store of one partition.
    #[must_use]
    pub fn descriptor_path(
        root: &Path,
        operator_id: u64,
        partition_id: u32,
        store: Option<&str>,
    ) -> PathBuf {
        let mut path = root
            .join("state")
            .join(operator_id.to_string())
            .join(partition_id.to_string());
        if let Some(store) = store {
            path.push(store);
        }
        path.join("_metadata").join("schema")
    }

    /// Load and validate a single descriptor.
    ///
    /// # Errors
    /// [`StateError::InvalidCheckpoint`] if the descriptor does not exist,
    /// [`StateError::CorruptSchema`] if it cannot be read or parsed.
    pub fn load(
        root: &Path,
        operator_id: u64,
        partition_id: u32,
        store: Option<&str>,
    ) -> Result<StateSchema> {
        let path = Self::descriptor_path(root, operator_id, partition_id, store);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(StateError::invalid_checkpoint(
                    &path,
                    format!(
                        "no state schema for operator {operator_id}, partition {partition_id}{}",
                        store.map(|s| format!(", store {s}")).unwrap_or_default()
                    ),
                ));
            }
            Err(e) => return Err(StateError::corrupt_schema(&path, e.to_string())),
        };
        let desc: SchemaDescriptor = serde_json::from_slice(&bytes)
            .map_err(|e| StateError::corrupt_schema(&path, e.to_string()))?;
        StateSchema::from_descriptor(desc, &path)
    }

    /// Load the schemas a resolved query needs, checking every partition.
    ///
    /// # Errors
    /// Fails with [`StateError::CorruptSchema`] if any partition's descriptor
    /// is unreadable or disagrees with partition 0, and with
    /// [`StateError::InvalidOption`] if a join side is requested for an
    /// operator that is not a stream-stream join.
    pub fn load_all(query: &ResolvedQuery) -> Result<QuerySchemas> {
        match &query.store_selector {
            StoreSelector::Default => Ok(QuerySchemas::Single {
                store: None,
                schema: Self::load_consistent(query, None)?,
            }),
            StoreSelector::Store(name) => Ok(QuerySchemas::Single {
                store: Some(name.clone()),
                schema: Self::load_consistent(query, Some(name))?,
            }),
            StoreSelector::JoinSide(side) => {
                let (counts, values) = join_store_names(*side);
                let key_to_num_values = Self::load_consistent(query, Some(&counts))?;
                let key_with_index_to_value = Self::load_consistent(query, Some(&values))?;
                for schema in [&key_to_num_values, &key_with_index_to_value] {
                    if schema.operator() != OperatorKind::StreamJoin {
                        return Err(StateError::invalid_option(
                            "join_side",
                            format!(
                                "operator {} is a {:?} operator, not a stream-stream join",
                                query.operator_id,
                                schema.operator()
                            ),
                        ));
                    }
                }
                Ok(QuerySchemas::JoinSide {
                    side: *side,
                    key_to_num_values,
                    key_with_index_to_value,
                })
            }
        }
    }

    fn load_consistent(query: &ResolvedQuery, store: Option<&str>) -> Result<Arc<StateSchema>> {
        let root = query.checkpoint.root();
        let first = Self::load(root, query.operator_id, 0, store)?;
        for partition_id in 1..query.num_partitions {
            let schema = Self::load(root, query.operator_id, partition_id, store)?;
            if schema != first {
                return Err(StateError::corrupt_schema(
                    Self::descriptor_path(root, query.operator_id, partition_id, store),
                    "descriptor disagrees with partition 0",
                ));
            }
        }
        debug!(
            operator_id = query.operator_id,
            store = store.unwrap_or("default"),
            operator = ?first.operator(),
            format_version = first.format_version().as_u8(),
            partitions = query.num_partitions,
            "loaded state schema"
        );
        Ok(Arc::new(first))
    }
}
