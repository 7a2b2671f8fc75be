use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ApiError;

/// Whether an instance is a node or an edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceKind {
    /// A node instance.
    Node,
    /// An edge instance.
    Edge,
}

impl InstanceKind {
    /// Wire name used in the `instanceType` field.
    pub fn as_str(self) -> &'static str {
        match self {
            InstanceKind::Node => "node",
            InstanceKind::Edge => "edge",
        }
    }
}

impl fmt::Display for InstanceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of an instance: `(space, externalId, instanceType)`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceId {
    /// Owning space.
    pub space: String,
    /// External id, unique within the space per kind.
    pub external_id: String,
    /// Node or edge.
    #[serde(rename = "instanceType")]
    pub kind: InstanceKind,
}

impl InstanceId {
    /// Identity of a node.
    pub fn node(space: impl Into<String>, external_id: impl Into<String>) -> Self {
        Self {
            space: space.into(),
            external_id: external_id.into(),
            kind: InstanceKind::Node,
        }
    }

    /// Identity of an edge.
    pub fn edge(space: impl Into<String>, external_id: impl Into<String>) -> Self {
        Self {
            space: space.into(),
            external_id: external_id.into(),
            kind: InstanceKind::Edge,
        }
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({}:{})", self.kind, self.space, self.external_id)
    }
}

/// `(space, externalId)` pointer used for edge types, endpoints and direct relations.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectRef {
    /// Space of the target.
    pub space: String,
    /// External id of the target.
    pub external_id: String,
}

impl DirectRef {
    /// Creates a reference.
    pub fn new(space: impl Into<String>, external_id: impl Into<String>) -> Self {
        Self {
            space: space.into(),
            external_id: external_id.into(),
        }
    }
}

/// View or container the properties of a [`SourceData`] are written through.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewRef {
    /// Always `"view"` on the wire.
    #[serde(rename = "type")]
    pub source_type: String,
    /// Space of the view.
    pub space: String,
    /// External id of the view.
    pub external_id: String,
    /// View version.
    pub version: String,
}

impl ViewRef {
    /// Reference to a view version.
    pub fn view(
        space: impl Into<String>,
        external_id: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            source_type: "view".to_string(),
            space: space.into(),
            external_id: external_id.into(),
            version: version.into(),
        }
    }
}

/// Property value carried in a record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    /// JSON null.
    Null,
    /// Boolean value.
    Bool(bool),
    /// 64-bit signed integer.
    Int(i64),
    /// 64-bit float; must be finite to be sent.
    Float(f64),
    /// Text.
    String(String),
    /// Direct relation to another node.
    Reference(DirectRef),
    /// List of values.
    List(Vec<PropertyValue>),
    /// Nested JSON object.
    Object(BTreeMap<String, PropertyValue>),
}

impl PropertyValue {
    fn non_finite_path(&self, prefix: &str) -> Option<String> {
        match self {
            PropertyValue::Float(v) if !v.is_finite() => Some(prefix.to_string()),
            PropertyValue::List(values) => values
                .iter()
                .enumerate()
                .find_map(|(idx, v)| v.non_finite_path(&format!("{prefix}[{idx}]"))),
            PropertyValue::Object(map) => map
                .iter()
                .find_map(|(key, v)| v.non_finite_path(&format!("{prefix}.{key}"))),
            _ => None,
        }
    }
}

/// Properties written through one source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceData {
    /// View the properties belong to.
    pub source: ViewRef,
    /// Property values keyed by property identifier.
    pub properties: BTreeMap<String, PropertyValue>,
}

impl SourceData {
    /// Empty property set for `source`.
    pub fn new(source: ViewRef) -> Self {
        Self {
            source,
            properties: BTreeMap::new(),
        }
    }

    /// Adds one property.
    pub fn with(mut self, key: impl Into<String>, value: PropertyValue) -> Self {
        self.properties.insert(key.into(), value);
        self
    }
}

/// Node upsert payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    /// Owning space.
    pub space: String,
    /// External id.
    pub external_id: String,
    /// Optimistic-lock version, if the caller wants one.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub existing_version: Option<i64>,
    /// Property sets.
    #[serde(default)]
    pub sources: Vec<SourceData>,
}

impl Node {
    /// Node with no properties.
    pub fn new(space: impl Into<String>, external_id: impl Into<String>) -> Self {
        Self {
            space: space.into(),
            external_id: external_id.into(),
            existing_version: None,
            sources: Vec::new(),
        }
    }

    /// Adds a property set.
    pub fn with_source(mut self, source: SourceData) -> Self {
        self.sources.push(source);
        self
    }
}

/// Edge upsert payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Edge {
    /// Owning space.
    pub space: String,
    /// External id.
    pub external_id: String,
    /// Edge type.
    #[serde(rename = "type")]
    pub edge_type: DirectRef,
    /// Start node.
    pub start_node: DirectRef,
    /// End node.
    pub end_node: DirectRef,
    /// Optimistic-lock version, if the caller wants one.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub existing_version: Option<i64>,
    /// Property sets.
    #[serde(default)]
    pub sources: Vec<SourceData>,
}

impl Edge {
    /// Edge with no properties.
    pub fn new(
        space: impl Into<String>,
        external_id: impl Into<String>,
        edge_type: DirectRef,
        start_node: DirectRef,
        end_node: DirectRef,
    ) -> Self {
        Self {
            space: space.into(),
            external_id: external_id.into(),
            edge_type,
            start_node,
            end_node,
            existing_version: None,
            sources: Vec::new(),
        }
    }

    /// Adds a property set.
    pub fn with_source(mut self, source: SourceData) -> Self {
        self.sources.push(source);
        self
    }
}

/// A node or edge to upsert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "instanceType", rename_all = "lowercase")]
pub enum Record {
    /// Node payload.
    Node(Node),
    /// Edge payload.
    Edge(Edge),
}

impl Record {
    /// Identity projection of the record.
    pub fn id(&self) -> InstanceId {
        match self {
            Record::Node(node) => InstanceId::node(&node.space, &node.external_id),
            Record::Edge(edge) => InstanceId::edge(&edge.space, &edge.external_id),
        }
    }

    fn sources(&self) -> &[SourceData] {
        match self {
            Record::Node(node) => &node.sources,
            Record::Edge(edge) => &edge.sources,
        }
    }
}

impl From<Node> for Record {
    fn from(node: Node) -> Self {
        Record::Node(node)
    }
}

impl From<Edge> for Record {
    fn from(edge: Edge) -> Self {
        Record::Edge(edge)
    }
}

/// Anything the engine can put in a request's `items` array.
pub trait Payload: Serialize + Send + Sync + 'static {
    /// Identity used to key results and failures.
    fn instance_id(&self) -> InstanceId;

    /// Location of the first NaN or infinite number, if any.
    fn non_finite_path(&self) -> Option<String> {
        None
    }
}

impl Payload for Record {
    fn instance_id(&self) -> InstanceId {
        self.id()
    }

    fn non_finite_path(&self) -> Option<String> {
        let id = self.id();
        self.sources().iter().find_map(|source| {
            source.properties.iter().find_map(|(key, value)| {
                value.non_finite_path(&format!("{}:{}/{key}", id.space, id.external_id))
            })
        })
    }
}

impl Payload for InstanceId {
    fn instance_id(&self) -> InstanceId {
        self.clone()
    }
}

/// Server view of an upserted instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppliedInstance {
    /// Owning space.
    pub space: String,
    /// External id.
    pub external_id: String,
    /// Version after the write.
    pub version: i64,
    /// Whether the write changed anything.
    pub was_modified: bool,
    /// Creation time in epoch milliseconds.
    #[serde(default)]
    pub created_time: i64,
    /// Last update time in epoch milliseconds.
    #[serde(default)]
    pub last_updated_time: i64,
}

/// Typed result entry of an upsert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstanceResult {
    /// A node was written.
    Node(AppliedInstance),
    /// An edge was written.
    Edge(AppliedInstance),
}

impl InstanceResult {
    /// Identity of the written instance.
    pub fn id(&self) -> InstanceId {
        match self {
            InstanceResult::Node(n) => InstanceId::node(&n.space, &n.external_id),
            InstanceResult::Edge(e) => InstanceId::edge(&e.space, &e.external_id),
        }
    }

    /// Decodes one apply result by its `instanceType` discriminator.
    pub fn decode(value: &Value) -> Result<Self, ApiError> {
        let kind = instance_kind(value)?;
        let applied: AppliedInstance = serde_json::from_value(value.clone())
            .map_err(|err| ApiError::Decode(format!("{kind} result: {err}")))?;
        Ok(match kind {
            InstanceKind::Node => InstanceResult::Node(applied),
            InstanceKind::Edge => InstanceResult::Edge(applied),
        })
    }
}

impl InstanceId {
    /// Decodes one delete result entry.
    pub fn decode(value: &Value) -> Result<Self, ApiError> {
        instance_kind(value)?;
        serde_json::from_value(value.clone())
            .map_err(|err| ApiError::Decode(format!("identity: {err}")))
    }
}

fn instance_kind(value: &Value) -> Result<InstanceKind, ApiError> {
    match value.get("instanceType").and_then(Value::as_str) {
        Some("node") => Ok(InstanceKind::Node),
        Some("edge") => Ok(InstanceKind::Edge),
        Some(other) => Err(ApiError::Decode(format!("unknown instanceType '{other}'"))),
        None => Err(ApiError::Decode("missing instanceType".to_string())),
    }
}
