use jsonschema::JSONSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use serde_json_path::JsonPath;
use tracing::debug;

use crate::utils::NonEmptyVec;

/// A GroupId represents a unique identifier for a group of Input Descriptors.
///
/// This type is also used by the submission requirements to group input descriptors.
pub type GroupId = String;

/// The predicate Feature introduces properties enabling Verifier to request that Holder apply a
/// predicate and return the result.
///
/// See: [https://identity.foundation/presentation-exchange/#predicate-feature](https://identity.foundation/presentation-exchange/#predicate-feature)
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Predicate {
    Required,
    Preferred,
}

/// Input Descriptors describe the information a Verifier requires of a Holder.
///
/// All Input Descriptors MUST be satisfied, unless otherwise specified by submission
/// requirements.
///
/// See: [https://identity.foundation/presentation-exchange/spec/v1.0.0/#input-descriptor-object](https://identity.foundation/presentation-exchange/spec/v1.0.0/#input-descriptor-object)
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct InputDescriptor {
    id: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    schema: Vec<SchemaRef>,
    #[serde(default)]
    constraints: Constraints,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    purpose: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    group: Vec<GroupId>,
}

/// A credential schema the descriptor accepts.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct SchemaRef {
    pub uri: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required: Option<bool>,
}

impl InputDescriptor {
    pub fn new(id: impl Into<String>, constraints: Constraints) -> Self {
        Self {
            id: id.into(),
            constraints,
            ..Default::default()
        }
    }

    /// Return the id of the input descriptor.
    pub fn id(&self) -> &str {
        self.id.as_str()
    }

    pub fn add_schema(mut self, uri: impl Into<String>) -> Self {
        self.schema.push(SchemaRef {
            uri: uri.into(),
            required: None,
        });
        self
    }

    /// Return the groups this descriptor belongs to.
    pub fn groups(&self) -> &[GroupId] {
        &self.group
    }

    pub fn add_to_group(mut self, member: GroupId) -> Self {
        self.group.push(member);
        self
    }

    /// Whether `credential` satisfies this descriptor.
    ///
    /// The credential must be of one of the listed schemas, when any are listed, and
    /// satisfy every constraint field.
    pub fn matches(&self, credential: &Json) -> bool {
        let schema_ok = self.schema.is_empty()
            || self
                .schema
                .iter()
                .any(|schema| credential_has_schema(credential, &schema.uri));

        schema_ok && self.constraints.matches(credential)
    }
}

/// A schema URI matches a credential when it names one of the credential's types, either
/// in full or through its fragment, or one of its contexts.
fn credential_has_schema(credential: &Json, uri: &str) -> bool {
    let fragment = uri.rsplit_once('#').map(|(_, fragment)| fragment);
    let strings = |key: &str| -> Vec<&str> {
        match credential.get(key) {
            Some(Json::String(s)) => vec![s.as_str()],
            Some(Json::Array(values)) => values.iter().filter_map(Json::as_str).collect(),
            _ => Vec::new(),
        }
    };

    strings("type")
        .into_iter()
        .any(|ty| ty == uri || Some(ty) == fragment)
        || strings("@context").into_iter().any(|context| context == uri)
}

/// Constraints are objects used to describe the constraints that a Holder must satisfy to
/// fulfill an Input Descriptor.
///
/// A constraint object MAY be empty, or it may include a `fields` and/or `limit_disclosure`
/// property.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Constraints {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    fields: Vec<ConstraintsField>,
    #[serde(skip_serializing_if = "Option::is_none")]
    limit_disclosure: Option<ConstraintsLimitDisclosure>,
}

impl Constraints {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn matches(&self, credential: &Json) -> bool {
        self.fields.iter().all(|field| field.matches(credential))
    }
}

/// Describes one claim the credential must contain, and optionally the values it may take.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConstraintsField {
    path: NonEmptyVec<JsonPath>,
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    purpose: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    predicate: Option<Predicate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    filter: Option<Json>,
    #[serde(skip_serializing_if = "Option::is_none")]
    optional: Option<bool>,
}

impl From<NonEmptyVec<JsonPath>> for ConstraintsField {
    fn from(path: NonEmptyVec<JsonPath>) -> Self {
        Self {
            path,
            id: None,
            purpose: None,
            predicate: None,
            filter: None,
            optional: None,
        }
    }
}

impl ConstraintsField {
    pub fn new(path: JsonPath) -> ConstraintsField {
        NonEmptyVec::new(path).into()
    }

    pub fn add_path(mut self, path: JsonPath) -> Self {
        self.path.push(path);
        self
    }

    /// If present its value MUST be a JSON Schema descriptor used to filter against
    /// the values returned from evaluation of the JSONPath string expressions in the path array.
    pub fn set_filter(mut self, filter: Json) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn set_optional(mut self, optional: bool) -> Self {
        self.optional = Some(optional);
        self
    }

    pub fn is_optional(&self) -> bool {
        self.optional.unwrap_or(false)
    }

    /// Whether `credential` satisfies this field.
    ///
    /// Paths are tried in order and the first one that selects a value decides. When a filter
    /// is present one of the selected values must validate against it. A field whose paths
    /// select nothing is satisfied only when optional.
    pub fn matches(&self, credential: &Json) -> bool {
        let validator = match self.filter.as_ref().map(JSONSchema::compile) {
            Some(Ok(validator)) => Some(validator),
            Some(Err(e)) => {
                debug!("constraint filter is not a valid JSON schema: {e}");
                return false;
            }
            None => None,
        };

        for path in self.path.iter() {
            let nodes = path.query(credential).all();
            if nodes.is_empty() {
                continue;
            }

            return match &validator {
                Some(validator) => nodes.into_iter().any(|node| validator.is_valid(node)),
                None => true,
            };
        }

        self.is_optional()
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ConstraintsLimitDisclosure {
    Required,
    Preferred,
}
