use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

use crate::{formats::ValidationError, holder::HolderCredential};

/// An AnonCreds (or Indy) proof request.
///
/// Referents are kept in a sorted map, so they are always reported in the same order.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ProofRequest {
    pub name: String,
    pub version: String,
    pub nonce: String,
    #[serde(default)]
    pub requested_attributes: BTreeMap<String, AttrSpec>,
    #[serde(default)]
    pub requested_predicates: BTreeMap<String, PredSpec>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub non_revoked: Option<NonRevoked>,
}

impl ProofRequest {
    /// Checks that do not follow from the shape of the request alone.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.nonce.is_empty() || !self.nonce.bytes().all(|b| b.is_ascii_digit()) {
            return Err(ValidationError::new("nonce", "expected a decimal string"));
        }

        for (referent, spec) in &self.requested_attributes {
            spec.validate()
                .map_err(|e| e.within(&format!("requested_attributes.{referent}")))?;
        }

        Ok(())
    }
}

/// A requested attribute, or group of attributes that must come from the same credential.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct AttrSpec {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub names: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub restrictions: Vec<Restriction>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub non_revoked: Option<NonRevoked>,
}

impl AttrSpec {
    pub fn names(&self) -> Vec<String> {
        match (&self.name, &self.names) {
            (Some(name), _) => vec![name.clone()],
            (None, Some(names)) => names.clone(),
            (None, None) => Vec::new(),
        }
    }

    fn validate(&self) -> Result<(), ValidationError> {
        match (&self.name, &self.names) {
            (Some(_), Some(_)) => Err(ValidationError::new(
                ".",
                "`name` and `names` are mutually exclusive",
            )),
            (None, None) => Err(ValidationError::new(".", "one of `name` or `names` is required")),
            (None, Some(names)) if names.is_empty() => {
                Err(ValidationError::new("names", "expected at least one attribute name"))
            }
            _ => Ok(()),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct PredSpec {
    pub name: String,
    pub p_type: PredicateType,
    pub p_value: i64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub restrictions: Vec<Restriction>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub non_revoked: Option<NonRevoked>,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum PredicateType {
    #[serde(rename = ">=")]
    GreaterOrEqual,
    #[serde(rename = ">")]
    Greater,
    #[serde(rename = "<=")]
    LessOrEqual,
    #[serde(rename = "<")]
    Less,
}

impl PredicateType {
    pub fn holds(self, value: i64, bound: i64) -> bool {
        match self {
            Self::GreaterOrEqual => value >= bound,
            Self::Greater => value > bound,
            Self::LessOrEqual => value <= bound,
            Self::Less => value < bound,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct NonRevoked {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to: Option<u64>,
}

const RESTRICTION_KEYS: [&str; 6] = [
    "schema_id",
    "schema_issuer_did",
    "schema_name",
    "schema_version",
    "issuer_did",
    "cred_def_id",
];

/// A conjunction of conditions a credential must meet.
///
/// Besides the identifier keys, a restriction may pin an attribute value with
/// `attr::<name>::value` or require its presence with `attr::<name>::marker`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(try_from = "BTreeMap<String, String>", into = "BTreeMap<String, String>")]
pub struct Restriction(BTreeMap<String, String>);

#[derive(Debug, thiserror::Error)]
#[error("unknown restriction `{0}`")]
pub struct UnknownRestriction(String);

enum Condition<'a> {
    Identifier(&'a str),
    AttrValue(&'a str),
    AttrMarker(&'a str),
}

fn parse_condition(key: &str) -> Option<Condition<'_>> {
    if RESTRICTION_KEYS.contains(&key) {
        return Some(Condition::Identifier(key));
    }

    let attr = key.strip_prefix("attr::")?;
    if let Some(name) = attr.strip_suffix("::value") {
        return Some(Condition::AttrValue(name));
    }
    attr.strip_suffix("::marker").map(Condition::AttrMarker)
}

impl TryFrom<BTreeMap<String, String>> for Restriction {
    type Error = UnknownRestriction;

    fn try_from(map: BTreeMap<String, String>) -> Result<Self, Self::Error> {
        if let Some(key) = map.keys().find(|key| parse_condition(key).is_none()) {
            return Err(UnknownRestriction(key.clone()));
        }
        Ok(Self(map))
    }
}

impl From<Restriction> for BTreeMap<String, String> {
    fn from(Restriction(map): Restriction) -> Self {
        map
    }
}

impl Restriction {
    pub fn cred_def_id(id: impl Into<String>) -> Self {
        Self(BTreeMap::from([("cred_def_id".to_owned(), id.into())]))
    }

    /// Whether `credential` meets every condition.
    pub fn matches(&self, credential: &HolderCredential) -> bool {
        self.0.iter().all(|(key, expected)| match parse_condition(key) {
            Some(Condition::Identifier(key)) => {
                identifier(credential, key).is_some_and(|actual| actual == expected)
            }
            Some(Condition::AttrValue(name)) => {
                credential.attr(name).is_some_and(|actual| actual == expected)
            }
            Some(Condition::AttrMarker(name)) => credential.attr(name).is_some(),
            None => false,
        })
    }
}

/// Identifier values derived from the credential's schema and definition ids.
///
/// Schema ids read `<issuer>:2:<name>:<version>`, definition ids `<issuer>:3:CL:...`.
fn identifier<'a>(credential: &'a HolderCredential, key: &str) -> Option<&'a str> {
    let schema_part = |i: usize| {
        credential
            .schema_id
            .as_deref()
            .and_then(|id| id.split(':').nth(i))
    };

    match key {
        "cred_def_id" => credential.cred_def_id.as_deref(),
        "schema_id" => credential.schema_id.as_deref(),
        "schema_issuer_did" => schema_part(0),
        "schema_name" => schema_part(2),
        "schema_version" => schema_part(3),
        "issuer_did" => credential
            .cred_def_id
            .as_deref()
            .and_then(|id| id.split(':').next()),
        _ => None,
    }
}

/// The outer shape of a presentation produced for a proof request.
#[derive(Clone, Debug, Deserialize)]
#[allow(dead_code)]
pub(crate) struct ProofBody {
    pub proof: Json,
    pub requested_proof: Json,
    pub identifiers: Vec<Json>,
}
