use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as Json};

use super::input_descriptor::{GroupId, InputDescriptor};
use crate::formats::ValidationError;

/// A presentation definition is a JSON object that describes the information a Verifier
/// requires of a Holder.
///
/// Presentation Definitions are composed of inputs, which describe the forms and details of the
/// proofs they require, and optional sets of selection rules, to allow Holders flexibility
/// in cases where different types of proofs may satisfy an input requirement.
///
/// For more information, see: [https://identity.foundation/presentation-exchange/spec/v1.0.0/#presentation-definition](https://identity.foundation/presentation-exchange/spec/v1.0.0/#presentation-definition)
#[derive(Clone, Default, Debug, Serialize, Deserialize, PartialEq)]
pub struct PresentationDefinition {
    id: String,
    input_descriptors: Vec<InputDescriptor>,
    #[serde(skip_serializing_if = "Option::is_none")]
    submission_requirements: Option<Vec<SubmissionRequirement>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    purpose: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    format: Option<Map<String, Json>>,
}

impl PresentationDefinition {
    pub fn new(id: impl Into<String>, input_descriptor: InputDescriptor) -> Self {
        Self {
            id: id.into(),
            input_descriptors: vec![input_descriptor],
            ..Default::default()
        }
    }

    pub fn id(&self) -> &String {
        &self.id
    }

    pub fn add_input_descriptors(mut self, input_descriptor: InputDescriptor) -> Self {
        self.input_descriptors.push(input_descriptor);
        self
    }

    pub fn input_descriptors(&self) -> &[InputDescriptor] {
        &self.input_descriptors
    }

    pub fn add_submission_requirement(mut self, requirement: SubmissionRequirement) -> Self {
        self.submission_requirements
            .get_or_insert_with(Vec::new)
            .push(requirement);
        self
    }

    pub fn submission_requirements(&self) -> Option<&[SubmissionRequirement]> {
        self.submission_requirements.as_deref()
    }

    /// Checks across input descriptors and submission requirements.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let mut ids = HashSet::new();
        for (i, descriptor) in self.input_descriptors.iter().enumerate() {
            if !ids.insert(descriptor.id()) {
                return Err(ValidationError::new(
                    format!("input_descriptors[{i}].id"),
                    format!("duplicate input descriptor id `{}`", descriptor.id()),
                ));
            }
        }

        let groups: HashSet<&str> = self
            .input_descriptors
            .iter()
            .flat_map(|descriptor| descriptor.groups())
            .map(String::as_str)
            .collect();
        let requirements = self.submission_requirements().unwrap_or_default();
        for (i, requirement) in requirements.iter().enumerate() {
            requirement
                .check_groups(&groups)
                .map_err(|e| e.within(&format!("submission_requirements[{i}]")))?;
        }

        Ok(())
    }

    /// Check that the descriptors in `satisfied` meet the definition's requirements.
    ///
    /// Without submission requirements every input descriptor must be satisfied.
    pub fn evaluate(&self, satisfied: &HashSet<&str>) -> Result<(), SubmissionValidationError> {
        match self.submission_requirements() {
            Some(requirements) => {
                for requirement in requirements {
                    requirement.evaluate(self, satisfied)?;
                }
            }
            None => {
                for descriptor in &self.input_descriptors {
                    if !satisfied.contains(descriptor.id()) {
                        return Err(SubmissionValidationError::MissingRequiredInput(
                            descriptor.id().to_owned(),
                        ));
                    }
                }
            }
        }

        Ok(())
    }

    /// The ids of the input descriptors to submit, in definition order.
    ///
    /// Without submission requirements every satisfied descriptor is submitted. Otherwise
    /// `all` takes every satisfied member of its group and `pick` takes the first `count`,
    /// or at most `max`, of them.
    pub fn select(&self, satisfied: &HashSet<&str>) -> Vec<&str> {
        let ids = self.input_descriptors.iter().map(InputDescriptor::id);
        let Some(requirements) = self.submission_requirements() else {
            return ids.filter(|id| satisfied.contains(id)).collect();
        };

        let mut selected = HashSet::new();
        for requirement in requirements {
            requirement.select(self, satisfied, &mut selected);
        }
        ids.filter(|id| selected.contains(id)).collect()
    }
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct SubmissionRequirementObject {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub purpose: Option<String>,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(untagged)]
pub enum SubmissionRequirementBase {
    From {
        from: GroupId,
        #[serde(flatten)]
        submission_requirement_base: SubmissionRequirementObject,
    },
    FromNested {
        from_nested: Vec<SubmissionRequirement>,
        #[serde(flatten)]
        submission_requirement_base: SubmissionRequirementObject,
    },
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum SubmissionRequirement {
    All(SubmissionRequirementBase),
    Pick(SubmissionRequirementPick),
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct SubmissionRequirementPick {
    #[serde(flatten)]
    pub submission_requirement: SubmissionRequirementBase,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<usize>,
}

impl SubmissionRequirement {
    /// Require every descriptor of `group`.
    pub fn all_from(group: impl Into<GroupId>) -> Self {
        Self::All(SubmissionRequirementBase::From {
            from: group.into(),
            submission_requirement_base: Default::default(),
        })
    }

    /// Require exactly `count` descriptors of `group`.
    pub fn pick_from(group: impl Into<GroupId>, count: usize) -> Self {
        Self::Pick(SubmissionRequirementPick {
            submission_requirement: SubmissionRequirementBase::From {
                from: group.into(),
                submission_requirement_base: Default::default(),
            },
            count: Some(count),
            min: None,
            max: None,
        })
    }

    fn base(&self) -> &SubmissionRequirementBase {
        match self {
            Self::All(base) => base,
            Self::Pick(pick) => &pick.submission_requirement,
        }
    }

    fn check_groups(&self, groups: &HashSet<&str>) -> Result<(), ValidationError> {
        match self.base() {
            SubmissionRequirementBase::From { from, .. } => {
                if groups.contains(from.as_str()) {
                    Ok(())
                } else {
                    Err(ValidationError::new(
                        "from",
                        format!("no input descriptor belongs to group `{from}`"),
                    ))
                }
            }
            SubmissionRequirementBase::FromNested { from_nested, .. } => {
                for (i, nested) in from_nested.iter().enumerate() {
                    nested
                        .check_groups(groups)
                        .map_err(|e| e.within(&format!("from_nested[{i}]")))?;
                }
                Ok(())
            }
        }
    }

    fn select<'a>(
        &self,
        definition: &'a PresentationDefinition,
        satisfied: &HashSet<&str>,
        selected: &mut HashSet<&'a str>,
    ) {
        let limit = match self {
            Self::All(_) => usize::MAX,
            Self::Pick(pick) => pick.count.or(pick.max).unwrap_or(usize::MAX),
        };

        match self.base() {
            SubmissionRequirementBase::From { from, .. } => selected.extend(
                definition
                    .input_descriptors()
                    .iter()
                    .filter(|descriptor| descriptor.groups().contains(from))
                    .map(InputDescriptor::id)
                    .filter(|id| satisfied.contains(id))
                    .take(limit),
            ),
            SubmissionRequirementBase::FromNested { from_nested, .. } => {
                for nested in from_nested
                    .iter()
                    .filter(|nested| nested.evaluate(definition, satisfied).is_ok())
                    .take(limit)
                {
                    nested.select(definition, satisfied, selected);
                }
            }
        }
    }

    /// Whether this requirement can be met using the descriptors in `satisfied`.
    ///
    /// The holder is free to leave out surplus inputs, so `max` never makes a requirement
    /// unsatisfiable; only a shortage does.
    pub fn evaluate(
        &self,
        definition: &PresentationDefinition,
        satisfied: &HashSet<&str>,
    ) -> Result<(), SubmissionValidationError> {
        let (group, available, total) = match self.base() {
            SubmissionRequirementBase::From { from, .. } => {
                let members: Vec<&str> = definition
                    .input_descriptors()
                    .iter()
                    .filter(|descriptor| descriptor.groups().contains(from))
                    .map(InputDescriptor::id)
                    .collect();
                let available = members.iter().filter(|id| satisfied.contains(*id)).count();
                (from.clone(), available, members.len())
            }
            SubmissionRequirementBase::FromNested { from_nested, .. } => {
                let available = from_nested
                    .iter()
                    .filter(|nested| nested.evaluate(definition, satisfied).is_ok())
                    .count();
                ("from_nested".to_owned(), available, from_nested.len())
            }
        };

        let min = match self {
            Self::All(_) => total,
            Self::Pick(pick) => match (pick.count, pick.min) {
                (Some(count), _) => {
                    if available < count {
                        return Err(SubmissionValidationError::SelectionSizeMismatch {
                            group,
                            expected: count,
                            found: available,
                        });
                    }
                    return Ok(());
                }
                (None, min) => min.unwrap_or(0),
            },
        };

        if available < min {
            return Err(SubmissionValidationError::SelectionTooSmall {
                group,
                min,
                found: available,
            });
        }

        Ok(())
    }
}

/// Presentation submission inputs validation error.
#[derive(Debug, thiserror::Error)]
pub enum SubmissionValidationError {
    /// Missing an input required by the presentation definition.
    #[error("missing required input `{0}`")]
    MissingRequiredInput(String),

    /// Input group selection is too small.
    #[error("not enough inputs for group `{group}` (expected at least {min}, found {found})")]
    SelectionTooSmall {
        group: GroupId,
        min: usize,
        found: usize,
    },

    /// Input group selection is of the wrong size.
    #[error("invalid number of inputs for group `{group}` (expected {expected}, found {found})")]
    SelectionSizeMismatch {
        group: GroupId,
        expected: usize,
        found: usize,
    },
}
