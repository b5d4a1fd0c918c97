use serde::Deserialize;

/// Agent-wide settings consulted by the [PresManager](crate::manager::PresManager).
#[derive(Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    /// Construct and send a presentation as soon as a request is received, without waiting
    /// for an explicit action.
    #[serde(alias = "debug.auto_respond_presentation_request")]
    pub auto_respond_presentation_request: bool,
    pub auto_present_source: AutoPresentSource,
}

/// Where a record receiving a presentation request takes its `auto_present` flag from.
///
/// Records created by the request itself always use the agent-wide policy; this only
/// changes what happens to records that already existed, e.g. from an earlier proposal.
#[derive(Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AutoPresentSource {
    /// Existing records keep the flag they were created with.
    #[default]
    Record,
    /// Every record takes `auto_respond_presentation_request` when a request arrives.
    AgentPolicy,
}

impl Config {
    /// The flag a record receiving a request should carry, given the one it already has.
    pub fn auto_present_for(&self, existing: Option<bool>) -> bool {
        match (self.auto_present_source, existing) {
            (AutoPresentSource::Record, Some(existing)) => existing,
            _ => self.auto_respond_presentation_request,
        }
    }
}
