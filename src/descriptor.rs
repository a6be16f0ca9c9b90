//! Stack descriptor value type
//!
//! A [`StackDescriptor`] is the request record for one provisionable stack:
//! name, region, template body, parameters, and capability acknowledgements.
//! Provider-assigned outputs are recorded on it exactly once, when creation
//! succeeds, and are read-only thereafter. A descriptor that references a
//! pre-existing stack carries no template and never gains outputs.

use std::collections::BTreeMap;

/// A single stack parameter, passed opaquely to the provider
///
/// Parameters keep their declaration order; the provider receives them as
/// an ordered list, not a map.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Parameter {
    /// Parameter key (e.g., "ClusterName")
    #[serde(rename = "ParameterKey")]
    pub key: String,
    /// Parameter value
    #[serde(rename = "ParameterValue")]
    pub value: String,
}

impl Parameter {
    /// Create a new parameter
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Provider acknowledgement flags for templates with nested or IAM resources
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Capability {
    /// Template contains macros or nested stacks
    AutoExpand,
    /// Template creates named IAM resources
    NamedIam,
}

impl Capability {
    /// Wire form of the capability flag
    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::AutoExpand => "CAPABILITY_AUTO_EXPAND",
            Capability::NamedIam => "CAPABILITY_NAMED_IAM",
        }
    }
}

/// Request + outputs record for one provisionable stack
#[derive(Clone, Debug)]
pub struct StackDescriptor {
    name: String,
    region: String,
    template: Option<String>,
    parameters: Vec<Parameter>,
    capabilities: Vec<Capability>,
    outputs: Option<BTreeMap<String, String>>,
}

impl StackDescriptor {
    /// Create a descriptor for a stack to be provisioned from a template
    pub fn new(
        name: impl Into<String>,
        region: impl Into<String>,
        template: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            region: region.into(),
            template: Some(template.into()),
            parameters: Vec::new(),
            capabilities: Vec::new(),
            outputs: None,
        }
    }

    /// Create a descriptor referencing a pre-existing stack
    ///
    /// The descriptor carries no template and its outputs are never
    /// populated; the orchestrator does not fetch them.
    pub fn existing(name: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            region: region.into(),
            template: None,
            parameters: Vec::new(),
            capabilities: Vec::new(),
            outputs: None,
        }
    }

    /// Set the parameter list for this stack
    pub fn with_parameters(mut self, parameters: Vec<Parameter>) -> Self {
        self.parameters = parameters;
        self
    }

    /// Set the capability acknowledgements for this stack
    pub fn with_capabilities(mut self, capabilities: Vec<Capability>) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Stack name, unique within the region
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Target region
    pub fn region(&self) -> &str {
        &self.region
    }

    /// Serialized template body, absent for pre-existing stacks
    pub fn template(&self) -> Option<&str> {
        self.template.as_deref()
    }

    /// Parameters in declaration order
    pub fn parameters(&self) -> &[Parameter] {
        &self.parameters
    }

    /// Look up a parameter value by key
    pub fn parameter(&self, key: &str) -> Option<&str> {
        self.parameters
            .iter()
            .find(|p| p.key == key)
            .map(|p| p.value.as_str())
    }

    /// Capability acknowledgements
    pub fn capabilities(&self) -> &[Capability] {
        &self.capabilities
    }

    /// Provider-assigned outputs, present only after successful creation
    pub fn outputs(&self) -> Option<&BTreeMap<String, String>> {
        self.outputs.as_ref()
    }

    /// Look up a single output value by key
    pub fn output(&self, key: &str) -> Option<&str> {
        self.outputs
            .as_ref()
            .and_then(|o| o.get(key))
            .map(String::as_str)
    }

    /// Record provider-assigned outputs after successful creation
    ///
    /// Outputs are write-once: the first write wins and later writes are
    /// rejected in debug builds. Only the stack factory calls this.
    pub(crate) fn record_outputs(&mut self, outputs: BTreeMap<String, String>) {
        debug_assert!(self.outputs.is_none(), "stack outputs are write-once");
        self.outputs.get_or_insert(outputs);
    }
}
