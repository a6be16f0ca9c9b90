//! Run configuration surface
//!
//! A [`RunConfig`] is filled once by the embedding test suite and read by
//! the layer chain; the orchestrator never mutates it. Per-layer
//! `existing_*` entries substitute a pre-existing stack for that layer,
//! which skips creation and deletion for it. A layer whose dependents read
//! its outputs cannot be substituted without also supplying the matching
//! override block - that combination is rejected when the dependent layer
//! is derived.

/// Values a dependent layer needs when the network layer is borrowed
///
/// A borrowed network stack's outputs are not known to the orchestrator,
/// so the caller supplies them explicitly.
#[derive(Clone, Debug)]
pub struct NetworkOverrides {
    /// VPC id the database and compute stacks attach to
    pub vpc_id: String,
    /// Subnet id the compute host is placed in
    pub subnet_id: String,
    /// CIDR block of that subnet
    pub subnet_cidr: String,
}

/// Values the compute layer needs when the database layer is borrowed
#[derive(Clone, Debug)]
pub struct DatabaseOverrides {
    /// Security group granting client access to the database
    pub client_security_group: String,
    /// Database endpoint host
    pub endpoint: String,
    /// Reference to the stored admin password secret
    pub secret_reference: String,
    /// Database admin user name
    pub admin_username: String,
}

/// Read-only configuration for one provisioning run
#[derive(Clone, Debug)]
pub struct RunConfig {
    /// Target deployment region
    pub region: String,
    /// Opaque credential handle, consumed by the caller when constructing
    /// the provider collaborators
    pub credential: Option<String>,
    /// OS family used for AMI resolution (e.g., "alinux2")
    pub os_family: String,
    /// Suffix appended to every generated stack name
    pub stack_name_suffix: Option<String>,
    /// EC2 key pair name for the compute host
    pub key_name: String,
    /// Use this AMI instead of resolving the latest one
    pub custom_ami: Option<String>,
    /// Custom bootstrap cookbook URL for the compute host
    pub custom_cookbook_url: Option<String>,
    /// Use this pre-existing stack as the network layer
    pub existing_network_stack: Option<String>,
    /// Use this pre-existing stack as the database layer
    pub existing_database_stack: Option<String>,
    /// Use this pre-existing stack as the compute layer
    pub existing_compute_stack: Option<String>,
    /// Use this pre-existing secret as the munge key
    pub existing_munge_key_handle: Option<String>,
    /// Skip all deletion at teardown, abandoning the stacks
    pub preserve_on_teardown: bool,
    /// Required when `existing_network_stack` is set and a later layer is created
    pub network_overrides: Option<NetworkOverrides>,
    /// Required when `existing_database_stack` is set and the compute layer is created
    pub database_overrides: Option<DatabaseOverrides>,
    /// Serialized template body for the database stack, passed through opaquely
    pub database_template: String,
    /// Serialized template body for the compute stack, passed through opaquely
    pub compute_template: String,
    /// The two custom subnet CIDR blocks the database stack carves out
    pub database_subnet_cidrs: [String; 2],
}

impl RunConfig {
    /// Create a configuration for the given region with empty defaults
    pub fn new(region: impl Into<String>) -> Self {
        Self {
            region: region.into(),
            credential: None,
            os_family: "alinux2".to_string(),
            stack_name_suffix: None,
            key_name: String::new(),
            custom_ami: None,
            custom_cookbook_url: None,
            existing_network_stack: None,
            existing_database_stack: None,
            existing_compute_stack: None,
            existing_munge_key_handle: None,
            preserve_on_teardown: false,
            network_overrides: None,
            database_overrides: None,
            database_template: String::new(),
            compute_template: String::new(),
            database_subnet_cidrs: [String::new(), String::new()],
        }
    }
}
