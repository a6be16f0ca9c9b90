//! The layer composer
//!
//! Chains the three stack layers: network -> database -> compute. Each
//! layer either borrows a pre-existing stack named in the run
//! configuration (never created, never deleted, outputs unreadable) or
//! derives its parameters from the previous layer's outputs plus generated
//! identifiers and secrets, and is created through the stack factory.
//!
//! Layer constructors are plain async functions of an explicit
//! [`LayerContext`] and the prior layers' handles; there is no implicit
//! per-scope caching.

use std::sync::Arc;

use tracing::info;

use crate::config::RunConfig;
use crate::descriptor::{Capability, Parameter, StackDescriptor};
use crate::factory::StackFactory;
use crate::naming::{
    cidr_prefix_len, generate_stack_name, random_admin_password, random_cluster_name,
    random_host_address,
};
use crate::network::{self, NetworkTemplateBuilder, VpcConfig, VPC_ID_OUTPUT};
use crate::provider::{CloudProvider, ImageResolver, SecretStore};
use crate::secrets::{SecretHandle, SecretProvisioner};
use crate::{Error, Result};

/// Semantic prefix for the network layer's stack name
pub const NETWORK_STACK_PREFIX: &str = "integ-tests-vpc-database";
/// Semantic prefix for the database layer's stack name
pub const DATABASE_STACK_PREFIX: &str = "integ-tests-slurm-db";
/// Semantic prefix for the compute layer's stack name
pub const COMPUTE_STACK_PREFIX: &str = "integ-tests-slurm-dbd";

/// Database-layer output: client security group id
pub const DATABASE_CLIENT_SECURITY_GROUP_OUTPUT: &str = "DatabaseClientSecurityGroup";
/// Database-layer output: reference to the admin password secret
pub const DATABASE_SECRET_ARN_OUTPUT: &str = "DatabaseSecretArn";
/// Database-layer output: database endpoint host
pub const DATABASE_HOST_OUTPUT: &str = "DatabaseHost";
/// Database-layer output: admin user name
pub const DATABASE_ADMIN_USER_OUTPUT: &str = "DatabaseAdminUser";

/// Accounting database name on the compute host
pub const DATABASE_NAME: &str = "slurm_database";
/// Port slurmdbd listens on
pub const SLURMDBD_PORT: &str = "6819";
/// Instance type for the compute host
pub const COMPUTE_INSTANCE_TYPE: &str = "c5.large";
/// Image family used when resolving the compute AMI
pub const COMPUTE_IMAGE_FAMILY: &str = "pcluster";

/// Result of building one layer: borrowed by name, or created and owned
#[derive(Clone, Debug)]
pub enum LayerHandle {
    /// A pre-existing stack referenced by name; never created or deleted
    /// by this run, outputs unknown
    Borrowed {
        /// Name of the pre-existing stack
        name: String,
        /// Region the stack lives in
        region: String,
    },
    /// A stack created by this run, tracked for teardown
    Created(StackDescriptor),
}

impl LayerHandle {
    /// Stack name
    pub fn name(&self) -> &str {
        match self {
            LayerHandle::Borrowed { name, .. } => name,
            LayerHandle::Created(stack) => stack.name(),
        }
    }

    /// Stack region
    pub fn region(&self) -> &str {
        match self {
            LayerHandle::Borrowed { region, .. } => region,
            LayerHandle::Created(stack) => stack.region(),
        }
    }

    /// Whether this layer references a pre-existing stack
    pub fn is_borrowed(&self) -> bool {
        matches!(self, LayerHandle::Borrowed { .. })
    }

    /// Look up an output value; always `None` for borrowed stacks
    pub fn output(&self, key: &str) -> Option<&str> {
        match self {
            LayerHandle::Borrowed { .. } => None,
            LayerHandle::Created(stack) => stack.output(key),
        }
    }

    /// The underlying descriptor, when this run created the stack
    pub fn descriptor(&self) -> Option<&StackDescriptor> {
        match self {
            LayerHandle::Borrowed { .. } => None,
            LayerHandle::Created(stack) => Some(stack),
        }
    }

    fn require_output(&self, key: &str) -> Result<&str> {
        self.output(key).ok_or_else(|| {
            Error::provisioning(
                self.name(),
                self.region(),
                format!("expected stack output '{key}' is missing"),
            )
        })
    }
}

/// Everything the layer constructors need, threaded explicitly
pub struct LayerContext {
    /// Read-only run configuration
    pub config: RunConfig,
    /// Stack factory owning the lifecycle of every created stack
    pub factory: StackFactory,
    secrets: SecretProvisioner,
    image_resolver: Arc<dyn ImageResolver>,
}

impl LayerContext {
    /// Create a context from the run configuration and collaborators
    pub fn new(
        config: RunConfig,
        provider: Arc<dyn CloudProvider>,
        secret_store: Arc<dyn SecretStore>,
        image_resolver: Arc<dyn ImageResolver>,
    ) -> Self {
        Self {
            config,
            factory: StackFactory::new(provider),
            secrets: SecretProvisioner::new(secret_store),
            image_resolver,
        }
    }
}

/// The network layer: VPC, subnets, gateways
#[derive(Clone, Debug)]
pub struct NetworkLayer {
    handle: LayerHandle,
    topology: Option<VpcConfig>,
}

impl NetworkLayer {
    /// The layer's stack handle
    pub fn handle(&self) -> &LayerHandle {
        &self.handle
    }

    /// VPC id, from stack outputs or from the configured overrides
    pub fn vpc_id<'a>(&'a self, config: &'a RunConfig) -> Result<&'a str> {
        if self.handle.is_borrowed() {
            return Ok(&self.require_overrides(config)?.vpc_id);
        }
        self.handle.require_output(VPC_ID_OUTPUT)
    }

    /// Subnet id and CIDR the compute host is placed in
    ///
    /// For an owned layer this is the topology's public subnet: its id from
    /// the stack outputs, its CIDR from the configuration. For a borrowed
    /// layer both come from the configured overrides.
    pub fn compute_subnet<'a>(&'a self, config: &'a RunConfig) -> Result<(&'a str, &'a str)> {
        if self.handle.is_borrowed() {
            let overrides = self.require_overrides(config)?;
            return Ok((&overrides.subnet_id, &overrides.subnet_cidr));
        }
        let topology = self.topology.as_ref().ok_or_else(|| {
            Error::invalid_config("owned network layer is missing its topology configuration")
        })?;
        let subnet = topology.public_subnet().ok_or_else(|| {
            Error::topology("network topology has no public subnet for the compute host")
        })?;
        let subnet_id = self
            .handle
            .require_output(&network::subnet_id_output_key(&subnet.name))?;
        Ok((subnet_id, &subnet.cidr))
    }

    /// Provider-assigned id of the topology's public subnet
    ///
    /// `None` when the layer is borrowed or the topology has no public
    /// subnet.
    pub fn public_subnet_id(&self) -> Option<&str> {
        let subnet = self.topology.as_ref()?.public_subnet()?;
        self.handle
            .output(&network::subnet_id_output_key(&subnet.name))
    }

    /// Provider-assigned id of the topology's private subnet
    pub fn private_subnet_id(&self) -> Option<&str> {
        let subnet = self.topology.as_ref()?.private_subnet()?;
        self.handle
            .output(&network::subnet_id_output_key(&subnet.name))
    }

    fn require_overrides<'a>(
        &self,
        config: &'a RunConfig,
    ) -> Result<&'a crate::config::NetworkOverrides> {
        config.network_overrides.as_ref().ok_or_else(|| {
            Error::invalid_config(
                "network layer is borrowed but no network overrides were supplied",
            )
        })
    }
}

/// The database layer: serverless accounting database
#[derive(Clone, Debug)]
pub struct DatabaseLayer {
    handle: LayerHandle,
}

/// Connection values the compute layer pulls from the database layer
struct DatabaseConnection<'a> {
    client_security_group: &'a str,
    secret_reference: &'a str,
    endpoint: &'a str,
    admin_username: &'a str,
}

impl DatabaseLayer {
    /// The layer's stack handle
    pub fn handle(&self) -> &LayerHandle {
        &self.handle
    }

    fn connection<'a>(&'a self, config: &'a RunConfig) -> Result<DatabaseConnection<'a>> {
        if self.handle.is_borrowed() {
            let overrides = config.database_overrides.as_ref().ok_or_else(|| {
                Error::invalid_config(
                    "database layer is borrowed but no database overrides were supplied",
                )
            })?;
            return Ok(DatabaseConnection {
                client_security_group: &overrides.client_security_group,
                secret_reference: &overrides.secret_reference,
                endpoint: &overrides.endpoint,
                admin_username: &overrides.admin_username,
            });
        }
        Ok(DatabaseConnection {
            client_security_group: self
                .handle
                .require_output(DATABASE_CLIENT_SECURITY_GROUP_OUTPUT)?,
            secret_reference: self.handle.require_output(DATABASE_SECRET_ARN_OUTPUT)?,
            endpoint: self.handle.require_output(DATABASE_HOST_OUTPUT)?,
            admin_username: self.handle.require_output(DATABASE_ADMIN_USER_OUTPUT)?,
        })
    }
}

/// The compute layer: external slurmdbd host
#[derive(Clone, Debug)]
pub struct ComputeLayer {
    handle: LayerHandle,
}

impl ComputeLayer {
    /// The layer's stack handle
    pub fn handle(&self) -> &LayerHandle {
        &self.handle
    }
}

/// Build the network layer from a topology configuration
pub async fn network_layer(ctx: &mut LayerContext, topology: VpcConfig) -> Result<NetworkLayer> {
    if let Some(existing) = &ctx.config.existing_network_stack {
        info!(stack = %existing, "Using pre-existing network stack");
        return Ok(NetworkLayer {
            handle: LayerHandle::Borrowed {
                name: existing.clone(),
                region: ctx.config.region.clone(),
            },
            topology: None,
        });
    }

    info!("Creating VPC stack for database");
    let template = NetworkTemplateBuilder::new(topology.clone()).build()?;
    let stack = StackDescriptor::new(
        generate_stack_name(NETWORK_STACK_PREFIX, ctx.config.stack_name_suffix.as_deref()),
        ctx.config.region.as_str(),
        template.to_json()?,
    );
    let created = ctx.factory.create(stack).await?;
    Ok(NetworkLayer {
        handle: LayerHandle::Created(created),
        topology: Some(topology),
    })
}

/// Build the database layer on top of the network layer
pub async fn database_layer(
    ctx: &mut LayerContext,
    network: &NetworkLayer,
) -> Result<DatabaseLayer> {
    if let Some(existing) = &ctx.config.existing_database_stack {
        info!(stack = %existing, "Using pre-existing database stack");
        return Ok(DatabaseLayer {
            handle: LayerHandle::Borrowed {
                name: existing.clone(),
                region: ctx.config.region.clone(),
            },
        });
    }

    info!("Creating stack for database");
    let cluster_name = random_cluster_name();
    let admin_password = random_admin_password();
    let vpc_id = network.vpc_id(&ctx.config)?.to_string();

    let parameters = vec![
        Parameter::new("ClusterName", cluster_name),
        Parameter::new("Vpc", vpc_id),
        Parameter::new("AdminPasswordSecretString", admin_password),
        Parameter::new("Subnet1CidrBlock", ctx.config.database_subnet_cidrs[0].as_str()),
        Parameter::new("Subnet2CidrBlock", ctx.config.database_subnet_cidrs[1].as_str()),
    ];

    let stack = StackDescriptor::new(
        generate_stack_name(DATABASE_STACK_PREFIX, ctx.config.stack_name_suffix.as_deref()),
        ctx.config.region.as_str(),
        ctx.config.database_template.clone(),
    )
    .with_parameters(parameters)
    .with_capabilities(vec![Capability::AutoExpand]);

    let created = ctx.factory.create(stack).await?;
    Ok(DatabaseLayer {
        handle: LayerHandle::Created(created),
    })
}

/// Provision or borrow the munge-key secret
pub async fn munge_key(ctx: &LayerContext) -> Result<SecretHandle> {
    if let Some(existing) = &ctx.config.existing_munge_key_handle {
        return Ok(SecretProvisioner::use_existing(existing.clone()));
    }
    ctx.secrets.provision(&ctx.config.region).await
}

/// Build the compute layer on top of the network and database layers
pub async fn compute_layer(
    ctx: &mut LayerContext,
    network: &NetworkLayer,
    database: &DatabaseLayer,
    munge_key: &SecretHandle,
) -> Result<ComputeLayer> {
    if let Some(existing) = &ctx.config.existing_compute_stack {
        info!(stack = %existing, "Using pre-existing slurmdbd stack");
        return Ok(ComputeLayer {
            handle: LayerHandle::Borrowed {
                name: existing.clone(),
                region: ctx.config.region.clone(),
            },
        });
    }

    info!("Creating stack for slurmdbd");
    let ami = match &ctx.config.custom_ami {
        Some(ami) => ami.clone(),
        None => resolve_image(ctx).await?,
    };

    let vpc_id = network.vpc_id(&ctx.config)?.to_string();
    let (subnet_id, subnet_cidr) = network.compute_subnet(&ctx.config)?;
    let subnet = network::parse_cidr(subnet_cidr)?;
    let private_ip = random_host_address(&subnet)?;
    let private_prefix = cidr_prefix_len(subnet_cidr)?;
    let db = database.connection(&ctx.config)?;

    let mut parameters = vec![
        Parameter::new("AmiId", ami),
        Parameter::new("DBMSClientSG", db.client_security_group),
        Parameter::new("DBMSDatabaseName", DATABASE_NAME),
        Parameter::new("DBMSPasswordSecretArn", db.secret_reference),
        Parameter::new("DBMSUri", db.endpoint),
        Parameter::new("DBMSUsername", db.admin_username),
        Parameter::new("InstanceType", COMPUTE_INSTANCE_TYPE),
        Parameter::new("KeyName", ctx.config.key_name.as_str()),
        Parameter::new("MungeKeySecretArn", munge_key.reference()),
        Parameter::new("PrivateIp", private_ip.to_string()),
        Parameter::new("PrivatePrefix", private_prefix),
        Parameter::new("SubnetId", subnet_id),
        Parameter::new("SlurmdbdPort", SLURMDBD_PORT),
        Parameter::new("VPCId", vpc_id),
        Parameter::new("EnableSlurmdbdSystemService", "true"),
    ];
    // Omitted entirely when not configured; the template defaults it
    if let Some(url) = &ctx.config.custom_cookbook_url {
        parameters.push(Parameter::new("CustomCookbookUrl", url.as_str()));
    }

    let stack = StackDescriptor::new(
        generate_stack_name(COMPUTE_STACK_PREFIX, ctx.config.stack_name_suffix.as_deref()),
        ctx.config.region.as_str(),
        ctx.config.compute_template.clone(),
    )
    .with_parameters(parameters)
    .with_capabilities(vec![Capability::AutoExpand, Capability::NamedIam]);

    let created = ctx.factory.create(stack).await?;
    Ok(ComputeLayer {
        handle: LayerHandle::Created(created),
    })
}

async fn resolve_image(ctx: &LayerContext) -> Result<String> {
    ctx.image_resolver
        .resolve(
            &ctx.config.region,
            &ctx.config.os_family,
            COMPUTE_IMAGE_FAMILY,
        )
        .await
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::BTreeMap;
    use std::sync::Mutex;

    use crate::config::{DatabaseOverrides, NetworkOverrides};
    use crate::network::{Gateway, SubnetConfig};
    use crate::provider::{MockCloudProvider, MockImageResolver, MockSecretStore};

    fn topology() -> VpcConfig {
        VpcConfig {
            cidr: "192.168.0.0/17".to_string(),
            additional_cidr_blocks: vec!["192.168.128.0/17".to_string()],
            subnets: vec![
                SubnetConfig {
                    name: "Public".to_string(),
                    cidr: "192.168.32.0/20".to_string(),
                    map_public_ip_on_launch: true,
                    has_nat_gateway: true,
                    availability_zone: "us-east-1a".to_string(),
                    default_gateway: Gateway::InternetGateway,
                },
                SubnetConfig {
                    name: "Private".to_string(),
                    cidr: "192.168.64.0/20".to_string(),
                    map_public_ip_on_launch: false,
                    has_nat_gateway: false,
                    availability_zone: "us-east-1a".to_string(),
                    default_gateway: Gateway::NatGateway,
                },
            ],
        }
    }

    fn base_config() -> RunConfig {
        let mut config = RunConfig::new("us-east-1");
        config.key_name = "integ-tests-key".to_string();
        config.database_template = "{\"db\":\"template\"}".to_string();
        config.compute_template = "{\"dbd\":\"template\"}".to_string();
        config.database_subnet_cidrs = [
            "192.168.96.0/20".to_string(),
            "192.168.112.0/20".to_string(),
        ];
        config
    }

    fn outputs_for(stack: &StackDescriptor) -> BTreeMap<String, String> {
        let mut outputs = BTreeMap::new();
        if stack.name().starts_with(NETWORK_STACK_PREFIX) {
            outputs.insert("VpcId".to_string(), "vpc-0123".to_string());
            outputs.insert("PublicSubnetId".to_string(), "subnet-pub".to_string());
            outputs.insert("PrivateSubnetId".to_string(), "subnet-priv".to_string());
        } else if stack.name().starts_with(DATABASE_STACK_PREFIX) {
            outputs.insert(
                DATABASE_CLIENT_SECURITY_GROUP_OUTPUT.to_string(),
                "sg-db-client".to_string(),
            );
            outputs.insert(
                DATABASE_SECRET_ARN_OUTPUT.to_string(),
                "arn:secret:db-admin".to_string(),
            );
            outputs.insert(
                DATABASE_HOST_OUTPUT.to_string(),
                "db.cluster.local".to_string(),
            );
            outputs.insert(DATABASE_ADMIN_USER_OUTPUT.to_string(), "clusteradmin".to_string());
        }
        outputs
    }

    fn recording_provider(
        submitted: Arc<Mutex<Vec<StackDescriptor>>>,
    ) -> MockCloudProvider {
        let mut provider = MockCloudProvider::new();
        provider.expect_submit_create().returning(move |stack| {
            submitted.lock().unwrap().push(stack.clone());
            Ok(outputs_for(stack))
        });
        provider.expect_submit_delete().returning(|_, _| Ok(()));
        provider
    }

    fn context_with(config: RunConfig, provider: MockCloudProvider) -> LayerContext {
        let mut store = MockSecretStore::new();
        store
            .expect_put()
            .returning(|_, _| Ok("arn:secret:munge-key".to_string()));
        let mut resolver = MockImageResolver::new();
        resolver
            .expect_resolve()
            .returning(|_, _, _| Ok("ami-default".to_string()));
        LayerContext::new(config, Arc::new(provider), Arc::new(store), Arc::new(resolver))
    }

    #[tokio::test]
    async fn database_parameters_derive_from_network_outputs() {
        let submitted = Arc::new(Mutex::new(Vec::new()));
        let mut ctx = context_with(base_config(), recording_provider(Arc::clone(&submitted)));

        let net = network_layer(&mut ctx, topology()).await.unwrap();
        let db = database_layer(&mut ctx, &net).await.unwrap();

        assert!(!db.handle().is_borrowed());
        let stacks = submitted.lock().unwrap();
        let db_stack = &stacks[1];

        let cluster = db_stack.parameter("ClusterName").unwrap();
        assert!(cluster.starts_with("slurm-accounting-"));
        assert_eq!(cluster.len(), "slurm-accounting-".len() + 6);

        assert_eq!(db_stack.parameter("Vpc"), Some("vpc-0123"));
        assert_eq!(db_stack.parameter("Subnet1CidrBlock"), Some("192.168.96.0/20"));
        assert_eq!(db_stack.parameter("Subnet2CidrBlock"), Some("192.168.112.0/20"));

        let password = db_stack.parameter("AdminPasswordSecretString").unwrap();
        assert_eq!(password.len(), 20);
        assert!(password.chars().any(|c| c.is_ascii_uppercase()));
        assert!(password.chars().any(|c| "!$%^()_+".contains(c)));
        assert!(password.chars().any(|c| c.is_ascii_digit()));
        assert!(password.chars().any(|c| c.is_ascii_lowercase()));

        assert_eq!(db_stack.capabilities(), [Capability::AutoExpand].as_slice());
    }

    #[tokio::test]
    async fn owned_network_layer_exposes_subnet_ids() {
        let submitted = Arc::new(Mutex::new(Vec::new()));
        let mut ctx = context_with(base_config(), recording_provider(Arc::clone(&submitted)));

        let net = network_layer(&mut ctx, topology()).await.unwrap();
        assert_eq!(net.public_subnet_id(), Some("subnet-pub"));
        assert_eq!(net.private_subnet_id(), Some("subnet-priv"));
    }

    #[tokio::test]
    async fn borrowed_database_skips_creation_entirely() {
        let mut config = base_config();
        config.existing_database_stack = Some("long-lived-db".to_string());

        let mut provider = MockCloudProvider::new();
        provider.expect_submit_create().times(0);
        let mut ctx = context_with(config, provider);

        // The network layer is not consulted when the database is borrowed,
        // so a borrowed network without overrides is fine here.
        let net = NetworkLayer {
            handle: LayerHandle::Borrowed {
                name: "ext-net".to_string(),
                region: "us-east-1".to_string(),
            },
            topology: None,
        };
        let db = database_layer(&mut ctx, &net).await.unwrap();

        assert!(db.handle().is_borrowed());
        assert_eq!(db.handle().name(), "long-lived-db");
        assert!(db.handle().output(DATABASE_HOST_OUTPUT).is_none());
        assert_eq!(ctx.factory.tracked_len(), 0);
    }

    #[tokio::test]
    async fn compute_parameters_pull_database_outputs_verbatim() {
        let submitted = Arc::new(Mutex::new(Vec::new()));
        let mut ctx = context_with(base_config(), recording_provider(Arc::clone(&submitted)));

        let net = network_layer(&mut ctx, topology()).await.unwrap();
        let db = database_layer(&mut ctx, &net).await.unwrap();
        let key = munge_key(&ctx).await.unwrap();
        let dbd = compute_layer(&mut ctx, &net, &db, &key).await.unwrap();

        assert!(!dbd.handle().is_borrowed());
        let stacks = submitted.lock().unwrap();
        let dbd_stack = &stacks[2];

        assert_eq!(dbd_stack.parameter("AmiId"), Some("ami-default"));
        assert_eq!(dbd_stack.parameter("DBMSClientSG"), Some("sg-db-client"));
        assert_eq!(dbd_stack.parameter("DBMSDatabaseName"), Some("slurm_database"));
        assert_eq!(
            dbd_stack.parameter("DBMSPasswordSecretArn"),
            Some("arn:secret:db-admin")
        );
        assert_eq!(dbd_stack.parameter("DBMSUri"), Some("db.cluster.local"));
        assert_eq!(dbd_stack.parameter("DBMSUsername"), Some("clusteradmin"));
        assert_eq!(dbd_stack.parameter("KeyName"), Some("integ-tests-key"));
        assert_eq!(
            dbd_stack.parameter("MungeKeySecretArn"),
            Some("arn:secret:munge-key")
        );
        assert_eq!(dbd_stack.parameter("SubnetId"), Some("subnet-pub"));
        assert_eq!(dbd_stack.parameter("SlurmdbdPort"), Some("6819"));
        assert_eq!(dbd_stack.parameter("VPCId"), Some("vpc-0123"));
        assert_eq!(dbd_stack.parameter("EnableSlurmdbdSystemService"), Some("true"));
        assert_eq!(dbd_stack.parameter("PrivatePrefix"), Some("20"));

        // Private IP lies inside the public subnet's usable range
        let ip: std::net::Ipv4Addr = dbd_stack.parameter("PrivateIp").unwrap().parse().unwrap();
        let subnet: ipnet::Ipv4Net = "192.168.32.0/20".parse().unwrap();
        assert!(subnet.contains(&ip));
        assert_ne!(ip, subnet.network());
        assert_ne!(ip, subnet.broadcast());

        assert_eq!(
            dbd_stack.capabilities(),
            [Capability::AutoExpand, Capability::NamedIam].as_slice()
        );

        // Not configured, so not sent at all
        assert_eq!(dbd_stack.parameter("CustomCookbookUrl"), None);
    }

    #[tokio::test]
    async fn custom_cookbook_url_is_sent_only_when_configured() {
        let submitted = Arc::new(Mutex::new(Vec::new()));
        let mut config = base_config();
        config.custom_cookbook_url = Some("https://bucket/cookbook.tgz".to_string());
        let mut ctx = context_with(config, recording_provider(Arc::clone(&submitted)));

        let net = network_layer(&mut ctx, topology()).await.unwrap();
        let db = database_layer(&mut ctx, &net).await.unwrap();
        let key = munge_key(&ctx).await.unwrap();
        compute_layer(&mut ctx, &net, &db, &key).await.unwrap();

        let stacks = submitted.lock().unwrap();
        assert_eq!(
            stacks[2].parameter("CustomCookbookUrl"),
            Some("https://bucket/cookbook.tgz")
        );
    }

    #[tokio::test]
    async fn custom_ami_bypasses_the_image_resolver() {
        let submitted = Arc::new(Mutex::new(Vec::new()));
        let mut config = base_config();
        config.custom_ami = Some("ami-custom".to_string());

        let provider = recording_provider(Arc::clone(&submitted));
        let mut store = MockSecretStore::new();
        store
            .expect_put()
            .returning(|_, _| Ok("arn:secret:munge-key".to_string()));
        let mut resolver = MockImageResolver::new();
        resolver.expect_resolve().times(0);
        let mut ctx =
            LayerContext::new(config, Arc::new(provider), Arc::new(store), Arc::new(resolver));

        let net = network_layer(&mut ctx, topology()).await.unwrap();
        let db = database_layer(&mut ctx, &net).await.unwrap();
        let key = munge_key(&ctx).await.unwrap();
        compute_layer(&mut ctx, &net, &db, &key).await.unwrap();

        let stacks = submitted.lock().unwrap();
        assert_eq!(stacks[2].parameter("AmiId"), Some("ami-custom"));
    }

    #[tokio::test]
    async fn borrowed_network_without_overrides_is_a_precondition_violation() {
        let mut config = base_config();
        config.existing_network_stack = Some("ext-net".to_string());
        let mut ctx = context_with(config, MockCloudProvider::new());

        let net = network_layer(&mut ctx, topology()).await.unwrap();
        assert!(net.handle().is_borrowed());

        let err = database_layer(&mut ctx, &net).await.unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));
        assert!(err.to_string().contains("network overrides"));
    }

    #[tokio::test]
    async fn borrowed_network_with_overrides_feeds_dependent_layers() {
        let submitted = Arc::new(Mutex::new(Vec::new()));
        let mut config = base_config();
        config.existing_network_stack = Some("ext-net".to_string());
        config.network_overrides = Some(NetworkOverrides {
            vpc_id: "vpc-external".to_string(),
            subnet_id: "subnet-external".to_string(),
            subnet_cidr: "10.1.0.0/24".to_string(),
        });
        let mut ctx = context_with(config, recording_provider(Arc::clone(&submitted)));

        let net = network_layer(&mut ctx, topology()).await.unwrap();
        let db = database_layer(&mut ctx, &net).await.unwrap();
        let key = munge_key(&ctx).await.unwrap();
        compute_layer(&mut ctx, &net, &db, &key).await.unwrap();

        let stacks = submitted.lock().unwrap();
        // Only the database and compute stacks were created
        assert_eq!(stacks.len(), 2);
        assert_eq!(stacks[0].parameter("Vpc"), Some("vpc-external"));
        assert_eq!(stacks[1].parameter("SubnetId"), Some("subnet-external"));
        assert_eq!(stacks[1].parameter("PrivatePrefix"), Some("24"));
    }

    #[tokio::test]
    async fn borrowed_database_without_overrides_fails_compute_derivation() {
        let submitted = Arc::new(Mutex::new(Vec::new()));
        let mut config = base_config();
        config.existing_database_stack = Some("long-lived-db".to_string());
        let mut ctx = context_with(config, recording_provider(Arc::clone(&submitted)));

        let net = network_layer(&mut ctx, topology()).await.unwrap();
        let db = database_layer(&mut ctx, &net).await.unwrap();
        let key = munge_key(&ctx).await.unwrap();

        let err = compute_layer(&mut ctx, &net, &db, &key).await.unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));
        assert!(err.to_string().contains("database overrides"));
    }

    #[tokio::test]
    async fn borrowed_database_with_overrides_feeds_compute() {
        let submitted = Arc::new(Mutex::new(Vec::new()));
        let mut config = base_config();
        config.existing_database_stack = Some("long-lived-db".to_string());
        config.database_overrides = Some(DatabaseOverrides {
            client_security_group: "sg-override".to_string(),
            endpoint: "db.override.local".to_string(),
            secret_reference: "arn:secret:override".to_string(),
            admin_username: "admin-override".to_string(),
        });
        let mut ctx = context_with(config, recording_provider(Arc::clone(&submitted)));

        let net = network_layer(&mut ctx, topology()).await.unwrap();
        let db = database_layer(&mut ctx, &net).await.unwrap();
        let key = munge_key(&ctx).await.unwrap();
        compute_layer(&mut ctx, &net, &db, &key).await.unwrap();

        let stacks = submitted.lock().unwrap();
        // Network and compute stacks only
        assert_eq!(stacks.len(), 2);
        let dbd_stack = &stacks[1];
        assert_eq!(dbd_stack.parameter("DBMSClientSG"), Some("sg-override"));
        assert_eq!(dbd_stack.parameter("DBMSUri"), Some("db.override.local"));
        assert_eq!(
            dbd_stack.parameter("DBMSPasswordSecretArn"),
            Some("arn:secret:override")
        );
        assert_eq!(dbd_stack.parameter("DBMSUsername"), Some("admin-override"));
    }

    #[tokio::test]
    async fn munge_key_borrow_skips_the_secret_store() {
        let mut config = base_config();
        config.existing_munge_key_handle = Some("arn:secret:pre-existing".to_string());

        let provider = MockCloudProvider::new();
        let mut store = MockSecretStore::new();
        store.expect_put().times(0);
        let mut resolver = MockImageResolver::new();
        resolver.expect_resolve().returning(|_, _, _| Ok("ami".to_string()));
        let ctx =
            LayerContext::new(config, Arc::new(provider), Arc::new(store), Arc::new(resolver));

        let key = munge_key(&ctx).await.unwrap();
        assert!(key.plaintext().is_none());
        assert_eq!(key.reference(), "arn:secret:pre-existing");
    }

    #[tokio::test]
    async fn stack_names_embed_the_configured_suffix() {
        let submitted = Arc::new(Mutex::new(Vec::new()));
        let mut config = base_config();
        config.stack_name_suffix = Some("pr42".to_string());
        let mut ctx = context_with(config, recording_provider(Arc::clone(&submitted)));

        let net = network_layer(&mut ctx, topology()).await.unwrap();
        let db = database_layer(&mut ctx, &net).await.unwrap();

        assert!(net.handle().name().starts_with(NETWORK_STACK_PREFIX));
        assert!(net.handle().name().ends_with("-pr42"));
        assert!(db.handle().name().starts_with(DATABASE_STACK_PREFIX));
        assert!(db.handle().name().ends_with("-pr42"));
    }
}
