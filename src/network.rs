//! Network topology to template builder
//!
//! Turns a small declarative topology configuration into a complete
//! CloudFormation-style template body: one VPC, its additional CIDR block
//! associations, subnets, per-subnet route tables, and the internet/NAT
//! gateways implied by the subnet specifications.
//!
//! The builder is a pure function of its configuration: no randomness, no
//! network calls, and identical input yields byte-identical output. It
//! validates that every declared CIDR parses; subnet CIDRs being disjoint
//! and contained in the VPC range is the caller's responsibility and is not
//! checked here.

use ipnet::Ipv4Net;
use serde_json::{json, Map, Value};

use crate::{Error, Result};

/// Output key under which the builder's template exposes the VPC id
pub const VPC_ID_OUTPUT: &str = "VpcId";

/// Output key under which the template exposes a subnet's id
pub fn subnet_id_output_key(subnet_name: &str) -> String {
    format!("{}SubnetId", logical_id(subnet_name))
}

/// Default-route target for a subnet
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Gateway {
    /// Route 0.0.0.0/0 through the VPC's internet gateway
    InternetGateway,
    /// Route 0.0.0.0/0 through a NAT gateway declared on another subnet
    NatGateway,
}

/// Declarative specification of one subnet
#[derive(Clone, Debug)]
pub struct SubnetConfig {
    /// Subnet name, used to derive logical ids and output keys
    pub name: String,
    /// Subnet CIDR block (e.g., "192.168.32.0/20")
    pub cidr: String,
    /// Whether instances launched here get a public IP
    pub map_public_ip_on_launch: bool,
    /// Whether this subnet hosts a NAT gateway
    pub has_nat_gateway: bool,
    /// Availability zone the subnet is placed in
    pub availability_zone: String,
    /// Where this subnet's default route points
    pub default_gateway: Gateway,
}

/// Declarative specification of the whole VPC
#[derive(Clone, Debug)]
pub struct VpcConfig {
    /// Primary VPC CIDR block
    pub cidr: String,
    /// Additional CIDR blocks associated with the VPC
    pub additional_cidr_blocks: Vec<String>,
    /// Subnets to create, in declaration order
    pub subnets: Vec<SubnetConfig>,
}

impl VpcConfig {
    /// First subnet that maps public IPs on launch, if any
    pub fn public_subnet(&self) -> Option<&SubnetConfig> {
        self.subnets.iter().find(|s| s.map_public_ip_on_launch)
    }

    /// First subnet that does not map public IPs on launch, if any
    pub fn private_subnet(&self) -> Option<&SubnetConfig> {
        self.subnets.iter().find(|s| !s.map_public_ip_on_launch)
    }

    /// Look up a subnet by name
    pub fn subnet(&self, name: &str) -> Option<&SubnetConfig> {
        self.subnets.iter().find(|s| s.name == name)
    }
}

/// A built network template, ready to hand to the stack factory
#[derive(Clone, Debug, PartialEq)]
pub struct NetworkTemplate {
    body: Value,
}

impl NetworkTemplate {
    /// Serialize the template body to JSON
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(&self.body).map_err(|e| Error::serialization(e.to_string()))
    }

    /// The template body as a JSON value
    pub fn body(&self) -> &Value {
        &self.body
    }
}

/// Builds a network template from a [`VpcConfig`]
pub struct NetworkTemplateBuilder {
    vpc: VpcConfig,
}

impl NetworkTemplateBuilder {
    /// Create a builder for the given topology configuration
    pub fn new(vpc: VpcConfig) -> Self {
        Self { vpc }
    }

    /// Build the template
    ///
    /// Fails with [`Error::Topology`] when a declared CIDR does not parse or
    /// when a subnet routes to a NAT gateway but no subnet declares one.
    /// This runs before any provider call, so a bad configuration never
    /// leaves partial infrastructure behind.
    pub fn build(&self) -> Result<NetworkTemplate> {
        self.validate()?;

        let mut resources = Map::new();

        resources.insert(
            "Vpc".to_string(),
            json!({
                "Type": "AWS::EC2::VPC",
                "Properties": {
                    "CidrBlock": self.vpc.cidr,
                    "EnableDnsSupport": true,
                    "EnableDnsHostnames": true,
                }
            }),
        );

        let cidr_association_ids: Vec<String> = self
            .vpc
            .additional_cidr_blocks
            .iter()
            .enumerate()
            .map(|(i, block)| {
                let id = format!("VpcCidrBlock{}", i + 1);
                resources.insert(
                    id.clone(),
                    json!({
                        "Type": "AWS::EC2::VPCCidrBlock",
                        "Properties": {
                            "VpcId": { "Ref": "Vpc" },
                            "CidrBlock": block,
                        }
                    }),
                );
                id
            })
            .collect();

        if self.needs_internet_gateway() {
            resources.insert(
                "InternetGateway".to_string(),
                json!({ "Type": "AWS::EC2::InternetGateway" }),
            );
            resources.insert(
                "VpcGatewayAttachment".to_string(),
                json!({
                    "Type": "AWS::EC2::VPCGatewayAttachment",
                    "Properties": {
                        "VpcId": { "Ref": "Vpc" },
                        "InternetGatewayId": { "Ref": "InternetGateway" },
                    }
                }),
            );
        }

        for subnet in &self.vpc.subnets {
            self.add_subnet(&mut resources, subnet, &cidr_association_ids)?;
        }

        let mut outputs = Map::new();
        outputs.insert(
            VPC_ID_OUTPUT.to_string(),
            json!({ "Value": { "Ref": "Vpc" } }),
        );
        for subnet in &self.vpc.subnets {
            outputs.insert(
                subnet_id_output_key(&subnet.name),
                json!({ "Value": { "Ref": format!("{}Subnet", logical_id(&subnet.name)) } }),
            );
        }

        Ok(NetworkTemplate {
            body: json!({
                "AWSTemplateFormatVersion": "2010-09-09",
                "Description": "Network topology for integration test stacks",
                "Resources": Value::Object(resources),
                "Outputs": Value::Object(outputs),
            }),
        })
    }

    fn validate(&self) -> Result<()> {
        parse_cidr(&self.vpc.cidr)?;
        for block in &self.vpc.additional_cidr_blocks {
            parse_cidr(block)?;
        }
        for subnet in &self.vpc.subnets {
            parse_cidr(&subnet.cidr)?;
        }

        let has_nat = self.vpc.subnets.iter().any(|s| s.has_nat_gateway);
        let wants_nat = self
            .vpc
            .subnets
            .iter()
            .any(|s| s.default_gateway == Gateway::NatGateway);
        if wants_nat && !has_nat {
            return Err(Error::topology(
                "a subnet routes to a NAT gateway but no subnet declares one",
            ));
        }
        Ok(())
    }

    fn needs_internet_gateway(&self) -> bool {
        // NAT gateways need internet egress too
        self.vpc
            .subnets
            .iter()
            .any(|s| s.default_gateway == Gateway::InternetGateway || s.has_nat_gateway)
    }

    fn add_subnet(
        &self,
        resources: &mut Map<String, Value>,
        subnet: &SubnetConfig,
        cidr_association_ids: &[String],
    ) -> Result<()> {
        let id = logical_id(&subnet.name);
        let subnet_id = format!("{id}Subnet");

        let mut subnet_resource = json!({
            "Type": "AWS::EC2::Subnet",
            "Properties": {
                "VpcId": { "Ref": "Vpc" },
                "CidrBlock": subnet.cidr,
                "AvailabilityZone": subnet.availability_zone,
                "MapPublicIpOnLaunch": subnet.map_public_ip_on_launch,
            }
        });
        // A subnet in an additional CIDR range cannot exist before the
        // association does; depend on all of them rather than resolving
        // which range the subnet falls in.
        if !cidr_association_ids.is_empty() {
            subnet_resource["DependsOn"] = json!(cidr_association_ids);
        }
        resources.insert(subnet_id.clone(), subnet_resource);

        resources.insert(
            format!("{id}RouteTable"),
            json!({
                "Type": "AWS::EC2::RouteTable",
                "Properties": { "VpcId": { "Ref": "Vpc" } }
            }),
        );
        resources.insert(
            format!("{id}RouteTableAssociation"),
            json!({
                "Type": "AWS::EC2::SubnetRouteTableAssociation",
                "Properties": {
                    "SubnetId": { "Ref": subnet_id },
                    "RouteTableId": { "Ref": format!("{id}RouteTable") },
                }
            }),
        );

        if subnet.has_nat_gateway {
            resources.insert(
                format!("{id}NatGatewayEip"),
                json!({
                    "Type": "AWS::EC2::EIP",
                    "Properties": { "Domain": "vpc" }
                }),
            );
            resources.insert(
                format!("{id}NatGateway"),
                json!({
                    "Type": "AWS::EC2::NatGateway",
                    "Properties": {
                        "AllocationId": { "Fn::GetAtt": [format!("{id}NatGatewayEip"), "AllocationId"] },
                        "SubnetId": { "Ref": subnet_id },
                    }
                }),
            );
        }

        let route = match subnet.default_gateway {
            Gateway::InternetGateway => json!({
                "Type": "AWS::EC2::Route",
                "DependsOn": "VpcGatewayAttachment",
                "Properties": {
                    "RouteTableId": { "Ref": format!("{id}RouteTable") },
                    "DestinationCidrBlock": "0.0.0.0/0",
                    "GatewayId": { "Ref": "InternetGateway" },
                }
            }),
            Gateway::NatGateway => {
                let nat_subnet = self
                    .vpc
                    .subnets
                    .iter()
                    .find(|s| s.has_nat_gateway)
                    .ok_or_else(|| {
                        Error::topology("a subnet routes to a NAT gateway but no subnet declares one")
                    })?;
                json!({
                    "Type": "AWS::EC2::Route",
                    "Properties": {
                        "RouteTableId": { "Ref": format!("{id}RouteTable") },
                        "DestinationCidrBlock": "0.0.0.0/0",
                        "NatGatewayId": { "Ref": format!("{}NatGateway", logical_id(&nat_subnet.name)) },
                    }
                })
            }
        };
        resources.insert(format!("{id}DefaultRoute"), route);

        Ok(())
    }
}

/// Parse a CIDR string, mapping failures to a topology error
pub(crate) fn parse_cidr(cidr: &str) -> Result<Ipv4Net> {
    cidr.parse::<Ipv4Net>()
        .map_err(|e| Error::topology(format!("invalid CIDR '{cidr}': {e}")))
}

fn logical_id(name: &str) -> String {
    name.chars().filter(|c| c.is_ascii_alphanumeric()).collect()
}
