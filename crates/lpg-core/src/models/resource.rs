//! Canonical resource model.
//!
//! Resources are built once by the catalog adapter from loosely typed
//! inventory records and are never mutated afterwards; a poll replaces the
//! whole set.

use super::edge::{PortRange, UsageStatus};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Sources that make an ingress rule reachable from anywhere.
pub const PUBLIC_CIDRS: [&str; 2] = ["0.0.0.0/0", "::/0"];

/// A cloud resource tracked by the inventory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    /// Identifier, unique within a cloud account.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// Resource type.
    pub resource_type: ResourceType,
    /// Region, when the inventory reports one.
    pub region: Option<String>,
    /// Cloud provider.
    pub provider: String,
    /// Resource tags.
    pub tags: BTreeMap<String, String>,
    /// Systems the inventory has this resource tagged to.
    pub systems: BTreeSet<String>,
    /// Relationship-bearing attributes.
    pub attributes: ResourceAttributes,
}

impl Resource {
    /// Creates a resource whose name defaults to its id.
    pub fn new(id: impl Into<String>, resource_type: ResourceType) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            resource_type,
            region: None,
            provider: "aws".to_string(),
            tags: BTreeMap::new(),
            systems: BTreeSet::new(),
            attributes: ResourceAttributes::default(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.systems.insert(system.into());
        self
    }

    pub fn with_attributes(mut self, attributes: ResourceAttributes) -> Self {
        self.attributes = attributes;
        self
    }

    /// True when the inventory reports the resource under more than one system.
    pub fn is_shared(&self) -> bool {
        self.systems.len() > 1
    }

    /// Systems other than `system_name` this resource is tagged to.
    pub fn shared_with(&self, system_name: &str) -> BTreeSet<String> {
        self.systems
            .iter()
            .filter(|s| s.as_str() != system_name)
            .cloned()
            .collect()
    }

    /// True for a security group with at least one ingress rule open to the internet.
    pub fn has_public_ingress(&self) -> bool {
        self.resource_type == ResourceType::SecurityGroup
            && self.attributes.ingress_rules.iter().any(IngressRule::is_public)
    }
}

/// Resource type, parsed tolerantly from inventory strings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ResourceType {
    IamRole,
    IamUser,
    IamPolicy,
    SecurityGroup,
    S3Bucket,
    Ec2Instance,
    Vpc,
    Subnet,
    Lambda,
    RdsInstance,
    DynamoDbTable,
    NetworkAcl,
    LoadBalancer,
    /// Any type the engine has no special handling for.
    Other(String),
}

impl ResourceType {
    /// Parses an inventory type string.
    ///
    /// Matching ignores case and punctuation and accepts CloudFormation style
    /// names such as `AWS::EC2::Instance`.
    pub fn parse(raw: &str) -> Self {
        let key: String = raw
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .map(|c| c.to_ascii_lowercase())
            .collect();
        let key = key.strip_prefix("aws").unwrap_or(&key);

        match key {
            "iamrole" | "role" => ResourceType::IamRole,
            "iamuser" | "user" => ResourceType::IamUser,
            "iampolicy" | "iammanagedpolicy" | "policy" => ResourceType::IamPolicy,
            "securitygroup" | "ec2securitygroup" | "sg" => ResourceType::SecurityGroup,
            "s3bucket" | "bucket" => ResourceType::S3Bucket,
            "ec2instance" | "instance" | "ec2" => ResourceType::Ec2Instance,
            "vpc" | "ec2vpc" => ResourceType::Vpc,
            "subnet" | "ec2subnet" => ResourceType::Subnet,
            "lambda" | "lambdafunction" | "function" => ResourceType::Lambda,
            "rdsinstance" | "rdsdbinstance" | "rds" | "dbinstance" => ResourceType::RdsInstance,
            "dynamodbtable" | "dynamodb" => ResourceType::DynamoDbTable,
            "networkacl" | "ec2networkacl" | "nacl" => ResourceType::NetworkAcl,
            "loadbalancer" | "elasticloadbalancingv2loadbalancer" | "elb" | "alb" | "nlb" => {
                ResourceType::LoadBalancer
            }
            _ => ResourceType::Other(raw.trim().to_string()),
        }
    }

    /// Wire name of the type.
    pub fn as_str(&self) -> &str {
        match self {
            ResourceType::IamRole => "IAMRole",
            ResourceType::IamUser => "IAMUser",
            ResourceType::IamPolicy => "IAMPolicy",
            ResourceType::SecurityGroup => "SecurityGroup",
            ResourceType::S3Bucket => "S3Bucket",
            ResourceType::Ec2Instance => "EC2Instance",
            ResourceType::Vpc => "VPC",
            ResourceType::Subnet => "Subnet",
            ResourceType::Lambda => "Lambda",
            ResourceType::RdsInstance => "RDSInstance",
            ResourceType::DynamoDbTable => "DynamoDBTable",
            ResourceType::NetworkAcl => "NetworkACL",
            ResourceType::LoadBalancer => "LoadBalancer",
            ResourceType::Other(name) => name,
        }
    }

    /// True for compute resources that can own storage in demo data.
    pub fn is_compute(&self) -> bool {
        matches!(self, ResourceType::Ec2Instance | ResourceType::Lambda)
    }
}

impl std::fmt::Display for ResourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for ResourceType {
    fn from(value: String) -> Self {
        ResourceType::parse(&value)
    }
}

impl From<ResourceType> for String {
    fn from(value: ResourceType) -> Self {
        value.as_str().to_string()
    }
}

/// Relationship-bearing attributes of a resource.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceAttributes {
    /// Ingress rules, for security groups.
    pub ingress_rules: Vec<IngressRule>,
    /// Attached security group ids.
    pub security_groups: Vec<String>,
    /// Instance profile or execution role.
    pub role: Option<String>,
    pub vpc_id: Option<String>,
    pub subnet_id: Option<String>,
    /// Storage resources a role reads or writes.
    pub data_access: Vec<String>,
    /// Invocation targets.
    pub invokes: Vec<String>,
    /// Severity passed through from the scoring backend.
    pub severity: Option<String>,
}

/// A security group ingress rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngressRule {
    pub protocol: String,
    pub ports: PortRange,
    pub source: RuleSource,
    pub status: UsageStatus,
}

impl IngressRule {
    /// True when the rule source is `0.0.0.0/0` or `::/0`.
    pub fn is_public(&self) -> bool {
        match &self.source {
            RuleSource::Cidr(cidr) => PUBLIC_CIDRS.contains(&cidr.trim()),
            RuleSource::SecurityGroup(_) => false,
        }
    }
}

/// Where an ingress rule admits traffic from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "value")]
pub enum RuleSource {
    Cidr(String),
    SecurityGroup(String),
}
