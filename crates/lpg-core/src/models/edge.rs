//! Relationship edges between resources.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Ports whose exposure is flagged on derived edges, with the service name.
pub const HIGH_RISK_PORTS: &[(u16, &str)] = &[
    (21, "FTP"),
    (22, "SSH"),
    (23, "Telnet"),
    (25, "SMTP"),
    (135, "RPC"),
    (139, "NetBIOS"),
    (445, "SMB"),
    (1433, "MSSQL"),
    (3306, "MySQL"),
    (3389, "RDP"),
    (5432, "PostgreSQL"),
    (5601, "Kibana"),
    (6379, "Redis"),
    (8080, "HTTP-Alt"),
    (9200, "Elasticsearch"),
    (11211, "Memcached"),
    (27017, "MongoDB"),
];

/// Label used when a rule opens every port.
pub const ALL_PORTS: &str = "All ports";

/// Kind of relationship an edge represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RelationType {
    /// Synthetic internet node to a publicly exposed security group.
    Internet,
    /// Security group admitting traffic from another security group.
    SgToSg,
    /// Resource assuming an IAM role.
    IamAssumes,
    /// Role reading or writing a storage resource.
    DataAccess,
    /// Function or queue invoking a target.
    Invocation,
    /// Resource with an attached security group.
    Attachment,
    /// Resource placed in a subnet or VPC.
    Containment,
}

impl RelationType {
    pub const ALL: [RelationType; 7] = [
        RelationType::Internet,
        RelationType::SgToSg,
        RelationType::IamAssumes,
        RelationType::DataAccess,
        RelationType::Invocation,
        RelationType::Attachment,
        RelationType::Containment,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RelationType::Internet => "internet",
            RelationType::SgToSg => "sg-to-sg",
            RelationType::IamAssumes => "iam-assumes",
            RelationType::DataAccess => "data-access",
            RelationType::Invocation => "invocation",
            RelationType::Attachment => "attachment",
            RelationType::Containment => "containment",
        }
    }

    /// Parses kebab-case, snake_case and the backend's `IAM_ASSUMES` style.
    pub fn parse(raw: &str) -> Option<Self> {
        let key = raw.trim().to_ascii_lowercase().replace('_', "-");
        match key.as_str() {
            "internet" | "internet-exposure" => Some(RelationType::Internet),
            "sg-to-sg" | "sg-reference" | "network" => Some(RelationType::SgToSg),
            "iam-assumes" | "assumes" | "iam" => Some(RelationType::IamAssumes),
            "data-access" | "data" => Some(RelationType::DataAccess),
            "invocation" | "invokes" => Some(RelationType::Invocation),
            "attachment" | "attached" => Some(RelationType::Attachment),
            "containment" | "contains" | "config" => Some(RelationType::Containment),
            _ => None,
        }
    }

    /// Traversal category of this relation.
    pub fn kind(&self) -> EdgeKind {
        match self {
            RelationType::IamAssumes => EdgeKind::Iam,
            RelationType::Internet | RelationType::SgToSg | RelationType::Attachment => {
                EdgeKind::Network
            }
            RelationType::DataAccess => EdgeKind::Data,
            RelationType::Containment => EdgeKind::Config,
            RelationType::Invocation => EdgeKind::Invocation,
        }
    }
}

impl std::fmt::Display for RelationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Edge category selectable in a traversal configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EdgeKind {
    Iam,
    Network,
    Data,
    Config,
    Invocation,
}

impl EdgeKind {
    pub const ALL: [EdgeKind; 5] = [
        EdgeKind::Iam,
        EdgeKind::Network,
        EdgeKind::Data,
        EdgeKind::Config,
        EdgeKind::Invocation,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EdgeKind::Iam => "iam",
            EdgeKind::Network => "network",
            EdgeKind::Data => "data",
            EdgeKind::Config => "config",
            EdgeKind::Invocation => "invocation",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "iam" => Some(EdgeKind::Iam),
            "network" => Some(EdgeKind::Network),
            "data" => Some(EdgeKind::Data),
            "config" => Some(EdgeKind::Config),
            "invocation" => Some(EdgeKind::Invocation),
            _ => None,
        }
    }
}

/// Usage status reported by the flow-log analysis. Consumed, never computed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UsageStatus {
    Used,
    Unused,
    #[default]
    Unknown,
}

impl UsageStatus {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_uppercase().as_str() {
            "USED" => UsageStatus::Used,
            "UNUSED" => UsageStatus::Unused,
            _ => UsageStatus::Unknown,
        }
    }

    /// Combines the status of two merged edges. Evidence of use wins.
    pub fn merge(self, other: UsageStatus) -> UsageStatus {
        match (self, other) {
            (UsageStatus::Used, _) | (_, UsageStatus::Used) => UsageStatus::Used,
            (UsageStatus::Unused, _) | (_, UsageStatus::Unused) => UsageStatus::Unused,
            _ => UsageStatus::Unknown,
        }
    }
}

/// Inclusive port range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PortRange {
    pub from: u16,
    pub to: u16,
}

impl PortRange {
    pub fn new(from: u16, to: u16) -> Self {
        if from <= to {
            Self { from, to }
        } else {
            Self { from: to, to: from }
        }
    }

    pub fn single(port: u16) -> Self {
        Self::new(port, port)
    }

    pub fn all() -> Self {
        Self::new(0, u16::MAX)
    }

    pub fn is_all(&self) -> bool {
        self.from == 0 && self.to == u16::MAX
    }

    pub fn contains(&self, port: u16) -> bool {
        (self.from..=self.to).contains(&port)
    }

    /// First high-risk service this range exposes.
    pub fn high_risk_service(&self) -> Option<&'static str> {
        if self.is_all() {
            return Some(ALL_PORTS);
        }
        HIGH_RISK_PORTS
            .iter()
            .find(|(port, _)| self.contains(*port))
            .map(|(_, service)| *service)
    }
}

impl std::fmt::Display for PortRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_all() {
            f.write_str("all")
        } else if self.from == self.to {
            write!(f, "{}", self.from)
        } else {
            write!(f, "{}-{}", self.from, self.to)
        }
    }
}

/// A directed relationship between two resources.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    /// Stable id derived from `from`, `to` and `relation`.
    pub id: String,
    pub from: String,
    pub to: String,
    pub relation: RelationType,
    /// Port ranges admitted, for network edges. Sorted and deduplicated.
    pub ports: Vec<PortRange>,
    pub status: UsageStatus,
    /// First high-risk service exposed by `ports`.
    pub high_risk: Option<String>,
}

impl Edge {
    pub fn new(from: impl Into<String>, to: impl Into<String>, relation: RelationType) -> Self {
        let from = from.into();
        let to = to.into();
        Self {
            id: edge_id(&from, &to, relation),
            from,
            to,
            relation,
            ports: Vec::new(),
            status: UsageStatus::Unknown,
            high_risk: None,
        }
    }

    pub fn with_ports(mut self, ports: PortRange) -> Self {
        self.add_ports(ports);
        self
    }

    pub fn with_status(mut self, status: UsageStatus) -> Self {
        self.status = status;
        self
    }

    fn add_ports(&mut self, ports: PortRange) {
        if !self.ports.contains(&ports) {
            self.ports.push(ports);
            self.ports.sort();
        }
        self.high_risk = self
            .ports
            .iter()
            .find_map(PortRange::high_risk_service)
            .map(str::to_string);
    }

    /// Folds another edge with the same id into this one.
    pub fn merge(&mut self, other: &Edge) {
        debug_assert_eq!(self.id, other.id);
        for ports in &other.ports {
            self.add_ports(*ports);
        }
        self.status = self.status.merge(other.status);
    }

    /// True when the edge starts or ends at `id`.
    pub fn touches(&self, id: &str) -> bool {
        self.from == id || self.to == id
    }
}

/// Deterministic edge id: first 16 hex characters of SHA-256 over the
/// length-prefixed `from`, `to` and relation name.
pub fn edge_id(from: &str, to: &str, relation: RelationType) -> String {
    let mut hasher = Sha256::new();
    for part in [from, to, relation.as_str()] {
        hasher.update((part.len() as u64).to_be_bytes());
        hasher.update(part.as_bytes());
    }
    let digest = hex::encode(hasher.finalize());
    digest[..16].to_string()
}
