//! Testing helpers for connector implementations and their callers.

use crate::credentials::ApiToken;
use crate::traits::{AuthConfig, ConnectorConfig, ConnectorHealth, ConnectorResult};
use crate::wire::{RawIngressRule, RawResource};
use std::collections::HashMap;

/// Creates a test connector config with sensible defaults and no retries.
pub fn test_connector_config(name: &str, base_url: &str) -> ConnectorConfig {
    ConnectorConfig {
        name: name.to_string(),
        base_url: base_url.to_string(),
        auth: AuthConfig::None,
        timeout_secs: 30,
        max_retries: 0,
        headers: HashMap::new(),
    }
}

/// Creates a test connector config with bearer token auth.
pub fn test_connector_config_with_bearer(
    name: &str,
    base_url: &str,
    token: &str,
) -> ConnectorConfig {
    test_connector_config(name, base_url).with_auth(AuthConfig::BearerToken {
        token: ApiToken::new(token),
    })
}

/// Creates a bare resource record.
pub fn sample_raw_resource(id: &str, resource_type: &str) -> RawResource {
    RawResource::new(id, resource_type)
}

/// Creates a security group record open to the internet on `port`.
pub fn sample_public_security_group(id: &str, port: i64) -> RawResource {
    let mut sg = RawResource::new(id, "SecurityGroup");
    sg.ingress_rules.push(RawIngressRule {
        protocol: Some("tcp".into()),
        from_port: Some(port),
        to_port: Some(port),
        cidr: Some("0.0.0.0/0".into()),
        source_group: None,
        status: None,
    });
    sg
}

/// Creates an instance record with an attached group and role.
pub fn sample_instance(id: &str, security_group: &str, role: &str) -> RawResource {
    let mut instance = RawResource::new(id, "EC2Instance");
    instance.security_groups.push(security_group.to_string());
    instance.role = Some(role.to_string());
    instance
}

/// Asserts that a connector health check returns healthy.
pub fn assert_healthy(result: &ConnectorResult<ConnectorHealth>) {
    match result {
        Ok(ConnectorHealth::Healthy) => {}
        other => panic!("Expected Healthy, got {:?}", other),
    }
}

/// Asserts that a connector health check returns unhealthy.
pub fn assert_unhealthy(result: &ConnectorResult<ConnectorHealth>) {
    match result {
        Ok(ConnectorHealth::Unhealthy(_)) => {}
        other => panic!("Expected Unhealthy, got {:?}", other),
    }
}
