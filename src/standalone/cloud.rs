//! In-memory cloud provider adapter
//!
//! Simulates the provisioning surface: resources get synthetic ARNs and are
//! tracked in maps so tests and the standalone binary can assert on them.

use crate::domain::ports::{
    BalancerEndpoint, BalancerSpec, CloudProvider, Credentials, SecurityGroupSpec,
};
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use tokio::sync::RwLock;
use tracing::debug;

#[derive(Debug, Clone)]
struct TargetGroupState {
    port: u16,
    targets: BTreeSet<(String, u16)>,
}

/// Cloud provider implementation backed by in-process maps
pub struct StandaloneCloud {
    security_groups: RwLock<BTreeMap<String, String>>,
    balancers: RwLock<BTreeMap<String, String>>,
    target_groups: RwLock<BTreeMap<String, TargetGroupState>>,
    listeners: RwLock<BTreeMap<String, (String, u16)>>,
}

impl StandaloneCloud {
    pub fn new() -> Self {
        Self {
            security_groups: RwLock::new(BTreeMap::new()),
            balancers: RwLock::new(BTreeMap::new()),
            target_groups: RwLock::new(BTreeMap::new()),
            listeners: RwLock::new(BTreeMap::new()),
        }
    }

    /// Number of live target groups
    pub async fn target_group_count(&self) -> usize {
        self.target_groups.read().await.len()
    }
}

impl Default for StandaloneCloud {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CloudProvider for StandaloneCloud {
    async fn create_security_group(&self, spec: &SecurityGroupSpec) -> Result<String> {
        let group_id = format!("sg-{}", generate_id());
        self.security_groups
            .write()
            .await
            .insert(group_id.clone(), spec.name.clone());
        debug!("Created security group {} ({})", group_id, spec.name);
        Ok(group_id)
    }

    async fn delete_security_group(
        &self,
        _region: &str,
        _credentials: &Credentials,
        group_id: &str,
    ) -> Result<()> {
        if self.security_groups.write().await.remove(group_id).is_none() {
            return Err(Error::ResourceNotFound {
                kind: "SecurityGroup".into(),
                name: group_id.into(),
            });
        }
        Ok(())
    }

    async fn create_balancer(&self, spec: &BalancerSpec) -> Result<BalancerEndpoint> {
        let arn = format!("arn:standalone:elasticloadbalancing/{}", generate_id());
        let dns_name = format!("{}.elb.standalone.local", spec.name);
        self.balancers
            .write()
            .await
            .insert(arn.clone(), dns_name.clone());
        debug!("Created balancer {} ({})", arn, dns_name);
        Ok(BalancerEndpoint { arn, dns_name })
    }

    async fn delete_balancer(
        &self,
        _region: &str,
        _credentials: &Credentials,
        arn: &str,
    ) -> Result<()> {
        if self.balancers.write().await.remove(arn).is_none() {
            return Err(Error::ResourceNotFound {
                kind: "LoadBalancer".into(),
                name: arn.into(),
            });
        }
        Ok(())
    }

    async fn create_target_group(
        &self,
        _region: &str,
        _credentials: &Credentials,
        name: &str,
        port: u16,
    ) -> Result<String> {
        let arn = format!("arn:standalone:targetgroup/{}/{}", name, generate_id());
        self.target_groups.write().await.insert(
            arn.clone(),
            TargetGroupState {
                port,
                targets: BTreeSet::new(),
            },
        );
        debug!("Created target group {} (port {})", arn, port);
        Ok(arn)
    }

    async fn delete_target_group(
        &self,
        _region: &str,
        _credentials: &Credentials,
        arn: &str,
    ) -> Result<()> {
        if self.target_groups.write().await.remove(arn).is_none() {
            return Err(Error::ResourceNotFound {
                kind: "TargetGroup".into(),
                name: arn.into(),
            });
        }
        Ok(())
    }

    async fn register_target(
        &self,
        _region: &str,
        _credentials: &Credentials,
        target_group_arn: &str,
        ip: &str,
        port: u16,
    ) -> Result<()> {
        let mut groups = self.target_groups.write().await;
        let group = groups.get_mut(target_group_arn).ok_or_else(|| {
            Error::ResourceNotFound {
                kind: "TargetGroup".into(),
                name: target_group_arn.into(),
            }
        })?;
        // Registration is idempotent per (ip, port)
        group.targets.insert((ip.to_string(), port));
        Ok(())
    }

    async fn deregister_target(
        &self,
        _region: &str,
        _credentials: &Credentials,
        target_group_arn: &str,
        ip: &str,
        port: u16,
    ) -> Result<()> {
        let mut groups = self.target_groups.write().await;
        let group = groups.get_mut(target_group_arn).ok_or_else(|| {
            Error::ResourceNotFound {
                kind: "TargetGroup".into(),
                name: target_group_arn.into(),
            }
        })?;
        group.targets.remove(&(ip.to_string(), port));
        Ok(())
    }

    async fn create_listener(
        &self,
        _region: &str,
        _credentials: &Credentials,
        balancer_arn: &str,
        target_group_arn: &str,
        port: u16,
    ) -> Result<String> {
        if !self.balancers.read().await.contains_key(balancer_arn) {
            return Err(Error::ResourceNotFound {
                kind: "LoadBalancer".into(),
                name: balancer_arn.into(),
            });
        }
        let arn = format!("arn:standalone:listener/{}", generate_id());
        self.listeners
            .write()
            .await
            .insert(arn.clone(), (target_group_arn.to_string(), port));
        Ok(arn)
    }
}

/// Generate a simple unique ID
fn generate_id() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    format!("{:016x}", now)
}
