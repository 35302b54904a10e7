//! In-memory container backend adapter
//!
//! Simulates the node orchestration backend: launched nodes get synthetic
//! task ids, addresses, and a log stream that includes the client's peer-URL
//! announcement so peer resolution has something to parse.

use crate::domain::ports::{ContainerBackend, Credentials, LaunchResult, LaunchSpec, LogPage};
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use tokio::sync::RwLock;
use tracing::debug;

#[derive(Debug, Clone)]
struct TaskState {
    node_id: String,
    runtime: LaunchResult,
    logs: Vec<String>,
}

/// Container backend implementation backed by in-process maps
pub struct StandaloneBackend {
    tasks: RwLock<BTreeMap<String, TaskState>>,
    next_host: AtomicU32,
}

impl StandaloneBackend {
    pub fn new() -> Self {
        Self {
            tasks: RwLock::new(BTreeMap::new()),
            next_host: AtomicU32::new(10),
        }
    }
}

impl Default for StandaloneBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ContainerBackend for StandaloneBackend {
    async fn create_node(&self, spec: &LaunchSpec) -> Result<LaunchResult> {
        let task_id = format!("task-{}", generate_id());
        let host_octet = self.next_host.fetch_add(1, Ordering::SeqCst);
        let private_ip = format!("10.0.0.{}", host_octet % 250);

        let runtime = LaunchResult {
            task_ids: vec![task_id.clone()],
            host: Some(format!("{}.node.standalone.local", spec.node_id)),
            ipv4: Some(format!("203.0.113.{}", host_octet % 250)),
            ipv6: None,
            private_ipv4: Some(private_ip.clone()),
        };

        // Seed the log stream with a geth-style self announcement so peer
        // resolution can exercise the private-address rewrite
        let logs = vec![
            format!("INFO Starting node id={}", spec.node_id),
            format!(
                "INFO Started P2P networking self=enode://{:0>128}@{}:30303",
                host_octet, private_ip
            ),
            "INFO HTTP server started endpoint=0.0.0.0:8050".to_string(),
        ];

        self.tasks.write().await.insert(
            task_id.clone(),
            TaskState {
                node_id: spec.node_id.clone(),
                runtime: runtime.clone(),
                logs,
            },
        );

        debug!("Launched node {} as {}", spec.node_id, task_id);
        Ok(runtime)
    }

    async fn delete_node(
        &self,
        _region: &str,
        _credentials: &Credentials,
        task_id: &str,
    ) -> Result<()> {
        if self.tasks.write().await.remove(task_id).is_none() {
            return Err(Error::ResourceNotFound {
                kind: "Task".into(),
                name: task_id.into(),
            });
        }
        Ok(())
    }

    async fn describe_node(
        &self,
        _region: &str,
        _credentials: &Credentials,
        task_id: &str,
    ) -> Result<LaunchResult> {
        self.tasks
            .read()
            .await
            .get(task_id)
            .map(|task| task.runtime.clone())
            .ok_or_else(|| Error::ResourceNotFound {
                kind: "Task".into(),
                name: task_id.into(),
            })
    }

    async fn node_logs(
        &self,
        _region: &str,
        _credentials: &Credentials,
        task_id: &str,
        _page_token: Option<&str>,
    ) -> Result<LogPage> {
        let tasks = self.tasks.read().await;
        let task = tasks.get(task_id).ok_or_else(|| Error::ResourceNotFound {
            kind: "Task".into(),
            name: task_id.into(),
        })?;
        Ok(LogPage {
            lines: task.logs.clone(),
            next_token: None,
        })
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
