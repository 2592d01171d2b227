#[cfg(test)]
pub mod fake_kernel;
pub mod jupyter_server;
mod registry;
mod session;

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde_derive::Deserialize;
use serde_derive::Serialize;
use tokio::sync::broadcast;

use crate::configuration::Config;
use crate::configuration::ConfigKey;

pub use registry::*;
pub use session::*;

/// A message from the kernel's iopub channel.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct KernelMessage {
    pub msg_type: String,
    pub content: serde_json::Value,
    /// `msg_id` of the request this message answers. Messages the kernel
    /// publishes on its own, and ones caused by other clients of a shared
    /// kernel, carry no parent or a foreign one.
    #[serde(default)]
    pub parent_msg_id: Option<String>,
}

impl KernelMessage {
    /// The `execution_state` of a status message.
    pub fn execution_state(&self) -> Option<&str> {
        if self.msg_type != "status" {
            return None;
        }

        return self.content.get("execution_state")?.as_str();
    }

    pub fn is_reply_to(&self, msg_id: &str) -> bool {
        return self.parent_msg_id.as_deref() == Some(msg_id);
    }
}

/// A live connection to one running kernel.
#[async_trait]
pub trait KernelConnection {
    fn id(&self) -> String;

    /// Iopub messages published after this call.
    fn subscribe(&self) -> broadcast::Receiver<KernelMessage>;

    /// Most recent `execution_state` seen on the connection, if any.
    fn last_status(&self) -> Option<String>;

    /// Submits code as request `msg_id` and resolves once the kernel
    /// acknowledges it with its reply. Output keeps arriving on iopub,
    /// parented to `msg_id`.
    async fn execute(&self, msg_id: &str, code: &str) -> Result<()>;

    async fn interrupt(&self) -> Result<()>;

    /// Drops the connection. The kernel itself keeps running.
    async fn close(&self);
}

pub type KernelBox = Arc<dyn KernelConnection + Send + Sync>;

#[async_trait]
pub trait KernelManager {
    async fn start_new(&self) -> Result<KernelBox>;

    async fn shutdown_kernel(&self, id: &str) -> Result<()>;
}

pub type KernelManagerBox = Arc<dyn KernelManager + Send + Sync>;

/// How code execution reaches a kernel.
#[derive(Clone)]
pub enum KernelBackend {
    /// A kernel is started per execution and shut down afterwards.
    Server {
        manager: KernelManagerBox,
        registry: Arc<KernelRegistry>,
    },
    /// An existing kernel owned by someone else. It is never shut down.
    Host { kernel: KernelBox },
}

#[derive(Clone)]
pub struct KernelConnectivity {
    pub backend: KernelBackend,
    pub available: bool,
}

impl KernelConnectivity {
    /// Probes the configured Jupyter server. Code execution stays unavailable
    /// when it cannot be reached. A configured kernel id attaches to that
    /// kernel instead of starting one per execution.
    pub async fn from_config(registry: Arc<KernelRegistry>) -> KernelConnectivity {
        let server = jupyter_server::JupyterServer::from_config();
        let available = match server.health_check().await {
            Ok(kernels) => {
                tracing::info!(url = server.url(), kernels, "Jupyter server is available");
                true
            }
            Err(err) => {
                tracing::warn!(error = ?err, url = server.url(), "Jupyter server is not available");
                false
            }
        };

        let kernel_id = Config::get(ConfigKey::JupyterKernel);
        if available && !kernel_id.is_empty() {
            match jupyter_server::JupyterKernel::connect(server.clone(), &kernel_id).await {
                Ok(kernel) => {
                    return KernelConnectivity {
                        backend: KernelBackend::Host {
                            kernel: Arc::new(kernel),
                        },
                        available: true,
                    };
                }
                Err(err) => {
                    tracing::error!(error = ?err, kernel_id, "Failed to attach to kernel");
                    return KernelConnectivity {
                        backend: KernelBackend::Server {
                            manager: Arc::new(server),
                            registry,
                        },
                        available: false,
                    };
                }
            }
        }

        return KernelConnectivity {
            backend: KernelBackend::Server {
                manager: Arc::new(server),
                registry,
            },
            available,
        };
    }
}
