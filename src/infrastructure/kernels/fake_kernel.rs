//! In-process kernels for exercising sessions without a Jupyter server.

use std::sync::Arc;
use std::sync::Mutex;

use anyhow::bail;
use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::broadcast;
use tokio::sync::Notify;

use super::KernelBox;
use super::KernelConnection;
use super::KernelManager;
use super::KernelMessage;

pub fn status(state: &str) -> KernelMessage {
    return KernelMessage {
        msg_type: "status".to_string(),
        content: serde_json::json!({ "execution_state": state }),
        parent_msg_id: None,
    };
}

pub fn stream(name: &str, text: &str) -> KernelMessage {
    return KernelMessage {
        msg_type: "stream".to_string(),
        content: serde_json::json!({ "name": name, "text": text }),
        parent_msg_id: None,
    };
}

pub fn png(data: &str) -> KernelMessage {
    return KernelMessage {
        msg_type: "display_data".to_string(),
        content: serde_json::json!({
            "data": { "image/png": data, "text/plain": "<Figure size 1000x500>" },
            "metadata": {},
        }),
        parent_msg_id: None,
    };
}

pub fn error(ename: &str, evalue: &str) -> KernelMessage {
    return KernelMessage {
        msg_type: "error".to_string(),
        content: serde_json::json!({
            "ename": ename,
            "evalue": evalue,
            "traceback": ["\u{1b}[0;31mTraceback\u{1b}[0m", format!("{ename}: {evalue}")],
        }),
        parent_msg_id: None,
    };
}

pub fn parented(message: KernelMessage, msg_id: &str) -> KernelMessage {
    return KernelMessage {
        parent_msg_id: Some(msg_id.to_string()),
        ..message
    };
}

/// Publishes a scripted run for every execute. A hanging kernel holds the
/// reply back until it is interrupted, like a long running cell. A shared
/// kernel also publishes traffic from another client first, and a lagging
/// one replies before its iopub output arrives.
pub struct FakeKernel {
    pub id: String,
    tx: broadcast::Sender<KernelMessage>,
    initial_status: Option<String>,
    output: Vec<KernelMessage>,
    foreign: Vec<KernelMessage>,
    lagging: bool,
    hang: bool,
    interrupted: Notify,
    pub interrupts: Mutex<usize>,
    pub executed: Mutex<Vec<String>>,
    pub closed: Mutex<bool>,
}

impl FakeKernel {
    pub fn new(id: &str, output: Vec<KernelMessage>) -> FakeKernel {
        let (tx, _) = broadcast::channel(64);
        return FakeKernel {
            id: id.to_string(),
            tx,
            initial_status: Some("idle".to_string()),
            output,
            foreign: vec![],
            lagging: false,
            hang: false,
            interrupted: Notify::new(),
            interrupts: Mutex::new(0),
            executed: Mutex::new(vec![]),
            closed: Mutex::new(false),
        };
    }

    pub fn hanging(id: &str, output: Vec<KernelMessage>) -> FakeKernel {
        let mut kernel = FakeKernel::new(id, output);
        kernel.hang = true;
        return kernel;
    }

    pub fn with_initial_status(mut self, state: Option<&str>) -> FakeKernel {
        self.initial_status = state.map(|s| return s.to_string());
        return self;
    }

    pub fn shared_with(mut self, foreign: Vec<KernelMessage>) -> FakeKernel {
        self.foreign = foreign
            .into_iter()
            .map(|message| return parented(message, "other-client"))
            .collect();
        return self;
    }

    pub fn lagging(mut self) -> FakeKernel {
        self.lagging = true;
        return self;
    }

    fn publish(&self, message: KernelMessage) {
        // No receivers is fine, nobody is listening yet.
        let _ = self.tx.send(message);
    }

    pub fn interrupt_count(&self) -> usize {
        return *self.interrupts.lock().unwrap();
    }
}

#[async_trait]
impl KernelConnection for FakeKernel {
    fn id(&self) -> String {
        return self.id.to_string();
    }

    fn subscribe(&self) -> broadcast::Receiver<KernelMessage> {
        return self.tx.subscribe();
    }

    fn last_status(&self) -> Option<String> {
        return self.initial_status.clone();
    }

    #[allow(clippy::implicit_return)]
    async fn execute(&self, msg_id: &str, code: &str) -> Result<()> {
        if *self.closed.lock().unwrap() {
            bail!("Connection closed");
        }
        self.executed.lock().unwrap().push(code.to_string());

        for message in self.foreign.iter() {
            self.publish(message.clone());
        }

        let mut run = vec![parented(status("busy"), msg_id)];
        run.extend(self.output.iter().map(|message| return parented(message.clone(), msg_id)));

        if self.lagging {
            run.push(parented(status("idle"), msg_id));
            let tx = self.tx.clone();
            tokio::spawn(async move {
                tokio::time::sleep(std::time::Duration::from_millis(20)).await;
                for message in run {
                    let _ = tx.send(message);
                }
            });
            return Ok(());
        }

        for message in run {
            self.publish(message);
        }
        if self.hang {
            self.interrupted.notified().await;
            self.publish(parented(error("KeyboardInterrupt", ""), msg_id));
        }
        self.publish(parented(status("idle"), msg_id));

        return Ok(());
    }

    #[allow(clippy::implicit_return)]
    async fn interrupt(&self) -> Result<()> {
        *self.interrupts.lock().unwrap() += 1;
        self.interrupted.notify_one();
        return Ok(());
    }

    #[allow(clippy::implicit_return)]
    async fn close(&self) {
        *self.closed.lock().unwrap() = true;
    }
}

/// Hands out one prepared kernel per start and records shutdowns.
pub struct FakeManager {
    kernels: Mutex<Vec<Arc<FakeKernel>>>,
    pub started: Mutex<Vec<String>>,
    pub shutdowns: Mutex<Vec<String>>,
}

impl FakeManager {
    pub fn new(kernels: Vec<Arc<FakeKernel>>) -> FakeManager {
        return FakeManager {
            kernels: Mutex::new(kernels),
            started: Mutex::new(vec![]),
            shutdowns: Mutex::new(vec![]),
        };
    }
}

#[async_trait]
impl KernelManager for FakeManager {
    #[allow(clippy::implicit_return)]
    async fn start_new(&self) -> Result<KernelBox> {
        let mut kernels = self.kernels.lock().unwrap();
        if kernels.is_empty() {
            bail!("No kernels left");
        }

        let kernel = kernels.remove(0);
        self.started.lock().unwrap().push(kernel.id.to_string());
        return Ok(kernel);
    }

    #[allow(clippy::implicit_return)]
    async fn shutdown_kernel(&self, id: &str) -> Result<()> {
        self.shutdowns.lock().unwrap().push(id.to_string());
        return Ok(());
    }
}
