#[cfg(test)]
#[path = "session_test.rs"]
mod tests;

use std::sync::Arc;
use std::sync::Mutex;

use anyhow::anyhow;
use anyhow::bail;
use anyhow::Result;
use once_cell::sync::Lazy;
use regex::Regex;
use tokio::sync::broadcast;
use tokio::sync::mpsc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::KernelBackend;
use super::KernelBox;
use super::KernelConnectivity;
use super::KernelMessage;

static ANSI_ESCAPES: Lazy<Regex> = Lazy::new(|| {
    return Regex::new(r"\x1b\[[0-9;?]*[ -/]*[@-~]").unwrap();
});

pub fn strip_ansi(text: &str) -> String {
    return ANSI_ESCAPES.replace_all(text, "").to_string();
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionStatus {
    Uninitiated,
    Idle,
    Busy,
    Unavailable,
}

/// Output of an execution, in the order the kernel published it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OutputItem {
    Stdout(String),
    Stderr(String),
    /// Traceback and error value with terminal colors removed.
    Error(String),
    /// Base64 encoded image data.
    Image { format: String, data: String },
    /// Plain text rendering of a rich display result.
    Display(String),
}

impl OutputItem {
    /// Text the model gets to read, if the item has any.
    pub fn text(&self) -> Option<&str> {
        match self {
            OutputItem::Stdout(text)
            | OutputItem::Stderr(text)
            | OutputItem::Error(text)
            | OutputItem::Display(text) => return Some(text),
            OutputItem::Image { .. } => return None,
        }
    }
}

/// Maps an iopub message to an output item. Status and bookkeeping messages
/// map to nothing.
pub fn classify(message: &KernelMessage) -> Option<OutputItem> {
    let content = &message.content;
    match message.msg_type.as_str() {
        "stream" => {
            let text = content.get("text")?.as_str()?.to_string();
            match content.get("name")?.as_str()? {
                "stdout" => return Some(OutputItem::Stdout(text)),
                "stderr" => return Some(OutputItem::Stderr(text)),
                _ => return None,
            }
        }
        "error" => {
            let traceback = content
                .get("traceback")
                .and_then(|t| return t.as_array())
                .map(|lines| {
                    return lines
                        .iter()
                        .filter_map(|line| return line.as_str())
                        .collect::<Vec<&str>>()
                        .join("\n");
                })
                .unwrap_or_default();
            let evalue = content
                .get("evalue")
                .and_then(|e| return e.as_str())
                .unwrap_or_default();

            return Some(OutputItem::Error(strip_ansi(&format!(
                "{traceback}\n{evalue}"
            ))));
        }
        "display_data" | "execute_result" => {
            let data = content.get("data")?;
            if let Some(png) = data.get("image/png").and_then(|p| return p.as_str()) {
                return Some(OutputItem::Image {
                    format: "png".to_string(),
                    data: png.trim().to_string(),
                });
            }
            if let Some(text) = data.get("text/plain").and_then(|t| return t.as_str()) {
                return Some(OutputItem::Display(text.to_string()));
            }
            return None;
        }
        _ => return None,
    }
}

fn status_for(execution_state: &str) -> Option<SessionStatus> {
    match execution_state {
        "idle" => return Some(SessionStatus::Idle),
        "busy" => return Some(SessionStatus::Busy),
        // Startup chatter, the kernel reports idle or busy next.
        "starting" => return None,
        _ => return Some(SessionStatus::Unavailable),
    }
}

type Subscribers = Arc<Mutex<Vec<mpsc::UnboundedSender<OutputItem>>>>;

/// `msg_id` of the execution this session submitted last.
type Execution = Arc<Mutex<Option<String>>>;

fn publish(subscribers: &Subscribers, item: OutputItem) {
    if let Ok(mut subscribers) = subscribers.lock() {
        subscribers.retain(|subscriber| return subscriber.send(item.clone()).is_ok());
    }
}

/// One Python interpreter session used for a single execution. Goes from
/// uninitiated through idle and busy, and must be shut down on every exit
/// path so server kernels are not leaked.
pub struct PythonSession {
    connectivity: KernelConnectivity,
    kernel: Mutex<Option<KernelBox>>,
    status: Arc<watch::Sender<SessionStatus>>,
    subscribers: Subscribers,
    execution: Execution,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl PythonSession {
    pub fn new(connectivity: KernelConnectivity) -> PythonSession {
        let (status, _) = watch::channel(SessionStatus::Uninitiated);
        return PythonSession {
            connectivity,
            kernel: Mutex::new(None),
            status: Arc::new(status),
            subscribers: Arc::new(Mutex::new(vec![])),
            execution: Arc::new(Mutex::new(None)),
            pump: Mutex::new(None),
        };
    }

    pub fn status(&self) -> SessionStatus {
        return *self.status.borrow();
    }

    /// Output items published from now on.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<OutputItem> {
        let (tx, rx) = mpsc::unbounded_channel();
        if let Ok(mut subscribers) = self.subscribers.lock() {
            subscribers.push(tx);
        }
        return rx;
    }

    fn current_kernel(&self) -> Option<KernelBox> {
        return self.kernel.lock().ok()?.clone();
    }

    /// Acquires a kernel and waits until it is ready for code. In server mode
    /// orphans of earlier processes are shut down first and the new kernel
    /// is registered for cleanup.
    pub async fn initiate(&self) -> Result<()> {
        let kernel = match &self.connectivity.backend {
            KernelBackend::Server { manager, registry } => {
                if !self.connectivity.available {
                    bail!("Jupyter server is not available");
                }

                registry.cleanup_orphans(manager.as_ref()).await;
                let kernel = manager.start_new().await?;
                registry.track(&kernel.id()).await;
                tracing::info!(kernel_id = %kernel.id(), "Started kernel");
                kernel
            }
            KernelBackend::Host { kernel } => kernel.clone(),
        };

        self.start_pump(&kernel);
        *self
            .kernel
            .lock()
            .map_err(|_| return anyhow!("Session lock poisoned"))? = Some(kernel);

        match &self.connectivity.backend {
            KernelBackend::Server { .. } => {
                let mut status = self.status.subscribe();
                let ready = status
                    .wait_for(|s| return *s != SessionStatus::Uninitiated && *s != SessionStatus::Busy)
                    .await
                    .map(|s| return *s)
                    .unwrap_or(SessionStatus::Unavailable);

                if ready != SessionStatus::Idle {
                    tracing::error!(status = ?ready, "Kernel never became idle");
                    self.shutdown().await;
                    bail!("Python session unavailable");
                }
            }
            KernelBackend::Host { .. } => {
                self.status.send_replace(SessionStatus::Idle);
            }
        }

        return Ok(());
    }

    fn start_pump(&self, kernel: &KernelBox) {
        let mut rx = kernel.subscribe();
        if let Some(state) = kernel.last_status() {
            if let Some(status) = status_for(&state) {
                self.status.send_replace(status);
            }
        }

        let status = self.status.clone();
        let subscribers = self.subscribers.clone();
        let execution = self.execution.clone();
        let pump = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(message) => {
                        let current = execution.lock().ok().and_then(|id| return id.clone());
                        let ours = current
                            .as_deref()
                            .map(|id| return message.is_reply_to(id))
                            .unwrap_or(false);

                        if let Some(state) = message.execution_state() {
                            // Until code is submitted any status reports readiness. After
                            // that only our own request moves the session, except death.
                            if let Some(next) = status_for(state) {
                                if current.is_none() || ours || next == SessionStatus::Unavailable {
                                    status.send_replace(next);
                                }
                            }
                            continue;
                        }
                        if !ours {
                            tracing::trace!(msg_type = %message.msg_type, "Skipped foreign kernel message");
                            continue;
                        }
                        if let Some(item) = classify(&message) {
                            publish(&subscribers, item);
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Dropped kernel messages");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        status.send_replace(SessionStatus::Unavailable);
                        break;
                    }
                }
            }
        });

        if let Ok(mut current) = self.pump.lock() {
            if let Some(previous) = current.replace(pump) {
                previous.abort();
            }
        }
    }

    /// Submits code and returns once the kernel acknowledged it. Output and
    /// the final idle are only taken from messages parented to this request,
    /// so other clients of a shared kernel cannot leak into the result.
    pub async fn run_code(&self, code: &str) -> Result<()> {
        let kernel = match self.current_kernel() {
            Some(kernel) => kernel,
            None => bail!("No kernel, the session was not initiated"),
        };

        let msg_id = Uuid::new_v4().to_string();
        *self
            .execution
            .lock()
            .map_err(|_| return anyhow!("Session lock poisoned"))? = Some(msg_id.to_string());
        self.status.send_replace(SessionStatus::Busy);
        tracing::debug!(kernel_id = %kernel.id(), msg_id = %msg_id, "Submitting code");

        return kernel.execute(&msg_id, code).await;
    }

    pub async fn wait_until_idle(&self) -> Result<()> {
        let mut status = self.status.subscribe();
        let settled = *status
            .wait_for(|s| return *s == SessionStatus::Idle || *s == SessionStatus::Unavailable)
            .await?;

        if settled == SessionStatus::Unavailable {
            bail!("Python session became unavailable");
        }

        return Ok(());
    }

    /// Interrupts the running execution. Does nothing before initiation.
    pub async fn cancel_execution(&self) -> Result<()> {
        if let Some(kernel) = self.current_kernel() {
            tracing::info!(kernel_id = %kernel.id(), "Interrupting kernel");
            kernel.interrupt().await?;
        }

        return Ok(());
    }

    /// Releases the kernel and stops forwarding output. Server kernels are
    /// shut down; host kernels are only detached from. Never fails, and is
    /// safe to call more than once.
    pub async fn shutdown(&self) {
        if let Ok(mut pump) = self.pump.lock() {
            if let Some(pump) = pump.take() {
                pump.abort();
            }
        }
        if let Ok(mut subscribers) = self.subscribers.lock() {
            subscribers.clear();
        }
        if let Ok(mut execution) = self.execution.lock() {
            execution.take();
        }

        let kernel = match self.kernel.lock() {
            Ok(mut kernel) => kernel.take(),
            Err(_) => None,
        };
        if let (Some(kernel), KernelBackend::Server { manager, registry }) =
            (kernel, &self.connectivity.backend)
        {
            let id = kernel.id();
            kernel.close().await;
            match manager.shutdown_kernel(&id).await {
                Ok(()) => tracing::info!(kernel_id = %id, "Shut down kernel"),
                Err(err) => tracing::error!(error = ?err, kernel_id = %id, "Failed to shut down kernel"),
            }
            registry.untrack(&id).await;
        }

        self.status.send_replace(SessionStatus::Uninitiated);
    }
}
