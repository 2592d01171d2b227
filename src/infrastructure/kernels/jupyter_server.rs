#[cfg(test)]
#[path = "jupyter_server_test.rs"]
mod tests;

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;

use anyhow::anyhow;
use anyhow::bail;
use anyhow::Result;
use async_trait::async_trait;
use futures::stream::SplitSink;
use futures::SinkExt;
use futures::StreamExt;
use serde_derive::Deserialize;
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::MaybeTlsStream;
use tokio_tungstenite::WebSocketStream;
use uuid::Uuid;

use super::KernelBox;
use super::KernelConnection;
use super::KernelManager;
use super::KernelMessage;
use crate::configuration::Config;
use crate::configuration::ConfigKey;

const KERNEL_NAME: &str = "python3";
const PROTOCOL_VERSION: &str = "5.3";

#[derive(Deserialize)]
struct KernelModel {
    id: String,
}

/// REST side of a Jupyter server: kernel lifecycle and health.
#[derive(Clone, Debug)]
pub struct JupyterServer {
    url: String,
    token: String,
    client: reqwest::Client,
}

impl JupyterServer {
    pub fn new(url: &str, token: &str) -> JupyterServer {
        return JupyterServer {
            url: url.trim_end_matches('/').to_string(),
            token: token.to_string(),
            client: reqwest::Client::new(),
        };
    }

    pub fn from_config() -> JupyterServer {
        return JupyterServer::new(
            &Config::get(ConfigKey::JupyterURL),
            &Config::get(ConfigKey::JupyterToken),
        );
    }

    pub fn url(&self) -> &str {
        return &self.url;
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let builder = self.client.request(method, format!("{}{path}", self.url));
        if self.token.is_empty() {
            return builder;
        }
        return builder.header("Authorization", format!("token {}", self.token));
    }

    async fn send(&self, builder: reqwest::RequestBuilder) -> Result<reqwest::Response> {
        let res = builder.send().await?;
        let status = res.status();
        if !status.is_success() {
            bail!(format!("Jupyter API error: {status}"));
        }
        return Ok(res);
    }

    /// Number of kernels running on the server. Any failure means the server
    /// is unavailable.
    pub async fn health_check(&self) -> Result<usize> {
        let res = self
            .send(self.request(reqwest::Method::GET, "/api/kernels"))
            .await?;
        let kernels = res.json::<Vec<serde_json::Value>>().await?;
        return Ok(kernels.len());
    }

    pub async fn interrupt_kernel(&self, id: &str) -> Result<()> {
        self.send(self.request(
            reqwest::Method::POST,
            &format!("/api/kernels/{id}/interrupt"),
        ))
        .await?;
        return Ok(());
    }

    /// Websocket endpoint multiplexing the shell and iopub channels of a kernel.
    pub fn channels_url(&self, kernel_id: &str, session_id: &str) -> String {
        let base = if let Some(rest) = self.url.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = self.url.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            self.url.to_string()
        };

        let mut url = format!("{base}/api/kernels/{kernel_id}/channels?session_id={session_id}");
        if !self.token.is_empty() {
            url = format!("{url}&token={}", self.token);
        }
        return url;
    }
}

#[async_trait]
impl KernelManager for JupyterServer {
    #[allow(clippy::implicit_return)]
    async fn start_new(&self) -> Result<KernelBox> {
        let res = self
            .send(
                self.request(reqwest::Method::POST, "/api/kernels")
                    .json(&serde_json::json!({ "name": KERNEL_NAME })),
            )
            .await?;
        let model = res.json::<KernelModel>().await?;

        let kernel = JupyterKernel::connect(self.clone(), &model.id).await?;
        return Ok(Arc::new(kernel));
    }

    #[allow(clippy::implicit_return)]
    async fn shutdown_kernel(&self, id: &str) -> Result<()> {
        self.send(self.request(reqwest::Method::DELETE, &format!("/api/kernels/{id}")))
            .await?;
        return Ok(());
    }
}

/// Builds a shell channel `execute_request` frame.
pub fn execute_request(session_id: &str, msg_id: &str, code: &str) -> serde_json::Value {
    return serde_json::json!({
        "header": {
            "msg_id": msg_id,
            "msg_type": "execute_request",
            "session": session_id,
            "username": "kernelchat",
            "date": chrono::Utc::now().to_rfc3339(),
            "version": PROTOCOL_VERSION,
        },
        "parent_header": {},
        "metadata": {},
        "content": {
            "code": code,
            "silent": false,
            "store_history": true,
            "user_expressions": {},
            "allow_stdin": false,
            "stop_on_error": true,
        },
        "channel": "shell",
        "buffers": [],
    });
}

#[derive(Deserialize)]
struct WireHeader {
    msg_type: String,
}

#[derive(Deserialize)]
struct WireMessage {
    channel: String,
    header: WireHeader,
    #[serde(default)]
    parent_header: serde_json::Value,
    #[serde(default)]
    content: serde_json::Value,
}

type Replies = Arc<Mutex<HashMap<String, oneshot::Sender<serde_json::Value>>>>;

/// Dispatches incoming frames: iopub goes to subscribers, shell replies
/// resolve the request they answer.
#[derive(Clone)]
struct Router {
    iopub: broadcast::Sender<KernelMessage>,
    last_status: Arc<Mutex<Option<String>>>,
    replies: Replies,
}

impl Router {
    fn route(&self, frame: &str) {
        let message = match serde_json::from_str::<WireMessage>(frame) {
            Ok(message) => message,
            Err(err) => {
                tracing::warn!(error = ?err, "Unreadable kernel frame");
                return;
            }
        };

        let parent = message
            .parent_header
            .get("msg_id")
            .and_then(|id| return id.as_str())
            .filter(|id| return !id.is_empty())
            .map(|id| return id.to_string());

        match message.channel.as_str() {
            "iopub" => {
                let message = KernelMessage {
                    msg_type: message.header.msg_type,
                    content: message.content,
                    parent_msg_id: parent,
                };
                if let Some(state) = message.execution_state() {
                    if let Ok(mut last_status) = self.last_status.lock() {
                        *last_status = Some(state.to_string());
                    }
                }
                let _ = self.iopub.send(message);
            }
            "shell" => {
                let waiter = match (self.replies.lock(), parent) {
                    (Ok(mut replies), Some(parent)) => replies.remove(&parent),
                    _ => None,
                };
                if let Some(waiter) = waiter {
                    let _ = waiter.send(message.content);
                }
            }
            _ => {}
        }
    }

    /// Fails every pending request and tells subscribers the kernel is gone.
    fn disconnect(&self) {
        if let Ok(mut replies) = self.replies.lock() {
            replies.clear();
        }
        let _ = self.iopub.send(KernelMessage {
            msg_type: "status".to_string(),
            content: serde_json::json!({ "execution_state": "dead" }),
            parent_msg_id: None,
        });
    }
}

type Writer = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, WsMessage>;

/// A kernel reached over the server's websocket channels endpoint.
pub struct JupyterKernel {
    id: String,
    session_id: String,
    server: JupyterServer,
    writer: tokio::sync::Mutex<Writer>,
    router: Router,
    reader: JoinHandle<()>,
}

impl JupyterKernel {
    pub async fn connect(server: JupyterServer, id: &str) -> Result<JupyterKernel> {
        let session_id = Uuid::new_v4().to_string();
        let url = server.channels_url(id, &session_id);
        let (socket, _) = tokio_tungstenite::connect_async(url.as_str()).await?;
        let (writer, mut stream) = socket.split();

        let (iopub, _) = broadcast::channel(256);
        let router = Router {
            iopub,
            last_status: Arc::new(Mutex::new(None)),
            replies: Arc::new(Mutex::new(HashMap::new())),
        };

        let reader_router = router.clone();
        let kernel_id = id.to_string();
        let reader = tokio::spawn(async move {
            while let Some(frame) = stream.next().await {
                match frame {
                    Ok(WsMessage::Text(text)) => reader_router.route(&text),
                    Ok(WsMessage::Close(_)) => break,
                    Ok(_) => {}
                    Err(err) => {
                        tracing::error!(error = ?err, kernel_id = %kernel_id, "Kernel websocket failed");
                        break;
                    }
                }
            }
            reader_router.disconnect();
        });

        tracing::debug!(kernel_id = %id, "Connected to kernel channels");
        return Ok(JupyterKernel {
            id: id.to_string(),
            session_id,
            server,
            writer: tokio::sync::Mutex::new(writer),
            router,
            reader,
        });
    }
}

#[async_trait]
impl KernelConnection for JupyterKernel {
    fn id(&self) -> String {
        return self.id.to_string();
    }

    fn subscribe(&self) -> broadcast::Receiver<KernelMessage> {
        return self.router.iopub.subscribe();
    }

    fn last_status(&self) -> Option<String> {
        return self.router.last_status.lock().ok()?.clone();
    }

    #[allow(clippy::implicit_return)]
    async fn execute(&self, msg_id: &str, code: &str) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.router
            .replies
            .lock()
            .map_err(|_| return anyhow!("Kernel reply lock poisoned"))?
            .insert(msg_id.to_string(), tx);

        let frame = execute_request(&self.session_id, msg_id, code).to_string();
        self.writer.lock().await.send(WsMessage::Text(frame)).await?;

        let reply = match rx.await {
            Ok(reply) => reply,
            Err(_) => bail!("Kernel connection closed before the execution finished"),
        };
        tracing::debug!(
            kernel_id = %self.id,
            status = reply.get("status").and_then(|s| return s.as_str()).unwrap_or_default(),
            "Execution finished"
        );

        return Ok(());
    }

    #[allow(clippy::implicit_return)]
    async fn interrupt(&self) -> Result<()> {
        return self.server.interrupt_kernel(&self.id).await;
    }

    #[allow(clippy::implicit_return)]
    async fn close(&self) {
        if let Err(err) = self.writer.lock().await.close().await {
            tracing::debug!(error = ?err, kernel_id = %self.id, "Kernel websocket already closed");
        }
        self.reader.abort();
    }
}
