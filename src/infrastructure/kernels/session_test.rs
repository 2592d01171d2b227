use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;

use super::classify;
use super::strip_ansi;
use super::OutputItem;
use super::PythonSession;
use super::SessionStatus;
use crate::infrastructure::kernels::fake_kernel::error;
use crate::infrastructure::kernels::fake_kernel::png;
use crate::infrastructure::kernels::fake_kernel::status;
use crate::infrastructure::kernels::fake_kernel::stream;
use crate::infrastructure::kernels::fake_kernel::FakeKernel;
use crate::infrastructure::kernels::fake_kernel::FakeManager;
use crate::infrastructure::kernels::KernelBackend;
use crate::infrastructure::kernels::KernelConnectivity;
use crate::infrastructure::kernels::KernelMessage;
use crate::infrastructure::kernels::KernelRegistry;

async fn server_session(
    kernels: Vec<Arc<FakeKernel>>,
    dir: &tempfile::TempDir,
) -> (PythonSession, Arc<FakeManager>, Arc<KernelRegistry>) {
    let manager = Arc::new(FakeManager::new(kernels));
    let registry = Arc::new(KernelRegistry::load(dir.path().join("kernels.json")).await);
    let session = PythonSession::new(KernelConnectivity {
        backend: KernelBackend::Server {
            manager: manager.clone(),
            registry: registry.clone(),
        },
        available: true,
    });

    return (session, manager, registry);
}

fn drain(rx: &mut tokio::sync::mpsc::UnboundedReceiver<OutputItem>) -> Vec<OutputItem> {
    let mut items = vec![];
    while let Ok(item) = rx.try_recv() {
        items.push(item);
    }
    return items;
}

#[test]
fn it_strips_ansi_escapes() {
    assert_eq!(
        strip_ansi("\u{1b}[0;31mValueError\u{1b}[0m: bad"),
        "ValueError: bad"
    );
}

#[test]
fn it_classifies_kernel_messages() {
    assert_eq!(
        classify(&stream("stdout", "hi\n")),
        Some(OutputItem::Stdout("hi\n".to_string()))
    );
    assert_eq!(
        classify(&stream("stderr", "warn\n")),
        Some(OutputItem::Stderr("warn\n".to_string()))
    );
    assert_eq!(
        classify(&png("aGVsbG8=\n")),
        Some(OutputItem::Image {
            format: "png".to_string(),
            data: "aGVsbG8=".to_string(),
        })
    );
    assert_eq!(
        classify(&error("ValueError", "bad")),
        Some(OutputItem::Error("Traceback\nValueError: bad\nbad".to_string()))
    );
    assert_eq!(classify(&status("idle")), None);

    let result = KernelMessage {
        msg_type: "execute_result".to_string(),
        content: serde_json::json!({ "data": { "text/plain": "42" } }),
        parent_msg_id: None,
    };
    assert_eq!(
        classify(&result),
        Some(OutputItem::Display("42".to_string()))
    );
}

#[tokio::test]
async fn it_initiates_server_kernels_after_cleaning_orphans() -> Result<()> {
    let dir = tempfile::tempdir()?;
    tokio::fs::write(dir.path().join("kernels.json"), r#"["old"]"#).await?;
    let kernel = Arc::new(FakeKernel::new("k1", vec![]));
    let (session, manager, registry) = server_session(vec![kernel], &dir).await;

    assert_eq!(session.status(), SessionStatus::Uninitiated);
    session.initiate().await?;

    assert_eq!(session.status(), SessionStatus::Idle);
    assert_eq!(*manager.started.lock().unwrap(), vec!["k1"]);
    assert_eq!(*manager.shutdowns.lock().unwrap(), vec!["old"]);
    assert_eq!(registry.running(), vec!["k1"]);

    session.shutdown().await;

    assert_eq!(session.status(), SessionStatus::Uninitiated);
    assert_eq!(*manager.shutdowns.lock().unwrap(), vec!["old", "k1"]);
    assert!(registry.running().is_empty());

    return Ok(());
}

#[tokio::test]
async fn it_refuses_unavailable_servers() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let manager = Arc::new(FakeManager::new(vec![]));
    let registry = Arc::new(KernelRegistry::load(dir.path().join("kernels.json")).await);
    let session = PythonSession::new(KernelConnectivity {
        backend: KernelBackend::Server {
            manager: manager.clone(),
            registry,
        },
        available: false,
    });

    let err = session.initiate().await.unwrap_err();

    assert_eq!(err.to_string(), "Jupyter server is not available");
    assert!(manager.started.lock().unwrap().is_empty());

    return Ok(());
}

#[tokio::test]
async fn it_shuts_down_kernels_that_never_become_idle() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let kernel = Arc::new(FakeKernel::new("k1", vec![]).with_initial_status(Some("dead")));
    let (session, manager, registry) = server_session(vec![kernel], &dir).await;

    let err = session.initiate().await.unwrap_err();

    assert_eq!(err.to_string(), "Python session unavailable");
    assert_eq!(*manager.shutdowns.lock().unwrap(), vec!["k1"]);
    assert!(registry.running().is_empty());
    assert_eq!(session.status(), SessionStatus::Uninitiated);

    return Ok(());
}

#[tokio::test]
async fn it_forwards_output_until_idle() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let kernel = Arc::new(FakeKernel::new(
        "k1",
        vec![stream("stdout", "hello\n"), png("aGVsbG8=")],
    ));
    let (session, _, _) = server_session(vec![kernel.clone()], &dir).await;
    let mut rx = session.subscribe();

    session.initiate().await?;
    session.run_code("print('hello')").await?;
    session.wait_until_idle().await?;

    assert_eq!(
        drain(&mut rx),
        vec![
            OutputItem::Stdout("hello\n".to_string()),
            OutputItem::Image {
                format: "png".to_string(),
                data: "aGVsbG8=".to_string(),
            },
        ]
    );
    assert_eq!(*kernel.executed.lock().unwrap(), vec!["print('hello')"]);
    assert_eq!(session.status(), SessionStatus::Idle);

    session.shutdown().await;
    assert!(*kernel.closed.lock().unwrap());

    return Ok(());
}

#[tokio::test]
async fn it_interrupts_running_code() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let kernel = Arc::new(FakeKernel::hanging("k1", vec![stream("stdout", "tick\n")]));
    let (session, _, _) = server_session(vec![kernel.clone()], &dir).await;
    let mut rx = session.subscribe();
    session.initiate().await?;

    let (ran, canceled) = tokio::join!(session.run_code("while True: pass"), async {
        tokio::time::sleep(Duration::from_millis(20)).await;
        return session.cancel_execution().await;
    });
    ran?;
    canceled?;
    session.wait_until_idle().await?;

    assert_eq!(kernel.interrupt_count(), 1);
    let items = drain(&mut rx);
    assert_eq!(items[0], OutputItem::Stdout("tick\n".to_string()));
    assert!(matches!(&items[1], OutputItem::Error(text) if text.contains("KeyboardInterrupt")));

    session.shutdown().await;

    return Ok(());
}

#[tokio::test]
async fn it_detaches_from_host_kernels_without_shutting_them_down() -> Result<()> {
    let kernel = Arc::new(FakeKernel::new("host", vec![stream("stdout", "1\n")]));
    let session = PythonSession::new(KernelConnectivity {
        backend: KernelBackend::Host {
            kernel: kernel.clone(),
        },
        available: true,
    });

    session.initiate().await?;
    assert_eq!(session.status(), SessionStatus::Idle);

    session.run_code("print(1)").await?;
    session.wait_until_idle().await?;
    session.shutdown().await;

    assert!(!*kernel.closed.lock().unwrap());
    assert_eq!(session.status(), SessionStatus::Uninitiated);

    return Ok(());
}

#[tokio::test]
async fn it_only_collects_output_of_its_own_request_on_shared_kernels() -> Result<()> {
    let kernel = Arc::new(
        FakeKernel::new("host", vec![stream("stdout", "42\n")])
            .shared_with(vec![
                status("busy"),
                stream("stdout", "someone else\n"),
                status("idle"),
            ])
            .lagging(),
    );
    let session = PythonSession::new(KernelConnectivity {
        backend: KernelBackend::Host {
            kernel: kernel.clone(),
        },
        available: true,
    });
    let mut rx = session.subscribe();

    session.initiate().await?;
    session.run_code("print(42)").await?;
    assert_eq!(session.status(), SessionStatus::Busy);
    session.wait_until_idle().await?;

    assert_eq!(drain(&mut rx), vec![OutputItem::Stdout("42\n".to_string())]);
    assert_eq!(session.status(), SessionStatus::Idle);

    session.shutdown().await;

    return Ok(());
}

#[tokio::test]
async fn it_ignores_cancel_before_initiate() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let (session, _, _) = server_session(vec![], &dir).await;

    session.cancel_execution().await?;
    assert!(session.run_code("1").await.is_err());

    return Ok(());
}
