//! Interactive-mode invoker tests over a scripted broker.

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use relay_broker::{
    AgentHandle, Broker, BrokerRef, ExitReason, MessagingRef, OutputSink, RecordingMessaging,
    SpawnOptions, WorkerOutput,
};
use relay_engine::{
    AgentDefinition, AgentInvoker, DataDirs, InvokeContext, RelayError, ResolvedStep, StepInvoker,
    VerificationCheck, WorkerRegistry,
};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::watch;
use uuid::Uuid;

/// What one spawn_pty call should do.
struct FakeSpawn {
    rename_to: Option<String>,
    chunks: Vec<Vec<u8>>,
    exit: FakeExit,
}

enum FakeExit {
    /// Emit chunks, then report a clean exit.
    Exit,
    /// Never exit; wait_for_exit reports timeout at the bound.
    Hang,
}

struct FakeHandle {
    name: String,
    exit: FakeExit,
    chunks: Vec<Vec<u8>>,
    sink: Option<OutputSink>,
    released: Arc<AtomicBool>,
}

impl FakeHandle {
    /// Emit scripted output through the broker sink. Runs inside
    /// wait_for_exit, i.e. after the caller finished its per-agent
    /// setup, the way a real PTY stream would.
    fn emit_chunks(&self) {
        if let Some(sink) = &self.sink {
            for chunk in &self.chunks {
                sink(WorkerOutput {
                    name: self.name.clone(),
                    chunk: chunk.to_vec(),
                });
            }
        }
    }
}

#[async_trait]
impl AgentHandle for FakeHandle {
    fn name(&self) -> &str {
        &self.name
    }

    fn pid(&self) -> Option<u32> {
        Some(4242)
    }

    async fn wait_for_exit(&self, timeout: Duration) -> ExitReason {
        self.emit_chunks();
        match self.exit {
            FakeExit::Exit => ExitReason::Exit,
            FakeExit::Hang => {
                tokio::time::sleep(timeout).await;
                ExitReason::Timeout
            }
        }
    }

    async fn release(&self) {
        self.released.store(true, Ordering::SeqCst);
    }
}

#[derive(Default)]
struct FakeBroker {
    sink: RwLock<Option<OutputSink>>,
    spawns: Mutex<VecDeque<FakeSpawn>>,
    released: Arc<AtomicBool>,
    seen_tasks: Mutex<Vec<String>>,
}

impl FakeBroker {
    fn push(&self, spawn: FakeSpawn) {
        self.spawns.lock().push_back(spawn);
    }
}

#[async_trait]
impl Broker for FakeBroker {
    async fn spawn_pty(&self, opts: SpawnOptions) -> relay_broker::Result<Box<dyn AgentHandle>> {
        self.seen_tasks.lock().push(opts.task.clone());
        let spawn = self.spawns.lock().pop_front().expect("scripted spawn");
        let name = spawn.rename_to.unwrap_or(opts.name);

        Ok(Box::new(FakeHandle {
            name,
            exit: spawn.exit,
            chunks: spawn.chunks,
            sink: self.sink.read().clone(),
            released: self.released.clone(),
        }))
    }

    fn set_output_sink(&self, sink: OutputSink) {
        *self.sink.write() = Some(sink);
    }

    async fn shutdown(&self) -> relay_broker::Result<()> {
        Ok(())
    }
}

struct Rig {
    invoker: Arc<AgentInvoker>,
    broker: Arc<FakeBroker>,
    registry: Arc<WorkerRegistry>,
    dirs: DataDirs,
    _tmp: TempDir,
}

fn rig() -> Rig {
    let tmp = TempDir::new().unwrap();
    let dirs = DataDirs::new(tmp.path());
    let broker = Arc::new(FakeBroker::default());
    let broker_ref: BrokerRef = broker.clone();
    let messaging: MessagingRef = Arc::new(RecordingMessaging::new());
    let registry = Arc::new(WorkerRegistry::new(dirs.workers_file()));
    let invoker = AgentInvoker::new(broker_ref, messaging, registry.clone(), dirs.clone());
    Rig {
        invoker,
        broker,
        registry,
        dirs,
        _tmp: tmp,
    }
}

fn interactive_agent() -> AgentDefinition {
    AgentDefinition {
        name: "chat".to_string(),
        cli: relay_broker::AgentCli::Claude,
        role: None,
        task: None,
        channels: None,
        constraints: None,
        interactive: None,
    }
}

fn step(name: &str, timeout: Duration) -> ResolvedStep {
    ResolvedStep {
        name: name.to_string(),
        task: "do the work".to_string(),
        verification: None,
        timeout,
    }
}

fn ctx() -> (watch::Sender<bool>, InvokeContext) {
    let (tx, rx) = watch::channel(false);
    (
        tx,
        InvokeContext {
            run_id: Uuid::new_v4(),
            channel: None,
            abort: rx,
        },
    )
}

#[tokio::test]
async fn captured_chunks_become_step_output() {
    let rig = rig();
    rig.broker.push(FakeSpawn {
        rename_to: None,
        chunks: vec![b"\x1b[32mpart one\x1b[0m ".to_vec(), b"part two".to_vec()],
        exit: FakeExit::Exit,
    });

    let (_tx, ctx) = ctx();
    let output = rig
        .invoker
        .invoke(&interactive_agent(), &step("build", Duration::from_secs(5)), &ctx)
        .await
        .unwrap();

    assert_eq!(output, "part one part two");
    // Agent unregistered after the step.
    assert!(rig.registry.active().is_empty());
}

#[tokio::test]
async fn task_carries_self_termination_instruction() {
    let rig = rig();
    rig.broker.push(FakeSpawn {
        rename_to: None,
        chunks: vec![b"ok".to_vec()],
        exit: FakeExit::Exit,
    });

    let (_tx, ctx) = ctx();
    rig.invoker
        .invoke(&interactive_agent(), &step("s", Duration::from_secs(5)), &ctx)
        .await
        .unwrap();

    let tasks = rig.broker.seen_tasks.lock();
    assert!(tasks[0].contains("/exit"));
    assert!(tasks[0].starts_with("do the work"));
}

#[tokio::test]
async fn broker_rename_rekeys_capture() {
    let rig = rig();
    rig.broker.push(FakeSpawn {
        rename_to: Some("renamed-by-broker".to_string()),
        chunks: vec![b"captured after rename".to_vec()],
        exit: FakeExit::Exit,
    });

    let (_tx, ctx) = ctx();
    let output = rig
        .invoker
        .invoke(&interactive_agent(), &step("build", Duration::from_secs(5)), &ctx)
        .await
        .unwrap();

    assert_eq!(output, "captured after rename");
    // Raw log landed under the final name.
    assert!(rig.dirs.worker_log_file("renamed-by-broker").exists());
}

#[tokio::test]
async fn timeout_without_verification_fails() {
    let rig = rig();
    rig.broker.push(FakeSpawn {
        rename_to: None,
        chunks: vec![],
        exit: FakeExit::Hang,
    });

    let (_tx, ctx) = ctx();
    let err = rig
        .invoker
        .invoke(
            &interactive_agent(),
            &step("slow", Duration::from_millis(50)),
            &ctx,
        )
        .await
        .unwrap_err();

    assert!(matches!(err, RelayError::Timeout { .. }), "got {err}");
    assert!(rig.broker.released.load(Ordering::SeqCst));
    assert!(rig.registry.active().is_empty());
}

#[tokio::test]
async fn file_exists_verification_rescues_timeout() {
    let rig = rig();
    rig.broker.push(FakeSpawn {
        rename_to: None,
        chunks: vec![b"worked on it but forgot to exit".to_vec()],
        exit: FakeExit::Hang,
    });

    let artifact = rig._tmp.path().join("out.txt");
    std::fs::write(&artifact, "artifact").unwrap();

    let mut step = step("forgetful", Duration::from_millis(50));
    step.verification = Some(VerificationCheck::FileExists(
        artifact.display().to_string(),
    ));

    let (_tx, ctx) = ctx();
    let output = rig
        .invoker
        .invoke(&interactive_agent(), &step, &ctx)
        .await
        .unwrap();

    // The agent was released, not failed, and the buffer survived.
    assert_eq!(output, "worked on it but forgot to exit");
    assert!(rig.broker.released.load(Ordering::SeqCst));
}

#[tokio::test]
async fn abort_releases_agent() {
    let rig = rig();
    rig.broker.push(FakeSpawn {
        rename_to: None,
        chunks: vec![],
        exit: FakeExit::Hang,
    });

    let (tx, ctx) = ctx();
    let invoker = rig.invoker.clone();
    let agent = interactive_agent();
    let task = tokio::spawn(async move {
        invoker
            .invoke(&agent, &step("hanging", Duration::from_secs(60)), &ctx)
            .await
    });

    tokio::time::sleep(Duration::from_millis(50)).await;
    tx.send(true).unwrap();

    let err = task.await.unwrap().unwrap_err();
    assert!(err.is_aborted());
    assert!(rig.broker.released.load(Ordering::SeqCst));
    assert!(rig.registry.active().is_empty());
}
