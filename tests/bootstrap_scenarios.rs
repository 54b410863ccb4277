use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tether::{
    BootstrapError, BootstrapExecutor, BootstrapState, Bootstrapper, Config, Dependency, Event,
    EventKind, MemoryRegistry, Module, ModuleError, OBJECT_CLASS, Properties, Registration,
    ServiceQuery, Subscribe,
};

/// Subscriber that keeps every event it sees.
#[derive(Default)]
struct Recorder(Mutex<Vec<Event>>);

#[async_trait]
impl Subscribe for Recorder {
    async fn on_event(&self, event: &Event) {
        self.0.lock().push(event.clone());
    }
    fn name(&self) -> &'static str {
        "recorder"
    }
}

impl Recorder {
    fn kinds(&self) -> Vec<EventKind> {
        self.0.lock().iter().map(|e| e.kind).collect()
    }
}

struct Consumer {
    deps: Vec<&'static str>,
    started: AtomicUsize,
    failures: Mutex<Vec<BootstrapError>>,
}

impl Consumer {
    fn new(deps: &[&'static str]) -> Arc<Self> {
        Arc::new(Self {
            deps: deps.to_vec(),
            started: AtomicUsize::new(0),
            failures: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl Module for Consumer {
    fn name(&self) -> &str {
        "consumer"
    }
    fn dependencies(&self) -> Vec<Dependency> {
        self.deps
            .iter()
            .map(|d| Dependency::mandatory(*d, ServiceQuery::new([*d], None).unwrap()))
            .collect()
    }
    async fn complete_initialize(&self) -> Result<(), ModuleError> {
        self.started.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
    async fn on_failure(&self, error: &BootstrapError) {
        self.failures.lock().push(error.clone());
    }
}

/// Registers a provider of `capability` from a plain OS thread.
fn publish_from_thread(reg: &MemoryRegistry, capability: &'static str) -> Registration {
    let reg = reg.clone();
    std::thread::spawn(move || {
        reg.register(
            Arc::new(()),
            capability,
            Properties::new().with(OBJECT_CLASS, capability),
        )
        .unwrap()
    })
    .join()
    .unwrap()
}

async fn wait_for_state(exec: &BootstrapExecutor, want: BootstrapState) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while exec.state() != want {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("state {want} not reached, at {}", exec.state()));
}

fn labels(deps: Vec<Dependency>) -> Vec<String> {
    deps.iter().map(|d| d.label().to_string()).collect()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_module_starts_once_both_dependencies_appear() {
    let reg = MemoryRegistry::new();
    let recorder = Arc::new(Recorder::default());
    let boot = Bootstrapper::builder(Config::default())
        .with_subscribers(vec![recorder.clone() as Arc<dyn Subscribe>])
        .build(Arc::new(reg.clone()));
    let mut rx = boot.bus().subscribe();

    let module = Consumer::new(&["A", "B"]);
    assert_eq!(
        boot.start(module.clone()).await.unwrap(),
        BootstrapState::ResolvingDependencies
    );
    let exec = boot.executor("consumer").await.unwrap();
    assert_eq!(labels(exec.unsatisfied()), vec!["A", "B"]);

    let _a = publish_from_thread(&reg, "A");
    assert_eq!(labels(exec.unsatisfied()), vec!["B"]);
    assert_eq!(exec.state(), BootstrapState::ResolvingDependencies);

    let _b = publish_from_thread(&reg, "B");
    wait_for_state(&exec, BootstrapState::Started).await;
    assert_eq!(module.started.load(Ordering::SeqCst), 1);
    assert_eq!(reg.listener_count(), 0);

    let mut events = Vec::new();
    while let Ok(ev) = rx.try_recv() {
        events.push(ev);
    }
    let satisfied: Vec<(String, Vec<String>)> = events
        .iter()
        .filter(|e| e.kind == EventKind::DependencySatisfied)
        .map(|e| {
            (
                e.dependency.as_deref().unwrap_or_default().to_string(),
                e.unsatisfied.as_deref().unwrap_or_default().to_vec(),
            )
        })
        .collect();
    assert_eq!(
        satisfied,
        vec![
            ("A".to_string(), vec!["B".to_string()]),
            ("B".to_string(), vec![]),
        ]
    );
    let resolved = events
        .iter()
        .filter(|e| e.kind == EventKind::DependenciesResolved)
        .count();
    assert_eq!(resolved, 1);

    // subscriber workers deliver asynchronously
    tokio::time::timeout(Duration::from_secs(5), async {
        while !recorder.kinds().contains(&EventKind::ModuleStarted) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
    let kinds = recorder.kinds();
    let pos = |k: EventKind| kinds.iter().position(|x| *x == k).unwrap();
    assert!(pos(EventKind::ModuleResolving) < pos(EventKind::DependenciesWaiting));
    assert!(pos(EventKind::DependenciesWaiting) < pos(EventKind::DependenciesResolved));
    assert!(pos(EventKind::DependenciesResolved) < pos(EventKind::ModuleStarted));

    boot.shutdown().await.unwrap();
    assert_eq!(exec.state(), BootstrapState::Stopped);
}

#[tokio::test(start_paused = true)]
async fn test_watchdog_interrupts_with_missing_dependencies() {
    let reg = MemoryRegistry::new();
    let cfg = Config {
        bootstrap_timeout: Duration::from_millis(100),
        ..Config::default()
    };
    let boot = Bootstrapper::builder(cfg).build(Arc::new(reg.clone()));
    let mut rx = boot.bus().subscribe();

    let module = Consumer::new(&["A", "B"]);
    boot.start(module.clone()).await.unwrap();
    let exec = boot.executor("consumer").await.unwrap();

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(exec.state(), BootstrapState::Interrupted);
    assert_eq!(reg.listener_count(), 0);
    assert_eq!(boot.pending(), 0);

    let failures = module.failures.lock().clone();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].unsatisfied(), ["A", "B"]);
    assert_eq!(failures[0].as_label(), "bootstrap_timeout");

    let timed_out = std::iter::from_fn(|| rx.try_recv().ok())
        .find(|e| e.kind == EventKind::BootstrapTimedOut)
        .unwrap();
    assert_eq!(timed_out.timeout_ms, Some(100));
    assert_eq!(timed_out.unsatisfied.as_deref().unwrap(), ["A", "B"]);

    // a late provider changes nothing
    reg.register(Arc::new(()), "late", Properties::new().with(OBJECT_CLASS, "A"))
        .unwrap();
    reg.register(Arc::new(()), "late", Properties::new().with(OBJECT_CLASS, "B"))
        .unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(exec.state(), BootstrapState::Interrupted);
    assert_eq!(module.started.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn test_invalid_transitions_are_noops() {
    let reg = MemoryRegistry::new();
    reg.register(Arc::new(()), "p", Properties::new().with(OBJECT_CLASS, "A"))
        .unwrap();
    let cfg = Config {
        bootstrap_timeout: Duration::from_millis(50),
        ..Config::default()
    };
    let boot = Bootstrapper::builder(cfg).build(Arc::new(reg.clone()));
    let module = Consumer::new(&["A"]);

    assert_eq!(
        boot.start(module.clone()).await.unwrap(),
        BootstrapState::Started
    );
    let exec = boot.executor("consumer").await.unwrap();

    // nothing armed a watchdog; time passing changes nothing
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(exec.state(), BootstrapState::Started);

    assert_eq!(exec.refresh().await.unwrap(), BootstrapState::Started);
    assert_eq!(module.started.load(Ordering::SeqCst), 1);

    assert_eq!(boot.stop("consumer").await.unwrap(), BootstrapState::Stopped);
    exec.close().await;
    assert_eq!(exec.refresh().await.unwrap(), BootstrapState::Stopped);
    assert_eq!(boot.pending(), 0);
    assert!(module.failures.lock().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_departed_dependency_is_waited_for_again() {
    let reg = MemoryRegistry::new();
    let boot = Bootstrapper::builder(Config::default()).build(Arc::new(reg.clone()));
    let module = Consumer::new(&["A", "B"]);
    boot.start(module.clone()).await.unwrap();
    let exec = boot.executor("consumer").await.unwrap();

    let a = publish_from_thread(&reg, "A");
    std::thread::spawn(move || a.unregister()).join().unwrap();
    let _b = publish_from_thread(&reg, "B");
    assert_eq!(labels(exec.unsatisfied()), vec!["A"]);
    assert_eq!(exec.state(), BootstrapState::ResolvingDependencies);

    let _a = publish_from_thread(&reg, "A");
    wait_for_state(&exec, BootstrapState::Started).await;
    assert_eq!(module.started.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_close_while_waiting_interrupts_without_failure() {
    let reg = MemoryRegistry::new();
    let boot = Bootstrapper::builder(Config::default()).build(Arc::new(reg.clone()));
    let module = Consumer::new(&["A"]);
    boot.start(module.clone()).await.unwrap();
    assert_eq!(reg.listener_count(), 1);

    assert_eq!(
        boot.stop("consumer").await.unwrap(),
        BootstrapState::Interrupted
    );
    assert_eq!(reg.listener_count(), 0);
    assert_eq!(boot.pending(), 0);
    assert!(module.failures.lock().is_empty());
    assert!(boot.modules().await.is_empty());
}
