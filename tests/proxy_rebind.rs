use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tether::{
    Bootstrapper, Cardinality, Config, DynamicServiceProxy, EventKind, MemoryRegistry,
    OBJECT_CLASS, Properties, ProxyError, RegistryGateway, SERVICE_RANKING, ServiceId,
};

trait Greeter: Send + Sync {
    fn greet(&self) -> String;
}

struct Hello(&'static str);

impl Greeter for Hello {
    fn greet(&self) -> String {
        format!("hello from {}", self.0)
    }
}

fn greeter(name: &'static str) -> Arc<dyn Greeter> {
    Arc::new(Hello(name))
}

fn props(ranking: i32) -> Properties {
    Properties::new()
        .with(OBJECT_CLASS, std::any::type_name::<dyn Greeter>())
        .with(SERVICE_RANKING, ranking)
}

fn gateway(reg: &MemoryRegistry) -> Arc<dyn RegistryGateway> {
    Arc::new(reg.clone())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_rebinds_to_replacement_without_failing_calls() {
    let reg = MemoryRegistry::new();
    let d1 = reg.register(greeter("d1"), "d1", props(0)).unwrap();

    let boot = Bootstrapper::builder(Config::default()).build(gateway(&reg));
    let mut rx = boot.bus().subscribe();
    let proxy = Arc::new(
        boot.proxy::<dyn Greeter>()
            .with_retry(3, Duration::from_millis(20))
            .build()
            .await
            .unwrap(),
    );
    assert_eq!(proxy.call(|g| g.greet()).await.unwrap(), "hello from d1");

    // a better provider does not displace a live binding
    let _d2 = reg.register(greeter("d2"), "d2", props(10)).unwrap();
    assert_eq!(proxy.call(|g| g.greet()).await.unwrap(), "hello from d1");

    let stop = Arc::new(AtomicBool::new(false));
    let caller = {
        let (proxy, stop) = (proxy.clone(), stop.clone());
        tokio::spawn(async move {
            let mut calls = 0u32;
            while !stop.load(Ordering::SeqCst) {
                proxy.call(|g| g.greet()).await.unwrap();
                calls += 1;
                tokio::task::yield_now().await;
            }
            calls
        })
    };

    std::thread::spawn(move || d1.unregister()).join().unwrap();
    assert_eq!(proxy.call(|g| g.greet()).await.unwrap(), "hello from d2");

    stop.store(true, Ordering::SeqCst);
    assert!(caller.await.unwrap() > 0);
    assert_eq!(proxy.descriptor().map(|d| d.id()), Some(ServiceId(2)));
    assert_eq!(reg.usage_count(ServiceId(2)), 1);

    let kinds: Vec<EventKind> = std::iter::from_fn(|| rx.try_recv().ok())
        .map(|e| e.kind)
        .collect();
    assert_eq!(
        kinds,
        vec![
            EventKind::ProxyBound,
            EventKind::ProxyUnbound,
            EventKind::ProxyBound
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_mandatory_construction_fails_after_retries() {
    let reg = MemoryRegistry::new();
    let started = tokio::time::Instant::now();

    let err = DynamicServiceProxy::<dyn Greeter>::builder(gateway(&reg))
        .with_retry(3, Duration::from_millis(100))
        .build()
        .await
        .unwrap_err();

    match err {
        ProxyError::DependencyUnavailable { attempts, query } => {
            assert_eq!(attempts, 4);
            assert!(query.contains("Greeter"));
        }
        other => panic!("unexpected: {other:?}"),
    }
    assert!(started.elapsed() >= Duration::from_millis(300));
    assert_eq!(reg.listener_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_registration_during_retry_completes_construction() {
    let reg = MemoryRegistry::new();
    let late = reg.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(150)).await;
        late.register(greeter("late"), "late", props(0)).unwrap();
    });

    let started = tokio::time::Instant::now();
    let proxy = DynamicServiceProxy::<dyn Greeter>::builder(gateway(&reg))
        .with_retry(5, Duration::from_secs(1))
        .build()
        .await
        .unwrap();

    // the registration nudges the pause instead of waiting a full second
    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(proxy.call(|g| g.greet()).await.unwrap(), "hello from late");
}

#[tokio::test]
async fn test_registry_errors_are_not_retried() {
    let reg = MemoryRegistry::new();
    reg.register(greeter("d1"), "d1", props(0)).unwrap();
    let proxy = DynamicServiceProxy::<dyn Greeter>::builder(gateway(&reg))
        .with_cardinality(Cardinality::Optional)
        .with_retry(10, Duration::from_secs(3600))
        .build()
        .await
        .unwrap();
    assert!(proxy.is_bound());

    proxy.close();
    assert!(matches!(
        proxy.call(|g| g.greet()).await,
        Err(ProxyError::Cancelled)
    ));

    reg.set_available(false);
    let err = DynamicServiceProxy::<dyn Greeter>::builder(gateway(&reg))
        .with_retry(10, Duration::from_secs(3600))
        .build()
        .await
        .unwrap_err();
    assert!(matches!(err, ProxyError::Registry(_)));
}
