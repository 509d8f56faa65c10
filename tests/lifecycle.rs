//! Model slot lifecycle, gate and idle eviction

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{identity, plan, MockFactory};
use llmhost::config::GenerationConfig;
use llmhost::engine::{IdleCheck, IdleWatchdog, ModelState, Scheduler};
use llmhost::error::{InferenceError, LoadError, UnloadError};
use tokio::sync::watch;

fn scheduler(factory: MockFactory) -> (Arc<Scheduler>, Arc<common::Counters>) {
    let counters = factory.counters.clone();
    (Arc::new(Scheduler::new(Arc::new(factory))), counters)
}

#[tokio::test]
async fn test_unload_empty_slot_is_idempotent() {
    let (scheduler, counters) = scheduler(MockFactory::new());
    for _ in 0..3 {
        scheduler.unload().await.unwrap();
    }
    assert_eq!(scheduler.status().state, ModelState::Empty);
    assert_eq!(counters.stopped(), 0);
}

#[tokio::test]
async fn test_load_then_generate() {
    let (scheduler, _) = scheduler(MockFactory::new());
    let handle = scheduler.load(identity("alpha"), plan()).await.unwrap();
    assert_eq!(handle.identity.name, "alpha");

    let status = scheduler.status();
    assert_eq!(status.state, ModelState::Ready);
    assert_eq!(status.model.unwrap().identity, identity("alpha"));

    let text = scheduler
        .generate("hello".to_string(), GenerationConfig::default())
        .await
        .unwrap();
    assert_eq!(text, "alpha: hello");
}

#[tokio::test]
async fn test_generate_without_model() {
    let (scheduler, _) = scheduler(MockFactory::new());
    let result = scheduler
        .generate("hello".to_string(), GenerationConfig::default())
        .await;
    assert!(matches!(result, Err(InferenceError::NoModel)));
}

#[tokio::test]
async fn test_backend_failure_is_reported_and_counts_as_activity() {
    let (scheduler, _) = scheduler(MockFactory::new());
    scheduler.load(identity("alpha"), plan()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let result = scheduler
        .generate("fail".to_string(), GenerationConfig::default())
        .await;
    assert!(matches!(result, Err(InferenceError::Backend(_))));
    assert!(scheduler.activity().idle_for() < Duration::from_millis(50));
    assert_eq!(scheduler.status().state, ModelState::Ready);
}

#[tokio::test]
async fn test_failed_load_leaves_slot_empty() {
    let (scheduler, counters) = scheduler(MockFactory::new().with_missing("ghost"));
    scheduler.load(identity("alpha"), plan()).await.unwrap();

    let result = scheduler.load(identity("ghost"), plan()).await;
    assert!(matches!(result, Err(LoadError::NotFound(_))));
    assert_eq!(scheduler.status().state, ModelState::Empty);
    assert!(scheduler.status().model.is_none());
    // The previous occupant was released before the failed attempt
    assert_eq!(counters.live(), 0);
    assert_eq!(counters.stopped(), 1);
}

#[tokio::test]
async fn test_replace_releases_before_constructing() {
    let (scheduler, counters) = scheduler(MockFactory::new());
    scheduler.load(identity("alpha"), plan()).await.unwrap();
    scheduler.replace(identity("beta"), plan()).await.unwrap();
    scheduler.replace(identity("gamma"), plan()).await.unwrap();

    assert_eq!(counters.instantiated(), 3);
    assert_eq!(counters.stopped(), 2);
    assert_eq!(counters.live(), 1);
    assert_eq!(counters.max_live(), 1);
    assert_eq!(
        scheduler.status().model.unwrap().identity,
        identity("gamma")
    );
}

#[tokio::test]
async fn test_unload_stop_failure_still_clears_slot() {
    let (scheduler, counters) = scheduler(MockFactory::failing_stop());
    scheduler.load(identity("alpha"), plan()).await.unwrap();

    let result = scheduler.unload().await;
    assert!(matches!(result, Err(UnloadError::StopFailed(_))));
    assert_eq!(scheduler.status().state, ModelState::Empty);
    assert_eq!(counters.live(), 0);

    scheduler.unload().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_readers_never_see_partial_state() {
    let (scheduler, counters) = scheduler(MockFactory::new());
    scheduler.load(identity("m0"), plan()).await.unwrap();

    let writer = {
        let scheduler = scheduler.clone();
        tokio::spawn(async move {
            for i in 1..20 {
                if i % 5 == 0 {
                    scheduler.unload().await.unwrap();
                } else {
                    scheduler
                        .replace(identity(&format!("m{}", i)), plan())
                        .await
                        .unwrap();
                }
            }
        })
    };

    let mut readers = Vec::new();
    for _ in 0..4 {
        let scheduler = scheduler.clone();
        readers.push(tokio::spawn(async move {
            for _ in 0..50 {
                let result = scheduler
                    .with_backend(|handle, backend| {
                        let text = backend
                            .generate("x", &GenerationConfig::default())
                            .unwrap();
                        (handle.identity.name.clone(), text)
                    })
                    .await;
                match result {
                    Ok((name, text)) => assert_eq!(text, format!("{}: x", name)),
                    Err(InferenceError::NoModel) => {}
                    Err(e) => panic!("unexpected error: {}", e),
                }
            }
        }));
    }

    writer.await.unwrap();
    for reader in readers {
        reader.await.unwrap();
    }
    assert_eq!(counters.max_live(), 1);
}

#[tokio::test]
async fn test_evict_skips_when_gate_is_busy() {
    let (scheduler, _) = scheduler(MockFactory::slow_generate(Duration::from_millis(300)));
    scheduler.load(identity("alpha"), plan()).await.unwrap();

    let busy = {
        let scheduler = scheduler.clone();
        tokio::spawn(async move {
            scheduler
                .generate("slow".to_string(), GenerationConfig::default())
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(matches!(
        scheduler.evict_if_idle(Duration::ZERO).await,
        IdleCheck::Busy
    ));
    busy.await.unwrap().unwrap();

    assert!(matches!(
        scheduler.evict_if_idle(Duration::from_secs(60)).await,
        IdleCheck::Active
    ));
    assert!(matches!(
        scheduler.evict_if_idle(Duration::ZERO).await,
        IdleCheck::Evicted(_)
    ));
    assert!(matches!(
        scheduler.evict_if_idle(Duration::ZERO).await,
        IdleCheck::Empty
    ));
}

#[tokio::test]
async fn test_watchdog_evicts_idle_model() {
    let (scheduler, counters) = scheduler(MockFactory::new());
    scheduler.load(identity("alpha"), plan()).await.unwrap();

    let (stop_tx, stop_rx) = watch::channel(false);
    let watchdog = IdleWatchdog::new(scheduler.clone(), Duration::from_millis(200))
        .with_poll_interval(Duration::from_millis(20))
        .spawn(stop_rx);

    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(scheduler.status().state, ModelState::Empty);
    assert_eq!(counters.stopped(), 1);

    stop_tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(1), watchdog)
        .await
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn test_watchdog_keeps_active_model() {
    let (scheduler, _) = scheduler(MockFactory::new());
    scheduler.load(identity("alpha"), plan()).await.unwrap();

    let (stop_tx, stop_rx) = watch::channel(false);
    let watchdog = IdleWatchdog::new(scheduler.clone(), Duration::from_millis(300))
        .with_poll_interval(Duration::from_millis(20))
        .spawn(stop_rx);

    for _ in 0..10 {
        tokio::time::sleep(Duration::from_millis(60)).await;
        scheduler
            .generate("ping".to_string(), GenerationConfig::default())
            .await
            .unwrap();
    }
    assert_eq!(scheduler.status().state, ModelState::Ready);

    drop(stop_tx);
    tokio::time::timeout(Duration::from_secs(1), watchdog)
        .await
        .unwrap()
        .unwrap();
}
