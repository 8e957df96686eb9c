// tests/dispatch_scheduler.rs
mod common;

use std::sync::Arc;

use alert_dispatcher::alert::{DispatchMode, MessageFormat, ProjectId};
use alert_dispatcher::dispatch::scheduler::{
    run_scheduled_once, spawn_dispatch_scheduler, DispatchSchedulerCfg,
};
use alert_dispatcher::dispatch::DispatchEngine;
use alert_dispatcher::notify::RetryPolicy;
use alert_dispatcher::store::AlertStore;
use common::{insert_alerts, project, store_with, FakeGateway};

#[tokio::test]
async fn only_scheduled_projects_are_dispatched() {
    let store = store_with(vec![
        project("sched", DispatchMode::Scheduled, MessageFormat::ManyInOne),
        project("manual", DispatchMode::Manual, MessageFormat::OnePerOne),
    ])
    .await;
    insert_alerts(store.as_ref(), "sched", 3).await;
    insert_alerts(store.as_ref(), "manual", 2).await;
    let gw = FakeGateway::ok();
    let engine = DispatchEngine::new(store.clone(), gw.clone()).with_retry(RetryPolicy::immediate(1));

    assert_eq!(run_scheduled_once(&engine).await, 1);
    assert_eq!(gw.sent().len(), 1);
    assert!(store.pending_alerts(&ProjectId::new("sched")).await.unwrap().is_empty());
    assert_eq!(store.pending_alerts(&ProjectId::new("manual")).await.unwrap().len(), 2);

    // nothing left to send on the next pass
    assert_eq!(run_scheduled_once(&engine).await, 1);
    assert_eq!(gw.calls(), 1);
}

#[tokio::test]
async fn zero_interval_disables_the_loop() {
    let store = store_with(vec![]).await;
    let engine = Arc::new(DispatchEngine::new(store, FakeGateway::ok()));
    assert!(spawn_dispatch_scheduler(engine, DispatchSchedulerCfg { interval_secs: 0 }).is_none());
}

#[tokio::test(start_paused = true)]
async fn spawned_loop_sends_on_first_tick() {
    let store = store_with(vec![project("sched", DispatchMode::Scheduled, MessageFormat::OnePerOne)]).await;
    insert_alerts(store.as_ref(), "sched", 2).await;
    let gw = FakeGateway::ok();
    let engine = Arc::new(DispatchEngine::new(store.clone(), gw.clone()));

    let handle = spawn_dispatch_scheduler(engine, DispatchSchedulerCfg { interval_secs: 60 }).unwrap();
    // first tick fires immediately
    for _ in 0..10 {
        if gw.sent().len() == 2 {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    handle.abort();
    assert_eq!(gw.sent().len(), 2);
}
