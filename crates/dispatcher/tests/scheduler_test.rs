use std::sync::Arc;

use serde_json::json;

use scheduler_core::config::{DispatcherConfig, RetryConfig};
use scheduler_core::models::Row;
use scheduler_dispatcher::{CycleReport, RetryPolicy, TaskManager, TaskScheduler};
use scheduler_infrastructure::InMemoryTableStore;
use scheduler_testing_utils::{
    test_task_manager_config, ManualClock, MockEcologyClient, MockInvoker, TEST_NOW,
};

struct Setup {
    scheduler: TaskScheduler,
    store: InMemoryTableStore,
    invoker: MockInvoker,
    ecology: Arc<MockEcologyClient>,
    clock: ManualClock,
}

fn setup(max_invocations_per_cycle: u32) -> Setup {
    let store = InMemoryTableStore::new("task_id");
    let invoker = MockInvoker::new();
    let ecology = Arc::new(MockEcologyClient::new());
    let clock = ManualClock::new(TEST_NOW);

    let manager = TaskManager::new(
        test_task_manager_config(),
        Arc::new(store.clone()),
        Arc::new(invoker.clone()),
        ecology.clone(),
    )
    .unwrap()
    .with_clock(Arc::new(clock.clone()));

    let config = DispatcherConfig {
        max_invocations_per_cycle,
        ..DispatcherConfig::default()
    };
    let scheduler = TaskScheduler::new(Arc::new(manager), config).with_retry_policy(
        RetryPolicy::new(RetryConfig {
            base_interval_seconds: 60,
            max_interval_seconds: 3600,
            backoff_multiplier: 2.0,
            jitter_factor: 0.0,
        }),
    );

    Setup {
        scheduler,
        store,
        invoker,
        ecology,
        clock,
    }
}

async fn create_tasks(setup: &Setup, labourer_id: &str, count: usize) {
    let manager = setup.scheduler.manager();
    let labourer = manager.get_labourer(labourer_id).unwrap();
    for _ in 0..count {
        manager.create_task(&labourer, None, Row::new()).await.unwrap();
    }
}

fn report<'a>(reports: &'a [CycleReport], labourer_id: &str) -> &'a CycleReport {
    reports.iter().find(|r| r.labourer_id == labourer_id).unwrap()
}

#[tokio::test]
async fn test_cycle_respects_simultaneous_limit() {
    let setup = setup(100);
    create_tasks(&setup, "limited_function", 3).await;
    create_tasks(&setup, "some_function", 3).await;

    let reports = setup.scheduler.run_cycle().await.unwrap();

    assert_eq!(report(&reports, "limited_function").invoked, 2);
    assert_eq!(report(&reports, "some_function").invoked, 3);
    assert_eq!(setup.invoker.invocation_count(), 5);

    // 并发已满，第二个周期不再调用
    setup.clock.advance(1);
    let reports = setup.scheduler.run_cycle().await.unwrap();
    assert_eq!(report(&reports, "limited_function").invoked, 0);
    assert_eq!(setup.invoker.invocation_count(), 5);
}

#[tokio::test]
async fn test_cycle_respects_per_cycle_budget() {
    let setup = setup(2);
    create_tasks(&setup, "some_function", 5).await;

    let reports = setup.scheduler.run_cycle().await.unwrap();

    assert_eq!(report(&reports, "some_function").invoked, 2);
    let manager = setup.scheduler.manager();
    let labourer = manager.get_labourer("some_function").unwrap();
    assert_eq!(
        manager.get_length_of_queue_for_labourer(&labourer).await.unwrap(),
        3
    );
}

#[tokio::test]
async fn test_cycle_skips_unhealthy_labourers() {
    let setup = setup(100);
    setup.ecology.set_status(0);
    create_tasks(&setup, "some_function", 2).await;

    let reports = setup.scheduler.run_cycle().await.unwrap();

    assert_eq!(report(&reports, "some_function").health, 0);
    assert_eq!(report(&reports, "some_function").invoked, 0);
    assert_eq!(setup.invoker.invocation_count(), 0);
}

#[tokio::test]
async fn test_cycle_retries_and_abandons_expired_tasks() {
    let setup = setup(100);
    create_tasks(&setup, "some_function", 1).await;
    create_tasks(&setup, "limited_function", 1).await;
    setup.scheduler.run_cycle().await.unwrap();
    assert_eq!(setup.invoker.invocation_count(), 2);

    // 两个 Labourer 的 duration + cooldown 都已超过
    setup.clock.advance(1_201);
    let reports = setup.scheduler.run_cycle().await.unwrap();

    let some = report(&reports, "some_function");
    assert_eq!(some.retried, 1);
    assert_eq!(some.abandoned, 0);
    let limited = report(&reports, "limited_function");
    assert_eq!(limited.abandoned, 1);
    assert_eq!(limited.retried, 0);

    let closed = setup.store.rows("closed_tasks").await;
    assert_eq!(closed.len(), 1);
    assert_eq!(closed[0]["labourer_id_task_status"], json!("limited_function_0"));

    let retry = setup.store.rows("retry_tasks").await;
    assert_eq!(retry.len(), 1);
    assert_eq!(retry[0]["desired_launch_time"], json!(TEST_NOW + 1_201 + 60));
    assert_eq!(setup.store.row_count("tasks").await, 0);

    // 到达重试时间后回到队列并再次调用
    setup.clock.advance(60);
    let reports = setup.scheduler.run_cycle().await.unwrap();
    let some = report(&reports, "some_function");
    assert_eq!(some.returned_from_retry, 1);
    assert_eq!(some.invoked, 1);
    assert_eq!(setup.invoker.invocation_count(), 3);

    let live = setup.store.rows("tasks").await;
    assert_eq!(live.len(), 1);
    assert_eq!(live[0]["attempts"], json!(2));
    assert!(live[0].get("desired_launch_time").is_none());
}

#[tokio::test]
async fn test_cycle_archives_completed_tasks() {
    let setup = setup(100);
    create_tasks(&setup, "some_function", 1).await;
    let reports = setup.scheduler.run_cycle().await.unwrap();
    assert_eq!(report(&reports, "some_function").invoked, 1);

    let manager = setup.scheduler.manager();
    let task_id = setup.store.rows("tasks").await[0]["task_id"]
        .as_str()
        .unwrap()
        .to_string();
    setup.clock.advance(100);
    manager.close_task(&task_id, "some_function").await.unwrap();

    // 已完成的任务不再占用并发容量
    let labourer = manager.get_labourer("some_function").unwrap();
    assert_eq!(
        manager
            .get_count_of_running_tasks_for_labourer(&labourer)
            .await
            .unwrap(),
        0
    );

    // 超过 duration + cooldown 之后也不会被当作过期任务重试
    setup.clock.advance(700);
    let reports = setup.scheduler.run_cycle().await.unwrap();
    let some = report(&reports, "some_function");
    assert_eq!(some.archived, 1);
    assert_eq!(some.retried, 0);
    assert_eq!(some.abandoned, 0);

    assert_eq!(setup.store.row_count("tasks").await, 0);
    assert_eq!(setup.store.row_count("retry_tasks").await, 0);
    let closed = setup.store.rows("closed_tasks").await;
    assert_eq!(closed.len(), 1);
    assert_eq!(closed[0]["labourer_id_task_status"], json!("some_function_1"));
    assert_eq!(closed[0]["completed_at"], json!(TEST_NOW + 100));

    setup.clock.advance(3_600);
    setup.scheduler.run_cycle().await.unwrap();
    assert_eq!(setup.invoker.invocation_count(), 1);
    assert_eq!(manager.stats().tasks_archived, 1);
}

#[tokio::test]
async fn test_cycle_reports_average_duration() {
    let setup = setup(100);

    let reports = setup.scheduler.run_cycle().await.unwrap();

    assert!(reports.iter().all(|r| r.average_duration == 900));
    assert_eq!(reports.len(), 2);
}

#[tokio::test]
async fn test_run_stops_on_shutdown() {
    let setup = setup(100);
    let (shutdown_tx, shutdown_rx) = tokio::sync::broadcast::channel(1);
    create_tasks(&setup, "some_function", 1).await;

    let scheduler = Arc::new(setup.scheduler);
    let runner = {
        let scheduler = scheduler.clone();
        tokio::spawn(async move { scheduler.run(shutdown_rx).await })
    };

    let invoked = scheduler_testing_utils::TestEnv::wait_for(
        || {
            let invoker = setup.invoker.clone();
            async move { invoker.invocation_count() == 1 }
        },
        std::time::Duration::from_secs(5),
    )
    .await;
    assert!(invoked);

    shutdown_tx.send(()).unwrap();
    runner.await.unwrap();
}
