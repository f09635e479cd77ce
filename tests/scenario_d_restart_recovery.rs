//! Scenario D: on restart, a queued execution is requeued and a running one
//! is marked interrupted then retried if attempts remain.

use std::sync::Arc;

use chrono::Utc;
use swarmcore::domain::ExecutionId;
use swarmcore::event_bus::EventBus;
use swarmcore::executor::{BackgroundExecutor, CaptureMode, ExecutionRecord, ExecutionStatus, ExecutorConfig};
use swarmcore::memory::{DistributedMemory, MemoryConfig, StoreOptions};

async fn wait_for_terminal(executor: &BackgroundExecutor, id: ExecutionId) -> swarmcore::executor::ExecutionRecord {
    for _ in 0..200 {
        let record = executor.status(id).await.unwrap();
        if record.status != ExecutionStatus::Queued && record.status != ExecutionStatus::Running {
            return record;
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
    panic!("execution {id} never settled");
}

/// Builds a record the shape `persist` would have written, without ever
/// routing it through a live executor, so its `status` holds exactly what we
/// set rather than whatever a worker got to first.
fn crashed_record(status: ExecutionStatus) -> ExecutionRecord {
    let id = ExecutionId::new();
    ExecutionRecord {
        id,
        command: "true".to_string(),
        args: vec![],
        cwd: None,
        env: std::collections::HashMap::new(),
        timeout_ms: None,
        max_attempts: 2,
        backoff_base_ms: 500,
        backoff_factor: 2.0,
        grace_period_ms: 5_000,
        capture: CaptureMode::Both,
        persist: true,
        attempts: if status == ExecutionStatus::Running { 1 } else { 0 },
        status,
        exit_code: None,
        stdout: String::new(),
        stderr: String::new(),
        last_error: None,
        submitted_at: Utc::now(),
        started_at: if status == ExecutionStatus::Running { Some(Utc::now()) } else { None },
        finished_at: None,
    }
}

#[tokio::test]
async fn restart_requeues_queued_and_retries_the_interrupted_running_job() {
    let memory = Arc::new(DistributedMemory::new(MemoryConfig::default(), EventBus::new()));

    // Simulate a process that crashed with one submission never picked up by
    // a worker and another mid-flight, by writing both records straight into
    // Distributed Memory instead of routing them through a live executor.
    let queued = crashed_record(ExecutionStatus::Queued);
    let running = crashed_record(ExecutionStatus::Running);
    for record in [&queued, &running] {
        let value = serde_json::to_value(record).unwrap();
        memory
            .store(&format!("exec/{}", record.id), value, StoreOptions { namespace: Some("executor".to_string()), ..Default::default() })
            .await
            .unwrap();
    }

    let recovering = BackgroundExecutor::new(ExecutorConfig::default(), EventBus::new(), Some(memory.clone()));

    let recovered = recovering.recover().await.unwrap();
    assert_eq!(recovered, 2, "both the queued and the interrupted running job should be requeued");

    let queued_record = wait_for_terminal(&recovering, queued.id).await;
    assert_eq!(queued_record.status, ExecutionStatus::Success);
    assert_eq!(queued_record.attempts, 1);

    let running_record = wait_for_terminal(&recovering, running.id).await;
    assert_eq!(running_record.status, ExecutionStatus::Success);
    assert_eq!(running_record.attempts, 2, "the post-interruption retry adds one attempt on top of the one already recorded");
}

#[tokio::test]
async fn restart_marks_an_exhausted_running_job_failed_instead_of_retrying() {
    let memory = Arc::new(DistributedMemory::new(MemoryConfig::default(), EventBus::new()));

    let mut exhausted = crashed_record(ExecutionStatus::Running);
    exhausted.max_attempts = 1;
    exhausted.attempts = 1;
    let value = serde_json::to_value(&exhausted).unwrap();
    memory
        .store(&format!("exec/{}", exhausted.id), value, StoreOptions { namespace: Some("executor".to_string()), ..Default::default() })
        .await
        .unwrap();

    let recovering = BackgroundExecutor::new(ExecutorConfig::default(), EventBus::new(), Some(memory.clone()));
    let recovered = recovering.recover().await.unwrap();
    assert_eq!(recovered, 0, "a job with no attempts left should not be requeued");

    let record = recovering.status(exhausted.id).await.unwrap();
    assert_eq!(record.status, ExecutionStatus::Failed);
    assert_eq!(record.last_error.as_deref(), Some("interrupted by restart"));
}
