// Supervision trees: restart policies, storm escalation, administrative
// control.

use async_trait::async_trait;
use myna::{
    spawn_supervisor, Agent, AgentError, AgentId, AgentResult, ChildSpec, DeleteChild, Exit,
    Fault, GetAllChildren, GetChildId, Handler, Message, MessageTag, PortBuilder, PortContext,
    RestartChild, RestartMode, RestartStrategy, Runtime, StopChild, SupervisorError,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;

struct Crash;

impl Message for Crash {
    type Reply = ();

    const TAG: MessageTag = MessageTag("test/crash");
}

struct Quit;

impl Message for Quit {
    type Reply = ();

    const TAG: MessageTag = MessageTag("test/quit");
}

/// Occupies the handler long enough to outlive any shutdown timeout.
struct Stall;

impl Message for Stall {
    type Reply = ();

    const TAG: MessageTag = MessageTag("test/stall");
}

struct Child;

impl Agent for Child {
    fn kind(&self) -> &'static str {
        "Child"
    }
}

#[async_trait]
impl Handler<Crash> for Child {
    async fn handle(&mut self, _msg: Crash, _ctx: &mut PortContext) -> AgentResult<()> {
        Err(AgentError::HandlingFailed("child crashed".to_string()))
    }
}

#[async_trait]
impl Handler<Quit> for Child {
    async fn handle(&mut self, _msg: Quit, ctx: &mut PortContext) -> AgentResult<()> {
        ctx.stop_self(None);
        Ok(())
    }
}

#[async_trait]
impl Handler<Stall> for Child {
    async fn handle(&mut self, _msg: Stall, _ctx: &mut PortContext) -> AgentResult<()> {
        tokio::time::sleep(Duration::from_secs(60)).await;
        Ok(())
    }
}

fn child_spec(name: &str, restart: RestartMode) -> ChildSpec {
    ChildSpec::new(
        name,
        restart,
        Arc::new(|rt: &Runtime| {
            rt.spawn(
                PortBuilder::new(Child)
                    .handle::<Crash>()
                    .handle::<Quit>()
                    .handle::<Stall>(),
            )
        }),
    )
    .shutdown_timeout(Duration::from_millis(200))
}

fn runtime() -> Runtime {
    Runtime::builder().node_name("local").build()
}

async fn child_id(sup: &myna::AgentRef, name: &str) -> Option<AgentId> {
    sup.request(GetChildId {
        name: name.to_string(),
    })
    .await
    .unwrap()
}

/// Polls until the named child is running under an id other than `old`.
async fn wait_for_new_incarnation(
    sup: &myna::AgentRef,
    name: &str,
    old: &AgentId,
) -> Option<AgentId> {
    for _ in 0..100 {
        if let Some(id) = child_id(sup, name).await {
            if &id != old {
                return Some(id);
            }
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    None
}

async fn wait_until_stopped(sup: &myna::AgentRef, name: &str) -> bool {
    for _ in 0..100 {
        if child_id(sup, name).await.is_none() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}

#[tokio::test]
async fn one_for_one_restarts_with_a_fresh_id() {
    let rt = runtime();
    let sup = spawn_supervisor(
        &rt,
        RestartStrategy::one_for_one(5, Duration::from_secs(60)),
        vec![child_spec("worker", RestartMode::Permanent)],
    )
    .await
    .unwrap();

    let first = child_id(&sup, "worker").await.unwrap();
    rt.send(&first, Crash).await.unwrap();

    let second = wait_for_new_incarnation(&sup, "worker", &first)
        .await
        .expect("child was not restarted");
    assert_ne!(first, second);
    assert!(rt.agent(&second).is_some());
    assert!(rt.agent(&first).is_none());
    rt.shutdown().await;
}

#[tokio::test]
async fn permanent_child_restarts_after_clean_stop() {
    let rt = runtime();
    let sup = spawn_supervisor(
        &rt,
        RestartStrategy::one_for_one(5, Duration::from_secs(60)),
        vec![child_spec("worker", RestartMode::Permanent)],
    )
    .await
    .unwrap();

    let first = child_id(&sup, "worker").await.unwrap();
    rt.send(&first, Quit).await.unwrap();

    assert!(wait_for_new_incarnation(&sup, "worker", &first)
        .await
        .is_some());
    rt.shutdown().await;
}

#[tokio::test]
async fn transient_child_restarts_only_after_a_fault() {
    let rt = runtime();
    let sup = spawn_supervisor(
        &rt,
        RestartStrategy::one_for_one(5, Duration::from_secs(60)),
        vec![child_spec("worker", RestartMode::Transient)],
    )
    .await
    .unwrap();

    // A crash restarts it.
    let first = child_id(&sup, "worker").await.unwrap();
    rt.send(&first, Crash).await.unwrap();
    let second = wait_for_new_incarnation(&sup, "worker", &first)
        .await
        .expect("transient child not restarted after fault");

    // A clean stop is final.
    rt.send(&second, Quit).await.unwrap();
    assert!(wait_until_stopped(&sup, "worker").await);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(child_id(&sup, "worker").await.is_none());
    // The spec stays listed, just not running.
    let children = sup.request(GetAllChildren).await.unwrap();
    assert_eq!(children.len(), 1);
    assert!(children[0].id.is_none());
    rt.shutdown().await;
}

#[tokio::test]
async fn temporary_child_is_removed_on_fault() {
    let rt = runtime();
    let sup = spawn_supervisor(
        &rt,
        RestartStrategy::one_for_one(5, Duration::from_secs(60)),
        vec![child_spec("temp", RestartMode::Temporary)],
    )
    .await
    .unwrap();

    let id = child_id(&sup, "temp").await.unwrap();
    rt.send(&id, Crash).await.unwrap();

    for _ in 0..100 {
        if sup.request(GetAllChildren).await.unwrap().is_empty() {
            rt.shutdown().await;
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("temporary child spec was not removed after the fault");
}

#[tokio::test]
async fn temporary_child_is_removed_on_administrative_stop() {
    let rt = runtime();
    let sup = spawn_supervisor(
        &rt,
        RestartStrategy::one_for_one(5, Duration::from_secs(60)),
        vec![child_spec("temp", RestartMode::Temporary)],
    )
    .await
    .unwrap();

    sup.post_sync(StopChild {
        name: "temp".to_string(),
    })
    .await
    .unwrap()
    .unwrap();

    for _ in 0..100 {
        if sup.request(GetAllChildren).await.unwrap().is_empty() {
            rt.shutdown().await;
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("temporary child spec was not removed after the stop");
}

/// Records faults reaching it, for observing supervisor escalation.
#[derive(Default)]
struct FaultWatcher {
    faults: Arc<Mutex<Vec<Fault>>>,
}

impl Agent for FaultWatcher {}

#[async_trait]
impl Handler<Fault> for FaultWatcher {
    async fn handle(&mut self, fault: Fault, _ctx: &mut PortContext) -> AgentResult<()> {
        self.faults.lock().unwrap().push(fault);
        Ok(())
    }
}

#[async_trait]
impl Handler<Exit> for FaultWatcher {
    async fn handle(&mut self, _exit: Exit, _ctx: &mut PortContext) -> AgentResult<()> {
        Ok(())
    }
}

#[tokio::test]
async fn restart_storm_shuts_the_supervisor_down_with_a_chained_fault() {
    let rt = runtime();
    let sup = spawn_supervisor(
        &rt,
        RestartStrategy::one_for_one(2, Duration::from_secs(60)),
        vec![child_spec("worker", RestartMode::Permanent)],
    )
    .await
    .unwrap();

    let watcher = FaultWatcher::default();
    let faults = watcher.faults.clone();
    let observer = rt
        .spawn(
            PortBuilder::new(watcher)
                .handle::<Fault>()
                .handle::<Exit>(),
        )
        .unwrap();
    rt.link(observer.id(), sup.id()).unwrap();

    let mut current = child_id(&sup, "worker").await.unwrap();
    for round in 0..3 {
        rt.send(&current, Crash).await.unwrap();
        if round < 2 {
            current = wait_for_new_incarnation(&sup, "worker", &current)
                .await
                .expect("child should still be restarted");
        }
    }

    // Third fault exceeds the limit of two restarts.
    assert!(sup.wait_done(Duration::from_secs(2)).await);
    tokio::time::sleep(Duration::from_millis(100)).await;

    let faults = faults.lock().unwrap();
    assert_eq!(faults.len(), 1);
    assert_eq!(&faults[0].agent, sup.id());
    let cause = faults[0].cause.as_ref().expect("escalation must chain the child fault");
    assert!(cause.error.contains("child crashed"));
    rt.shutdown().await;
}

#[tokio::test]
async fn one_for_all_restarts_every_sibling() {
    let rt = runtime();
    let sup = spawn_supervisor(
        &rt,
        RestartStrategy::one_for_all(5, Duration::from_secs(60)),
        vec![
            child_spec("alpha", RestartMode::Permanent),
            child_spec("beta", RestartMode::Permanent),
        ],
    )
    .await
    .unwrap();

    let alpha = child_id(&sup, "alpha").await.unwrap();
    let beta = child_id(&sup, "beta").await.unwrap();

    rt.send(&alpha, Crash).await.unwrap();

    let new_alpha = wait_for_new_incarnation(&sup, "alpha", &alpha)
        .await
        .expect("alpha not restarted");
    let new_beta = wait_for_new_incarnation(&sup, "beta", &beta)
        .await
        .expect("beta not restarted");
    assert!(rt.agent(&new_alpha).is_some());
    assert!(rt.agent(&new_beta).is_some());
    rt.shutdown().await;
}

#[tokio::test]
async fn stop_child_force_kills_an_unresponsive_child() {
    let rt = runtime();
    let sup = spawn_supervisor(
        &rt,
        RestartStrategy::one_for_one(5, Duration::from_secs(60)),
        vec![child_spec("stuck", RestartMode::Permanent)],
    )
    .await
    .unwrap();

    let id = child_id(&sup, "stuck").await.unwrap();
    rt.send(&id, Stall).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    sup.post_sync(StopChild {
        name: "stuck".to_string(),
    })
    .await
    .unwrap()
    .unwrap();

    assert!(rt.agent(&id).is_none());
    assert!(child_id(&sup, "stuck").await.is_none());
    rt.shutdown().await;
}

#[tokio::test]
async fn delete_child_refuses_a_running_child() {
    let rt = runtime();
    let sup = spawn_supervisor(
        &rt,
        RestartStrategy::default(),
        vec![child_spec("worker", RestartMode::Permanent)],
    )
    .await
    .unwrap();

    let refused = sup
        .post_sync(DeleteChild {
            name: "worker".to_string(),
        })
        .await
        .unwrap();
    assert!(matches!(refused, Err(SupervisorError::ChildRunning(_))));

    sup.post_sync(StopChild {
        name: "worker".to_string(),
    })
    .await
    .unwrap()
    .unwrap();
    sup.post_sync(DeleteChild {
        name: "worker".to_string(),
    })
    .await
    .unwrap()
    .unwrap();

    assert!(sup.request(GetAllChildren).await.unwrap().is_empty());
    rt.shutdown().await;
}

#[tokio::test]
async fn administrative_stops_do_not_count_as_crashes() {
    let rt = runtime();
    // Zero tolerance: any counted restart would shut the supervisor down.
    let sup = spawn_supervisor(
        &rt,
        RestartStrategy::one_for_one(0, Duration::from_secs(60)),
        vec![child_spec("worker", RestartMode::Permanent)],
    )
    .await
    .unwrap();

    for _ in 0..3 {
        sup.post_sync(StopChild {
            name: "worker".to_string(),
        })
        .await
        .unwrap()
        .unwrap();
        let restarted = sup
            .post_sync(RestartChild {
                name: "worker".to_string(),
            })
            .await
            .unwrap()
            .unwrap();
        assert!(rt.agent(&restarted).is_some());
    }
    assert!(!sup.is_closed());
    rt.shutdown().await;
}

#[tokio::test]
async fn duplicate_child_names_are_rejected() {
    let rt = runtime();
    let sup = spawn_supervisor(
        &rt,
        RestartStrategy::default(),
        vec![child_spec("worker", RestartMode::Permanent)],
    )
    .await
    .unwrap();

    let refused = sup
        .post_sync(myna::StartChild(child_spec("worker", RestartMode::Permanent)))
        .await
        .unwrap();
    assert!(matches!(refused, Err(SupervisorError::DuplicateChild(_))));
    rt.shutdown().await;
}

#[tokio::test]
async fn get_all_children_reports_specs_in_order() {
    let rt = runtime();
    let sup = spawn_supervisor(
        &rt,
        RestartStrategy::default(),
        vec![
            child_spec("alpha", RestartMode::Permanent),
            child_spec("beta", RestartMode::Transient),
        ],
    )
    .await
    .unwrap();

    let children = sup.request(GetAllChildren).await.unwrap();
    assert_eq!(children.len(), 2);
    assert_eq!(children[0].name, "alpha");
    assert_eq!(children[0].restart, RestartMode::Permanent);
    assert!(children[0].id.is_some());
    assert_eq!(children[1].name, "beta");
    assert_eq!(children[1].restart, RestartMode::Transient);
    rt.shutdown().await;
}
