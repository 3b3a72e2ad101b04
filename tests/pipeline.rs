#![cfg(not(loom))]
//! Pipelines driven through a connection: suspension and protocol upgrade.

use std::sync::Arc;

use bytes::Bytes;
use rstest::rstest;
use wireline::{
    connection::{Connection, ConnectionId},
    pipeline::{IoEvent, Outcome, Pipeline, Stage, StageAction, StageContext, StageError},
    write_queue::WriteQueueConfig,
};
use wireline_testing::{EchoStage, TraceStage};

/// Suspends the first read it sees, then lets events through.
struct Gate;

impl Stage for Gate {
    fn name(&self) -> &str { "gate" }

    fn handle(&self, ctx: &mut StageContext<'_>) -> Result<StageAction, StageError> {
        let opened = ctx.attributes().get_named::<bool>("gate.opened").is_some();
        if matches!(ctx.event(), IoEvent::Read) && !opened {
            ctx.attributes().set_named("gate.opened", true);
            return Ok(StageAction::Suspend);
        }
        Ok(StageAction::Continue)
    }
}

/// Swaps the rest of the chain once the peer announces its protocol.
struct Sniff {
    upgraded: Vec<Arc<dyn Stage>>,
}

impl Stage for Sniff {
    fn name(&self) -> &str { "sniff" }

    fn handle(&self, ctx: &mut StageContext<'_>) -> Result<StageAction, StageError> {
        let Some(hello) = ctx.message::<Bytes>() else {
            return Ok(StageAction::Continue);
        };
        if hello.starts_with(b"UPGRADE ") {
            let protocol = String::from_utf8_lossy(&hello[8..]).into_owned();
            ctx.attributes().set_named("sniff.protocol", protocol);
            ctx.clear_message();
            return Ok(StageAction::Rebuild(self.upgraded.clone()));
        }
        Ok(StageAction::Continue)
    }
}

fn stage(stage: impl Stage + 'static) -> Arc<dyn Stage> { Arc::new(stage) }

fn open(stages: Vec<Arc<dyn Stage>>) -> Connection {
    Connection::new(
        ConnectionId::new(11),
        Arc::new(Pipeline::new(stages)),
        WriteQueueConfig::default(),
    )
}

#[rstest]
fn suspended_read_resumes_with_its_message() {
    let trace = TraceStage::new("before");
    let conn = open(vec![
        stage(trace.clone()),
        stage(Gate),
        stage(trace.sibling("after")),
        stage(EchoStage),
    ]);

    let outcome = conn
        .fire(IoEvent::Read, Some(Box::new(Bytes::from_static(b"held"))))
        .expect("fire");
    let suspension = match outcome {
        Outcome::Suspended(suspension) => suspension,
        other => panic!("expected suspension, got {other:?}"),
    };
    assert_eq!(suspension.stage(), "gate");
    assert_eq!(trace.entries(), ["before:read"]);
    assert_eq!(conn.write_queue().stats().queued, 0);

    let resumed = Pipeline::resume(suspension, &conn).expect("resume");
    assert!(matches!(resumed, Outcome::Stopped { .. }));
    assert_eq!(trace.entries(), ["before:read", "after:read"]);
    let record = conn.write_queue().drain_next().expect("echoed");
    assert_eq!(record.message().expect("live"), Bytes::from_static(b"held"));
}

#[rstest]
fn upgrade_rebuilds_the_tail_for_later_events() {
    let trace = TraceStage::new("plain");
    let upgraded = trace.sibling("h2");
    let conn = open(vec![
        stage(Sniff {
            upgraded: vec![stage(upgraded), stage(EchoStage)],
        }),
        stage(trace.clone()),
    ]);

    conn.fire(IoEvent::Read, Some(Box::new(Bytes::from_static(b"UPGRADE h2"))))
        .expect("upgrade");
    conn.fire(IoEvent::Read, Some(Box::new(Bytes::from_static(b"ping"))))
        .expect("after upgrade");

    assert_eq!(conn.pipeline().stage_names(), ["sniff", "h2", "echo"]);
    assert_eq!(trace.entries(), ["h2:read", "h2:read"]);
    assert_eq!(
        conn.attributes().get_named::<String>("sniff.protocol").as_deref(),
        Some(&"h2".to_owned())
    );
    let record = conn.write_queue().drain_next().expect("echo");
    assert_eq!(record.message().expect("live"), Bytes::from_static(b"ping"));
}

#[rstest]
fn close_event_reaches_closed_connection() {
    let trace = TraceStage::new("observer");
    let conn = open(vec![stage(trace.clone())]);

    assert!(conn.close(wireline::CloseReason::Remote));
    assert!(conn.fire(IoEvent::Read, None).is_err());
    conn.fire(IoEvent::Close(wireline::CloseReason::Remote), None)
        .expect("close delivered");
    assert_eq!(trace.entries(), ["observer:close"]);
}
