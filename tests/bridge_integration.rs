//! End-to-end bridge tests against stub engine executables.
//!
//! Each test writes a small shell script standing in for the real
//! ExprPredictor engine, then drives the dispatcher through the full
//! validate -> invoke -> extract path. Scripts live at unique temp paths
//! so parallel tests never collide.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::{json, Map, Value};

use expr_bridge::config::BridgeConfig;
use expr_bridge::dispatch::{Dispatcher, FailureKind, ResponseEnvelope};
use expr_bridge::registry::ToolRegistry;

/// Write an executable stub engine script to a unique temp path.
fn stub_engine(test_name: &str, script_body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = std::env::temp_dir().join(format!(
        "expr-bridge-stub-{}-{}-{}",
        test_name,
        std::process::id(),
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos()
    ));

    std::fs::write(&path, format!("#!/bin/sh\n{script_body}\n")).expect("write stub engine");
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
        .expect("chmod stub engine");
    path
}

fn dispatcher_for(engine: &PathBuf, timeout_secs: u64) -> Dispatcher {
    let config = BridgeConfig {
        engine_path: engine.clone(),
        working_dir: std::env::temp_dir(),
        timeout_secs,
        max_concurrent: 4,
        socket_path: PathBuf::from("/tmp/unused.sock"),
    };
    Dispatcher::new(Arc::new(ToolRegistry::builtin()), Arc::new(config))
}

fn obj_func_args() -> Map<String, Value> {
    json!({
        "maxBindingWts": [1.0, 1.5, 2.0],
        "txpEffects": [1.2, 1.5, 0.8],
        "repEffects": [0.0, 0.0, 0.2],
        "basalTxp": 1.0,
    })
    .as_object()
    .cloned()
    .unwrap()
}

fn cleanup(path: &PathBuf) {
    let _ = std::fs::remove_file(path);
}

/// The spec'd happy path: banner noise before the result fragment.
#[tokio::test]
async fn test_obj_func_success_with_banner_noise() {
    let engine = stub_engine(
        "banner",
        r#"cat >/dev/null
echo "ExprPredictor MCP demo"
echo "computing objective function..."
echo '{"objFuncValue": 0.42}'"#,
    );
    let d = dispatcher_for(&engine, 5);

    let envelope = d
        .call_tool("expr_predictor_obj_func", obj_func_args())
        .await;

    match envelope {
        ResponseEnvelope::Success { result, meta } => {
            assert_eq!(result, json!({"objFuncValue": 0.42}));
            assert!(meta.is_some());
        }
        other => panic!("expected success, got {other:?}"),
    }
    cleanup(&engine);
}

#[tokio::test]
async fn test_arguments_are_delivered_on_stdin() {
    // Stub echoes its stdin back wrapped in the expected result shape.
    let engine = stub_engine(
        "stdin",
        r#"json=$(cat)
printf '{"parameters": %s}\n' "$json""#,
    );
    let d = dispatcher_for(&engine, 5);

    let args = json!({
        "filename": "/data/pars.txt",
        "coopMat": {"rows": 2},
        "repIndicators": [0, 1],
    })
    .as_object()
    .cloned()
    .unwrap();

    let envelope = d.call_tool("expr_par_load", args.clone()).await;

    match envelope {
        ResponseEnvelope::Success { result, .. } => {
            assert_eq!(result["parameters"], Value::Object(args));
        }
        other => panic!("expected success, got {other:?}"),
    }
    cleanup(&engine);
}

#[tokio::test]
async fn test_no_fragment_with_zero_exit_is_malformed_output() {
    let engine = stub_engine("malformed", "cat >/dev/null\necho all done, no json");
    let d = dispatcher_for(&engine, 5);

    let envelope = d
        .call_tool("expr_predictor_obj_func", obj_func_args())
        .await;

    match envelope {
        ResponseEnvelope::Failure {
            kind,
            detail,
            ..
        } => {
            assert_eq!(kind, FailureKind::MalformedOutput);
            assert_eq!(detail.exit_code, Some(0));
            assert!(!detail.excerpt.unwrap().is_empty());
        }
        other => panic!("expected failure, got {other:?}"),
    }
    cleanup(&engine);
}

#[tokio::test]
async fn test_nonzero_exit_without_result_is_engine_failure() {
    let engine = stub_engine(
        "crash",
        "cat >/dev/null\necho 'FATAL: bad parameter file' >&2\nexit 3",
    );
    let d = dispatcher_for(&engine, 5);

    let envelope = d
        .call_tool("expr_predictor_obj_func", obj_func_args())
        .await;

    match envelope {
        ResponseEnvelope::Failure { kind, detail, .. } => {
            assert_eq!(kind, FailureKind::EngineFailure);
            assert_eq!(detail.exit_code, Some(3));
            assert!(detail.excerpt.unwrap().contains("FATAL"));
        }
        other => panic!("expected failure, got {other:?}"),
    }
    cleanup(&engine);
}

#[tokio::test]
async fn test_missing_engine_is_backend_unavailable() {
    let missing = PathBuf::from("/nonexistent/expr_engine");
    let d = dispatcher_for(&missing, 5);

    let envelope = d
        .call_tool("expr_predictor_obj_func", obj_func_args())
        .await;

    match envelope {
        ResponseEnvelope::Failure { kind, .. } => {
            assert_eq!(kind, FailureKind::BackendUnavailable);
        }
        other => panic!("expected failure, got {other:?}"),
    }
}

#[tokio::test]
async fn test_sleeping_engine_times_out_within_bound() {
    let engine = stub_engine("sleeper", "cat >/dev/null\necho started\nexec sleep 30");
    let d = dispatcher_for(&engine, 1);

    let started = Instant::now();
    let envelope = d
        .call_tool("expr_predictor_obj_func", obj_func_args())
        .await;
    let elapsed = started.elapsed();

    match envelope {
        ResponseEnvelope::Failure { kind, detail, .. } => {
            assert_eq!(kind, FailureKind::Timeout);
            // Partial output collected before the kill is preserved.
            assert_eq!(detail.excerpt.as_deref(), Some("started"));
        }
        other => panic!("expected timeout, got {other:?}"),
    }
    // Timeout plus small bounded overhead, nowhere near the 30s sleep.
    assert!(elapsed < Duration::from_secs(4), "took {elapsed:?}");
    cleanup(&engine);
}

/// A huge argument payload against an engine that never reads stdin must
/// not stretch the deadline: the write blocks on a full pipe until the
/// kill closes it.
#[tokio::test]
async fn test_large_payload_unread_stdin_still_times_out() {
    let engine = stub_engine("stdin-blocked", "exec sleep 30");
    let d = dispatcher_for(&engine, 1);

    let args = json!({
        "maxBindingWts": vec![1.0f64; 200_000],
        "txpEffects": [1.0],
        "repEffects": [0.0],
        "basalTxp": 1.0,
    })
    .as_object()
    .cloned()
    .unwrap();

    let started = Instant::now();
    let envelope = d.call_tool("expr_predictor_obj_func", args).await;
    let elapsed = started.elapsed();

    match envelope {
        ResponseEnvelope::Failure { kind, .. } => assert_eq!(kind, FailureKind::Timeout),
        other => panic!("expected timeout, got {other:?}"),
    }
    assert!(elapsed < Duration::from_secs(4), "took {elapsed:?}");
    cleanup(&engine);
}

#[tokio::test]
async fn test_identical_calls_are_idempotent() {
    let engine = stub_engine(
        "idempotent",
        r#"cat >/dev/null
echo '{"objFuncValue": 0.1337, "meta": {"iterations": 12}}'"#,
    );
    let d = dispatcher_for(&engine, 5);

    let result_of = |envelope: ResponseEnvelope| match envelope {
        ResponseEnvelope::Success { result, .. } => result,
        other => panic!("expected success, got {other:?}"),
    };

    let first = result_of(
        d.call_tool("expr_predictor_obj_func", obj_func_args())
            .await,
    );
    let second = result_of(
        d.call_tool("expr_predictor_obj_func", obj_func_args())
            .await,
    );
    assert_eq!(first, second);
    cleanup(&engine);
}

/// One call's timeout must not delay or fail an unrelated concurrent call.
#[tokio::test]
async fn test_concurrent_calls_are_independent() {
    let engine = stub_engine(
        "concurrent",
        r#"cat >/dev/null
case "$2" in
  expr_predictor_train) exec sleep 30 ;;
  *) echo '{"objFuncValue": 0.5}' ;;
esac"#,
    );
    let d = Arc::new(dispatcher_for(&engine, 2));

    let slow_args = json!({
        "initialParameters": {},
        "trainingData": {},
    })
    .as_object()
    .cloned()
    .unwrap();

    let slow_d = Arc::clone(&d);
    let slow = tokio::spawn(async move {
        slow_d.call_tool("expr_predictor_train", slow_args).await
    });

    // The fast call should complete while the slow one is still running.
    let fast_started = Instant::now();
    let fast = d
        .call_tool("expr_predictor_obj_func", obj_func_args())
        .await;
    let fast_elapsed = fast_started.elapsed();

    assert!(fast.is_success(), "fast call failed: {fast:?}");
    assert!(
        fast_elapsed < Duration::from_secs(2),
        "fast call delayed by slow call: {fast_elapsed:?}"
    );

    let slow = slow.await.expect("slow task panicked");
    match slow {
        ResponseEnvelope::Failure { kind, .. } => assert_eq!(kind, FailureKind::Timeout),
        other => panic!("expected timeout, got {other:?}"),
    }
    cleanup(&engine);
}

/// Validation failures and unknown tools must never run the engine.
#[tokio::test]
async fn test_rejected_calls_leave_no_trace_of_execution() {
    let marker = std::env::temp_dir().join(format!(
        "expr-bridge-marker-{}-{}",
        std::process::id(),
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos()
    ));
    let engine = stub_engine(
        "marker",
        &format!("cat >/dev/null\ntouch {}\necho '{{}}'", marker.display()),
    );
    let d = dispatcher_for(&engine, 5);

    let envelope = d.call_tool("unknown_tool", Map::new()).await;
    assert!(matches!(
        envelope,
        ResponseEnvelope::Failure {
            kind: FailureKind::NotFound,
            ..
        }
    ));

    let envelope = d.call_tool("expr_predictor_obj_func", Map::new()).await;
    assert!(matches!(
        envelope,
        ResponseEnvelope::Failure {
            kind: FailureKind::InvalidArgument,
            ..
        }
    ));

    assert!(
        !marker.exists(),
        "engine executed despite rejected arguments"
    );
    cleanup(&engine);
    cleanup(&marker);
}

#[tokio::test]
async fn test_timed_out_engine_leaves_no_running_process() {
    let pid_file = std::env::temp_dir().join(format!(
        "expr-bridge-pid-{}-{}",
        std::process::id(),
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos()
    ));
    let engine = stub_engine(
        "leak-check",
        &format!("cat >/dev/null\necho $$ > {}\nexec sleep 30", pid_file.display()),
    );
    let d = dispatcher_for(&engine, 1);

    let envelope = d
        .call_tool("expr_predictor_obj_func", obj_func_args())
        .await;
    assert!(matches!(
        envelope,
        ResponseEnvelope::Failure {
            kind: FailureKind::Timeout,
            ..
        }
    ));

    let pid = std::fs::read_to_string(&pid_file)
        .expect("engine should have written its pid")
        .trim()
        .to_string();

    let alive = std::process::Command::new("kill")
        .args(["-0", &pid])
        .status()
        .map(|s| s.success())
        .unwrap_or(false);
    assert!(!alive, "engine process {pid} survived the timeout");

    cleanup(&engine);
    cleanup(&pid_file);
}
