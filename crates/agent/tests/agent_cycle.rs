use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::Request;
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use fleet_agent::client::DaemonClient;
use fleet_agent::exec_runner::ShellExecutor;
use fleet_agent::identity::Identity;
use fleet_agent::runner::{Agent, AgentConfig};
use fleet_core::classifier::Classifier;
use fleet_core::dispatch::Dispatcher;
use fleet_core::model::Script;
use fleet_core::store::{MemoryRepository, Repository};
use tokio_util::sync::CancellationToken;

struct Harness {
    dispatcher: Dispatcher,
    repo: Arc<MemoryRepository>,
    addr: SocketAddr,
    _dir: tempfile::TempDir,
    id_file: std::path::PathBuf,
}

async fn refuse_registration(req: Request, next: Next) -> Response {
    if req.uri().path() == "/v1/machines/register" {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }
    next.run(req).await
}

async fn start_daemon() -> Harness {
    start_daemon_with(false).await
}

async fn start_daemon_with(refuse_register: bool) -> Harness {
    let repo = Arc::new(MemoryRepository::new());
    let dispatcher = Dispatcher::new(repo.clone(), Classifier::builtin().unwrap());
    let mut app = fleet_daemon::http::router(dispatcher.clone(), None);
    if refuse_register {
        app = app.layer(middleware::from_fn(refuse_registration));
    }

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let dir = tempfile::tempdir().unwrap();
    let id_file = dir.path().join("agent_id");
    Harness {
        dispatcher,
        repo,
        addr,
        _dir: dir,
        id_file,
    }
}

async fn agent(h: &Harness, name: &str, exec_timeout: Duration) -> Agent {
    Agent::new(
        AgentConfig {
            name: name.to_string(),
            poll_interval: Duration::from_millis(50),
            exec_timeout,
        },
        DaemonClient::new(&format!("http://{}/", h.addr)),
        Arc::new(ShellExecutor::default()),
        Classifier::builtin().unwrap(),
        Identity::load(&h.id_file).await.unwrap(),
    )
}

#[tokio::test]
async fn cycle_runs_pending_command_and_reports_output() {
    let h = start_daemon().await;
    let machine_id = h.dispatcher.register_machine("pc1").await.unwrap().machine_id;
    h.dispatcher.register_script("hello", "echo hi").await.unwrap();
    let id = h.dispatcher.submit("pc1", "hello").await.unwrap();

    let mut agent = agent(&h, "pc1", Duration::from_secs(10)).await;
    let report = agent.run_cycle(&CancellationToken::new()).await.unwrap();
    assert_eq!(report.executed, 1);
    assert_eq!(report.report_failures, 0);
    assert_eq!(agent.machine_id(), Some(machine_id.as_str()));

    let latest = h.dispatcher.latest_result(&machine_id).await.unwrap().unwrap();
    assert_eq!(latest.id, id);
    assert_eq!(latest.output, "hi\n");
    assert!(h.dispatcher.poll_pending(&machine_id).await.unwrap().is_empty());

    let cached = Identity::load(&h.id_file).await.unwrap();
    assert_eq!(cached.machine_id(), Some(machine_id.as_str()));
}

#[tokio::test]
async fn failed_registration_falls_back_to_cached_machine_id() {
    let h = start_daemon_with(true).await;
    let machine_id = h.dispatcher.register_machine("pc1").await.unwrap().machine_id;
    let mut cached = Identity::load(&h.id_file).await.unwrap();
    cached.store(&machine_id).await.unwrap();
    h.dispatcher.register_script("hello", "echo hi").await.unwrap();
    let id = h.dispatcher.submit("pc1", "hello").await.unwrap();

    let mut agent = agent(&h, "pc1", Duration::from_secs(10)).await;
    let report = agent.run_cycle(&CancellationToken::new()).await.unwrap();
    assert_eq!(report.executed, 1);
    assert_eq!(report.report_failures, 0);

    let latest = h.dispatcher.latest_result(&machine_id).await.unwrap().unwrap();
    assert_eq!(latest.id, id);
    assert_eq!(latest.output, "hi\n");
    assert!(h.dispatcher.poll_pending(&machine_id).await.unwrap().is_empty());
}

#[tokio::test]
async fn failed_registration_without_cached_id_is_an_error() {
    let h = start_daemon_with(true).await;
    let mut agent = agent(&h, "pc1", Duration::from_secs(10)).await;
    assert!(agent.run_cycle(&CancellationToken::new()).await.is_err());
    assert!(agent.machine_id().is_none());
}

#[tokio::test]
async fn dangerous_delivered_script_is_reported_not_run() {
    let h = start_daemon().await;
    let machine_id = h.dispatcher.register_machine("pc1").await.unwrap().machine_id;
    // Written straight to the store, bypassing registration screening.
    h.repo
        .put_script(Script {
            name: "wipe".into(),
            content: "rm -rf /".into(),
        })
        .await
        .unwrap();
    h.dispatcher.submit("pc1", "wipe").await.unwrap();

    let mut agent = agent(&h, "pc1", Duration::from_secs(10)).await;
    let report = agent.run_cycle(&CancellationToken::new()).await.unwrap();
    assert_eq!(report.blocked, 1);
    assert_eq!(report.executed, 0);

    let latest = h.dispatcher.latest_result(&machine_id).await.unwrap().unwrap();
    assert!(latest.output.contains("blocked by safety classifier"));
    assert!(latest.output.contains("rm-recursive-root"));
}

#[tokio::test]
async fn timed_out_command_still_completes() {
    let h = start_daemon().await;
    let machine_id = h.dispatcher.register_machine("pc1").await.unwrap().machine_id;
    h.dispatcher.register_script("slow", "sleep 5").await.unwrap();
    h.dispatcher.submit("pc1", "slow").await.unwrap();

    let mut agent = agent(&h, "pc1", Duration::from_millis(200)).await;
    agent.run_cycle(&CancellationToken::new()).await.unwrap();

    let latest = h.dispatcher.latest_result(&machine_id).await.unwrap().unwrap();
    assert!(latest.output.contains("timed out"));
}

#[tokio::test]
async fn cancelled_cycle_leaves_commands_pending() {
    let h = start_daemon().await;
    let machine_id = h.dispatcher.register_machine("pc1").await.unwrap().machine_id;
    h.dispatcher.register_script("hello", "echo hi").await.unwrap();
    h.dispatcher.submit("pc1", "hello").await.unwrap();

    let shutdown = CancellationToken::new();
    shutdown.cancel();
    let mut agent = agent(&h, "pc1", Duration::from_secs(10)).await;
    let report = agent.run_cycle(&shutdown).await.unwrap();
    assert_eq!(report.executed, 0);
    assert_eq!(h.dispatcher.poll_pending(&machine_id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn run_loop_stops_on_cancellation() {
    let h = start_daemon().await;
    let mut agent = agent(&h, "pc2", Duration::from_secs(10)).await;
    let shutdown = CancellationToken::new();

    let handle = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            agent.run(shutdown).await;
            agent
        })
    };
    tokio::time::sleep(Duration::from_millis(200)).await;
    shutdown.cancel();

    let agent = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("agent loop did not stop")
        .unwrap();
    assert!(agent.machine_id().is_some());
    assert!(h.dispatcher.find_machine("pc2").await.unwrap().is_some());
}

#[tokio::test]
async fn unreachable_daemon_is_an_error() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let dir = tempfile::tempdir().unwrap();
    let mut agent = Agent::new(
        AgentConfig {
            name: "pc1".into(),
            poll_interval: Duration::from_secs(1),
            exec_timeout: Duration::from_secs(1),
        },
        DaemonClient::new(&format!("http://{addr}")),
        Arc::new(ShellExecutor::default()),
        Classifier::builtin().unwrap(),
        Identity::load(dir.path().join("agent_id")).await.unwrap(),
    );
    assert!(agent.run_cycle(&CancellationToken::new()).await.is_err());
}
