use illuminator_core::testing::{CallLog, RecordingListener, RunScript, ScriptedLauncher};
use illuminator_core::{
    LineAssembler, PERMISSION_PROMPT, Pipeline, PipelineConfig, RESTART_REQUESTED, RunSupervisor,
    SaltinelMarkers, StartError, SupervisorError, SupervisorOutcome, TARGET_GONE_AWOL, Termination,
    console_log_path,
};
use std::fs;
use std::time::Duration;
use tempfile::TempDir;

fn config_for(temp_dir: &TempDir) -> PipelineConfig {
    PipelineConfig {
        console_dir: temp_dir.path().to_path_buf(),
        ..PipelineConfig::default()
    }
}

fn awol_run() -> RunScript {
    RunScript::new()
        .line("hello")
        .line("<<SALTINEL>>")
        .line(TARGET_GONE_AWOL)
        .line("<<SALTINEL>>")
        .line("never read")
        .stall()
}

#[tokio::test]
async fn test_escalation_restarts_run() {
    let temp_dir = TempDir::new().unwrap();
    let launcher = ScriptedLauncher::new(vec![
        awol_run(),
        RunScript::new().line("hello").line("world"),
    ]);
    let mut supervisor = RunSupervisor::from_config(&config_for(&temp_dir), launcher.clone()).unwrap();

    let report = supervisor.run().await.unwrap();

    assert!(report.is_completed());
    assert_eq!(report.runs.len(), 2);
    assert_eq!(
        report.runs[0].termination,
        Termination::Escalated {
            reason: TARGET_GONE_AWOL.to_string()
        }
    );
    assert_eq!(report.runs[0].escalations.len(), 1);
    assert_eq!(
        report.runs[1].termination,
        Termination::Natural { exit_code: Some(0) }
    );
    assert_eq!(launcher.launched(), [1, 2]);
    assert_eq!(launcher.terminated(), [1]);

    assert_eq!(
        fs::read_to_string(console_log_path(temp_dir.path(), 1)).unwrap(),
        format!("hello\n{TARGET_GONE_AWOL}\n")
    );
    assert_eq!(
        fs::read_to_string(console_log_path(temp_dir.path(), 2)).unwrap(),
        "hello\nworld\n"
    );
}

#[tokio::test]
async fn test_gives_up_after_max_attempts() {
    let temp_dir = TempDir::new().unwrap();
    let config = PipelineConfig {
        max_attempts: 2,
        ..config_for(&temp_dir)
    };
    let launcher = ScriptedLauncher::new(vec![awol_run(), awol_run(), awol_run()]);
    let mut supervisor = RunSupervisor::from_config(&config, launcher.clone()).unwrap();

    let report = supervisor.run().await.unwrap();

    assert_eq!(report.outcome, SupervisorOutcome::RetriesExhausted);
    assert_eq!(report.runs.len(), 2);
    assert_eq!(launcher.launched(), [1, 2]);
    assert_eq!(report.last_run().map(|r| r.run), Some(2));
}

#[tokio::test]
async fn test_silent_run_is_restarted_after_idle_timeout() {
    let temp_dir = TempDir::new().unwrap();
    let launcher = ScriptedLauncher::new(vec![
        RunScript::new().line("launching").stall(),
        RunScript::new().line("done").exit_code(0),
    ]);
    let mut supervisor = RunSupervisor::from_config(&config_for(&temp_dir), launcher.clone())
        .unwrap()
        .with_idle_timeout(Some(Duration::from_millis(100)));

    let report = supervisor.run().await.unwrap();

    assert!(report.is_completed());
    assert_eq!(report.runs[0].termination, Termination::IdleTimeout);
    assert_eq!(launcher.terminated(), [1]);
    assert_eq!(
        fs::read_to_string(console_log_path(temp_dir.path(), 1)).unwrap(),
        "launching\n"
    );
}

#[tokio::test]
async fn test_prompt_left_without_newline_reaches_log_on_timeout() {
    let temp_dir = TempDir::new().unwrap();
    let launcher = ScriptedLauncher::new(vec![
        RunScript::new().chunk("launching\nPassword:").stall(),
        RunScript::new().line("done"),
    ]);
    let mut supervisor = RunSupervisor::from_config(&config_for(&temp_dir), launcher.clone())
        .unwrap()
        .with_idle_timeout(Some(Duration::from_millis(100)));

    let report = supervisor.run().await.unwrap();

    assert_eq!(report.runs[0].termination, Termination::IdleTimeout);
    assert_eq!(
        fs::read_to_string(console_log_path(temp_dir.path(), 1)).unwrap(),
        "launching\nPassword:\n"
    );
}

#[tokio::test]
async fn test_open_block_reaches_log_on_escalation() {
    let temp_dir = TempDir::new().unwrap();
    let launcher = ScriptedLauncher::new(vec![
        RunScript::new()
            .chunk(format!("{TARGET_GONE_AWOL}\n<<SALTINEL>>\nStack trace follows:\nframe 1"))
            .stall(),
        RunScript::new().line("done"),
    ]);
    let mut supervisor = RunSupervisor::from_config(&config_for(&temp_dir), launcher.clone()).unwrap();

    let report = supervisor.run().await.unwrap();

    assert!(report.is_completed());
    assert_eq!(
        fs::read_to_string(console_log_path(temp_dir.path(), 1)).unwrap(),
        format!("{TARGET_GONE_AWOL}\nStack trace follows: frame 1\n")
    );
}

#[tokio::test]
async fn test_quiet_stretch_after_start_is_not_a_timeout() {
    let temp_dir = TempDir::new().unwrap();
    let launcher = ScriptedLauncher::new(vec![
        RunScript::new()
            .line("<<SALTINEL>> Successful launch <<SALTINEL>>")
            .pause(Duration::from_millis(400))
            .line("Pass: login"),
    ]);
    let mut supervisor = RunSupervisor::from_config(&config_for(&temp_dir), launcher.clone())
        .unwrap()
        .with_idle_timeout(Some(Duration::from_millis(100)));

    let report = supervisor.run().await.unwrap();

    assert!(report.is_completed());
    assert_eq!(report.runs.len(), 1);
    assert!(report.runs[0].started);
    assert!(launcher.terminated().is_empty());
    assert_eq!(
        fs::read_to_string(console_log_path(temp_dir.path(), 1)).unwrap(),
        "Successful launch\nPass: login\n"
    );
}

#[tokio::test]
async fn test_quiet_stretch_before_start_is_a_timeout() {
    let temp_dir = TempDir::new().unwrap();
    let launcher = ScriptedLauncher::new(vec![
        RunScript::new()
            .line("launching")
            .pause(Duration::from_millis(400))
            .line("<<SALTINEL>> Successful launch <<SALTINEL>>"),
        RunScript::new().line("<<SALTINEL>> Successful launch <<SALTINEL>>"),
    ]);
    let mut supervisor = RunSupervisor::from_config(&config_for(&temp_dir), launcher.clone())
        .unwrap()
        .with_idle_timeout(Some(Duration::from_millis(100)));

    let report = supervisor.run().await.unwrap();

    assert!(report.is_completed());
    assert_eq!(report.runs[0].termination, Termination::IdleTimeout);
    assert!(!report.runs[0].started);
    assert!(report.runs[1].started);
    assert_eq!(launcher.terminated(), [1]);
}

#[tokio::test]
async fn test_harness_restart_request_relaunches() {
    let temp_dir = TempDir::new().unwrap();
    let launcher = ScriptedLauncher::new(vec![
        RunScript::new()
            .line("<<SALTINEL>> Request instruments restart <<SALTINEL>>")
            .stall(),
        RunScript::new().line("done"),
    ]);
    let mut supervisor = RunSupervisor::from_config(&config_for(&temp_dir), launcher.clone()).unwrap();

    let report = supervisor.run().await.unwrap();

    assert!(report.is_completed());
    assert_eq!(
        report.runs[0].termination,
        Termination::Escalated {
            reason: RESTART_REQUESTED.to_string()
        }
    );
    assert_eq!(
        supervisor.pipeline_mut().agent_findings().map(|f| f.snapshot().restart_requested),
        Some(false)
    );
}

#[tokio::test]
async fn test_permission_prompt_stops_without_retry() {
    let temp_dir = TempDir::new().unwrap();
    let launcher = ScriptedLauncher::new(vec![
        RunScript::new().line(PERMISSION_PROMPT).stall(),
        RunScript::new().line("never launched"),
    ]);
    let mut supervisor = RunSupervisor::from_config(&config_for(&temp_dir), launcher.clone()).unwrap();

    let report = supervisor.run().await.unwrap();

    assert_eq!(report.outcome, SupervisorOutcome::Stopped);
    assert!(matches!(
        report.runs[0].termination,
        Termination::Stopped { fatal: true, .. }
    ));
    assert_eq!(launcher.launched(), [1]);
    assert_eq!(launcher.terminated(), [1]);
}

#[tokio::test]
async fn test_trace_error_retries_only_before_start() {
    let temp_dir = TempDir::new().unwrap();
    let trace_error = "Instruments Trace Error : Failed to start trace.";
    let launcher = ScriptedLauncher::new(vec![
        RunScript::new().line(trace_error).stall(),
        RunScript::new()
            .line("<<SALTINEL>> Successful launch <<SALTINEL>>")
            .line(trace_error)
            .stall(),
        RunScript::new().line("never launched"),
    ]);
    let mut supervisor = RunSupervisor::from_config(&config_for(&temp_dir), launcher.clone()).unwrap();

    let report = supervisor.run().await.unwrap();

    assert_eq!(report.outcome, SupervisorOutcome::Stopped);
    assert_eq!(report.runs.len(), 2);
    assert!(report.runs[0].wants_restart());
    assert!(report.runs[1].started);
    assert!(!report.runs[1].wants_restart());
    assert_eq!(launcher.launched(), [1, 2]);
}

#[tokio::test]
async fn test_failing_exit_code_still_completes() {
    let temp_dir = TempDir::new().unwrap();
    let launcher = ScriptedLauncher::new(vec![RunScript::new().line("Fail: login").exit_code(3)]);
    let mut supervisor = RunSupervisor::from_config(&config_for(&temp_dir), launcher.clone()).unwrap();

    let report = supervisor.run().await.unwrap();

    assert!(report.is_completed());
    assert_eq!(
        report.runs[0].termination,
        Termination::Natural { exit_code: Some(3) }
    );
    assert!(launcher.terminated().is_empty());
}

#[tokio::test]
async fn test_failure_in_last_lines_still_restarts() {
    let temp_dir = TempDir::new().unwrap();
    let launcher = ScriptedLauncher::new(vec![
        RunScript::new().chunk(format!("<<SALTINEL>> {TARGET_GONE_AWOL} <<SALTINEL>>")),
        RunScript::new().line("clean"),
    ]);
    let mut supervisor = RunSupervisor::from_config(&config_for(&temp_dir), launcher.clone()).unwrap();

    let report = supervisor.run().await.unwrap();

    assert_eq!(report.runs.len(), 2);
    assert!(report.runs[0].wants_restart());
    assert!(report.is_completed());
}

#[tokio::test]
async fn test_listener_init_failure_is_fatal() {
    let calls = CallLog::default();
    let mut pipeline = Pipeline::new(LineAssembler::new(SaltinelMarkers::default()));
    pipeline.register(RecordingListener::new("stubborn", calls.clone()).fail_init());
    let launcher = ScriptedLauncher::new(vec![RunScript::new().line("unused")]);
    let mut supervisor = RunSupervisor::new(pipeline, launcher.clone());

    let err = supervisor.run().await.unwrap_err();

    match err {
        SupervisorError::Start(StartError::ListenerInit { listener, .. }) => {
            assert_eq!(listener, "stubborn");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(launcher.launched().is_empty());
}

#[tokio::test]
async fn test_launch_failure_finishes_listeners() {
    let calls = CallLog::default();
    let mut pipeline = Pipeline::new(LineAssembler::new(SaltinelMarkers::default()));
    pipeline.register(RecordingListener::new("rec", calls.clone()));
    let mut supervisor = RunSupervisor::new(pipeline, ScriptedLauncher::new(Vec::new()));

    let err = supervisor.run().await.unwrap_err();

    assert!(matches!(err, SupervisorError::Launch { run: 1, .. }));
    assert_eq!(calls.entries_for("rec"), ["init", "finish"]);
}
