use illuminator_core::testing::{CallLog, RecordingListener};
use illuminator_core::{
    ConsoleLogger, IntermittentFailureDetector, LineAssembler, Listener, ListenerError, Message,
    Pipeline, SaltinelHandler, SaltinelListener, SaltinelMarkers, TARGET_GONE_AWOL,
    console_log_path,
};
use std::fs;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

fn pipeline_with_detector(console_dir: &std::path::Path) -> Pipeline {
    let mut pipeline = Pipeline::new(LineAssembler::new(SaltinelMarkers::default()));
    pipeline.register(ConsoleLogger::new(console_dir));
    let detector = IntermittentFailureDetector::new(Arc::new(pipeline.escalation_sender()));
    pipeline.register(detector.into_listener());
    pipeline
}

#[test]
fn test_scenario_logs_plain_and_inner_lines_and_escalates_once() {
    let temp_dir = TempDir::new().unwrap();
    let mut pipeline = pipeline_with_detector(temp_dir.path());

    pipeline.start().unwrap();
    let mut escalations = pipeline.feed(
        b"hello\n<<SALTINEL>>\nUIATargetHasGoneAWOLException\n<<SALTINEL>>\nworld\n",
    );
    escalations.extend(pipeline.end_of_stream());
    pipeline.finish().unwrap();

    let log = fs::read_to_string(console_log_path(temp_dir.path(), 1)).unwrap();
    assert_eq!(log, "hello\nUIATargetHasGoneAWOLException\nworld\n");

    assert_eq!(escalations.len(), 1);
    assert_eq!(escalations[0].reason(), TARGET_GONE_AWOL);
    assert_eq!(escalations[0].run, 1);
}

#[test]
fn test_repeated_failure_escalates_once_per_run() {
    let temp_dir = TempDir::new().unwrap();
    let mut pipeline = pipeline_with_detector(temp_dir.path());
    let block = format!("<<SALTINEL>>\n{TARGET_GONE_AWOL}\n<<SALTINEL>>\n");

    pipeline.start().unwrap();
    let first_run: usize = (0..3).map(|_| pipeline.feed(block.as_bytes()).len()).sum();
    pipeline.finish().unwrap();

    pipeline.start().unwrap();
    let second_run = pipeline.feed(block.as_bytes());
    pipeline.finish().unwrap();

    assert_eq!(first_run, 1);
    assert_eq!(second_run.len(), 1);
    assert_eq!(second_run[0].run, 2);
}

#[test]
fn test_console_log_rotates_per_run() {
    let temp_dir = TempDir::new().unwrap();
    let mut pipeline = Pipeline::new(LineAssembler::new(SaltinelMarkers::default()));
    pipeline.register(ConsoleLogger::new(temp_dir.path()));

    pipeline.start().unwrap();
    pipeline.feed(b"first run\n");
    pipeline.finish().unwrap();

    pipeline.start().unwrap();
    pipeline.feed(b"second run\nstill second\n");
    pipeline.finish().unwrap();

    assert_eq!(
        fs::read_to_string(temp_dir.path().join("instruments001.log")).unwrap(),
        "first run\n"
    );
    assert_eq!(
        fs::read_to_string(temp_dir.path().join("instruments002.log")).unwrap(),
        "second run\nstill second\n"
    );
}

#[derive(Default, Clone)]
struct InnerBlocks(Arc<Mutex<Vec<Vec<String>>>>);

impl SaltinelHandler for InnerBlocks {
    fn name(&self) -> &str {
        "inner-blocks"
    }

    fn on_saltinel(&mut self, inner: &Message) -> Result<(), ListenerError> {
        self.0.lock().unwrap().push(inner.lines().to_vec());
        Ok(())
    }
}

#[test]
fn test_framed_lines_reach_handler_unchanged() {
    let blocks = InnerBlocks::default();
    let mut pipeline = Pipeline::new(LineAssembler::new(SaltinelMarkers::default()));
    pipeline.register(SaltinelListener::new(blocks.clone()));

    pipeline.start().unwrap();
    pipeline.feed(b"noise\n<<SALTINEL>>\n  indented\nsecond line\n\nfourth\n<<SALTINEL>>\n");
    pipeline.finish().unwrap();

    assert_eq!(
        *blocks.0.lock().unwrap(),
        vec![vec![
            "  indented".to_string(),
            "second line".to_string(),
            String::new(),
            "fourth".to_string(),
        ]]
    );
}

#[test]
fn test_unterminated_block_is_logged_but_not_handled() {
    let temp_dir = TempDir::new().unwrap();
    let blocks = InnerBlocks::default();
    let mut pipeline = pipeline_with_detector(temp_dir.path());
    pipeline.register(SaltinelListener::new(blocks.clone()));

    pipeline.start().unwrap();
    let mut escalations = pipeline.feed(
        format!("before\n<<SALTINEL>>\n{TARGET_GONE_AWOL}\ncut off").as_bytes(),
    );
    escalations.extend(pipeline.end_of_stream());
    pipeline.finish().unwrap();

    assert!(blocks.0.lock().unwrap().is_empty());
    assert!(escalations.is_empty());
    let log = fs::read_to_string(console_log_path(temp_dir.path(), 1)).unwrap();
    assert_eq!(log, format!("before\n{TARGET_GONE_AWOL} cut off\n"));
}

#[test]
fn test_failing_listener_does_not_starve_later_ones() {
    let temp_dir = TempDir::new().unwrap();
    let blocker = temp_dir.path().join("blocker");
    fs::write(&blocker, "a file where the console directory should be").unwrap();

    let calls = CallLog::default();
    let mut pipeline = Pipeline::new(LineAssembler::new(SaltinelMarkers::default()));
    pipeline.register(ConsoleLogger::new(&blocker));
    pipeline.register(RecordingListener::new("after", calls.clone()));

    pipeline.start().unwrap();
    pipeline.feed(b"one\ntwo\n");
    assert_eq!(pipeline.dispatcher().dead_listeners(), ["console-logger"]);
    pipeline.finish().unwrap();

    assert_eq!(calls.entries_for("after"), ["init", "one", "two", "finish"]);
}

/// Console logger that breaks right after writing a given line, the way a
/// full disk would.
struct BreaksAfterWriting {
    inner: ConsoleLogger,
    poison: &'static str,
}

impl Listener for BreaksAfterWriting {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn on_init(&mut self) -> Result<(), ListenerError> {
        self.inner.on_init()
    }

    fn receive(&mut self, message: &Message) -> Result<(), ListenerError> {
        self.inner.receive(message)?;
        if message.full_line() == self.poison {
            return Err(ListenerError::failed("disk full"));
        }
        Ok(())
    }

    fn on_automation_finished(&mut self) -> Result<(), ListenerError> {
        self.inner.on_automation_finished()
    }
}

#[test]
fn test_isolated_console_logger_still_rotates_next_run() {
    let temp_dir = TempDir::new().unwrap();
    let mut pipeline = Pipeline::new(LineAssembler::new(SaltinelMarkers::default()));
    pipeline.register(BreaksAfterWriting {
        inner: ConsoleLogger::new(temp_dir.path()),
        poison: "breaks here",
    });

    pipeline.start().unwrap();
    pipeline.feed(b"first\nbreaks here\nlost\n");
    assert_eq!(pipeline.dispatcher().dead_listeners(), ["console-logger"]);
    pipeline.finish().unwrap();

    pipeline.start().unwrap();
    pipeline.feed(b"second run\n");
    pipeline.finish().unwrap();

    assert_eq!(
        fs::read_to_string(console_log_path(temp_dir.path(), 1)).unwrap(),
        "first\nbreaks here\n"
    );
    assert_eq!(
        fs::read_to_string(console_log_path(temp_dir.path(), 2)).unwrap(),
        "second run\n"
    );
}
