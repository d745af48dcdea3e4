//! Session behaviour over the scripted transport.
//!
//! These tests require the `mock` feature to be enabled.

#![cfg(feature = "mock")]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use procwatch::mock::{ScriptedTransport, TranscriptEvent};
use procwatch::trigger::{RuleId, TriggerTable};
use procwatch::{
    CommandSpec, EndReason, ExitStatus, InteractiveSession, SessionConfig, SessionError,
    SessionState, TransportKind,
};

fn session(table: TriggerTable, transport: ScriptedTransport) -> InteractiveSession {
    session_with(table, transport, SessionConfig::quiet())
}

fn session_with(
    table: TriggerTable,
    transport: ScriptedTransport,
    config: SessionConfig,
) -> InteractiveSession {
    let spec = CommandSpec::new("scripted-command").unwrap();
    InteractiveSession::with_config(spec, table, config).with_transport(transport)
}

fn read(text: &str) -> TranscriptEvent {
    TranscriptEvent::Read(text.as_bytes().to_vec())
}

fn write(text: &str) -> TranscriptEvent {
    TranscriptEvent::Write(text.as_bytes().to_vec())
}

#[tokio::test]
async fn termination_phrase_stops_reading() {
    let transport = ScriptedTransport::new()
        .line("Ready")
        .line("Bye bye!")
        .line("never read");
    let handle = transport.handle();
    let table = TriggerTable::builder().terminate_on("Bye bye!").build().unwrap();

    let mut session = session(table, transport);
    session.start().await.unwrap();
    let report = session.run_until_complete().await.unwrap();

    assert_eq!(session.state(), SessionState::Terminated);
    assert_eq!(report.end_reason, Some(EndReason::TerminationPhrase("Bye bye!".into())));
    assert_eq!(report.lines, 2);
    assert_eq!(
        handle.log(),
        [read("Ready\n"), read("Bye bye!\n"), TranscriptEvent::Terminate, TranscriptEvent::Close]
    );
    assert_eq!(handle.unread(), 1);
}

#[tokio::test]
async fn once_capture_sees_the_first_line_only() {
    let captured = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&captured);
    let table = TriggerTable::builder()
        .once(r"Log ID: (\S+)", move |ctx| {
            sink.lock().unwrap().push(ctx.line().to_string());
            let id = ctx.capture(1).unwrap_or_default().to_string();
            ctx.record("log_id", id);
            Ok(())
        })
        .build()
        .unwrap();
    let transport = ScriptedTransport::new()
        .line("Log ID: abc123")
        .line("Log ID: abc123");

    let mut session = session(table, transport);
    session.start().await.unwrap();
    let report = session.run_until_complete().await.unwrap();

    assert_eq!(*captured.lock().unwrap(), ["Log ID: abc123\n"]);
    assert_eq!(report.fired(RuleId::new(0)), 1);
    assert_eq!(report.recorded("log_id"), Some("abc123"));
    assert_eq!(report.state, SessionState::Completed);
    assert_eq!(report.end_reason, Some(EndReason::EndOfStream));
}

#[tokio::test]
async fn after_line_command_is_written_before_the_next_read() {
    let transport = ScriptedTransport::new()
        .line("...ready for input...")
        .line("working")
        .line("...ready for input...");
    let handle = transport.handle();
    let table = TriggerTable::builder()
        .after_line("ready for input", "start")
        .build()
        .unwrap();

    let mut session = session(table, transport);
    session.start().await.unwrap();
    let report = session.run_until_complete().await.unwrap();

    assert!(report.after_line_fired);
    assert_eq!(
        handle.log(),
        [
            read("...ready for input...\n"),
            write("start\n"),
            read("working\n"),
            read("...ready for input...\n"),
            TranscriptEvent::Close,
        ]
    );
}

#[tokio::test]
async fn lines_split_across_chunks_are_evaluated_whole() {
    let transport = ScriptedTransport::new()
        .chunk("Log I")
        .chunk("D: x1\nLog ID")
        .chunk(": x2\npartial");
    let table = TriggerTable::builder()
        .repeatable(r"Log ID: (\S+)", |ctx| {
            let id = ctx.capture(1).unwrap_or_default().to_string();
            ctx.record("last", id);
            Ok(())
        })
        .build()
        .unwrap();

    let mut session = session(table, transport);
    session.start().await.unwrap();
    let report = session.run_until_complete().await.unwrap();

    assert_eq!(report.lines, 3);
    assert_eq!(report.fired(RuleId::new(0)), 2);
    assert_eq!(report.recorded("last"), Some("x2"));
}

#[tokio::test]
async fn responses_drive_a_dialogue() {
    let transport = ScriptedTransport::new()
        .line("Username:")
        .reply("robot\n", "Password:\n")
        .reply("secret\n", "Welcome\n");
    let handle = transport.handle();
    let table = TriggerTable::builder()
        .once("Username:", |ctx| {
            ctx.send_line("robot");
            Ok(())
        })
        .once("Password:", |ctx| {
            ctx.send_line("secret");
            Ok(())
        })
        .once("Welcome", |ctx| {
            ctx.request_stop();
            Ok(())
        })
        .build()
        .unwrap();

    let mut session = session(table, transport);
    session.start().await.unwrap();
    let report = session.run_until_complete().await.unwrap();

    assert_eq!(report.end_reason, Some(EndReason::StopRequested));
    assert_eq!(report.state, SessionState::Terminated);
    assert_eq!(handle.written_text(), "robot\nsecret\n");
    assert!(handle.was_terminated());
}

#[tokio::test]
async fn action_failures_are_reported_not_fatal() {
    let transport = ScriptedTransport::new().line("a").line("b");
    let table = TriggerTable::builder()
        .repeatable(".", |_| Err("not today".into()))
        .named("grumpy")
        .build()
        .unwrap();

    let mut session = session(table, transport);
    session.start().await.unwrap();
    let report = session.run_until_complete().await.unwrap();

    assert_eq!(report.state, SessionState::Completed);
    assert_eq!(report.action_errors.len(), 2);
    assert_eq!(report.action_errors[0].rule_name.as_deref(), Some("grumpy"));
    assert_eq!(report.action_errors[1].line, "b\n");
}

#[tokio::test]
async fn strict_mode_turns_a_non_zero_exit_into_an_error() {
    let transport = ScriptedTransport::new().line("oops").exit_code(3);
    let mut session = session_with(
        TriggerTable::new(),
        transport,
        SessionConfig::quiet().strict(true),
    );
    session.start().await.unwrap();
    let err = session.run_until_complete().await.unwrap_err();

    assert!(err.is_abnormal_exit());
    let SessionError::AbnormalExit { code, report, .. } = err else {
        unreachable!()
    };
    assert_eq!(code, 3);
    assert_eq!(report.lines, 1);
    assert_eq!(session.state(), SessionState::Failed);
    assert_eq!(
        session.wait_exit_status().await.unwrap(),
        Some(ExitStatus::Exited(3))
    );
}

#[tokio::test]
async fn non_zero_exit_is_fine_without_strict_mode() {
    let transport = ScriptedTransport::new().line("oops").exit_code(3);
    let mut session = session(TriggerTable::new(), transport);
    session.start().await.unwrap();
    let report = session.run_until_complete().await.unwrap();

    assert_eq!(report.state, SessionState::Completed);
    assert_eq!(report.exit_code, Some(3));
}

#[tokio::test]
async fn strict_mode_ignores_terminated_sessions() {
    let transport = ScriptedTransport::new()
        .line("Bye bye!")
        .exit_status(ExitStatus::Signaled(libc::SIGTERM));
    let table = TriggerTable::builder().terminate_on("Bye").build().unwrap();
    let mut session = session_with(table, transport, SessionConfig::quiet().strict(true));
    session.start().await.unwrap();

    let report = session.run_until_complete().await.unwrap();
    assert_eq!(report.state, SessionState::Terminated);
}

#[tokio::test]
async fn cancel_ends_a_hanging_session() {
    let transport = ScriptedTransport::new().line("tick").hang();
    let handle = transport.handle();
    let mut session = session(TriggerTable::new(), transport);
    session.start().await.unwrap();

    let cancel = session.cancel_handle();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
    });

    let report = tokio::time::timeout(Duration::from_secs(5), session.run_until_complete())
        .await
        .expect("cancel should end the loop")
        .unwrap();

    assert_eq!(report.end_reason, Some(EndReason::Cancelled));
    assert_eq!(report.state, SessionState::Terminated);
    assert!(handle.was_terminated());
    assert!(handle.is_closed());
}

#[tokio::test]
async fn output_pushed_later_is_still_read() {
    let transport = ScriptedTransport::new().hang();
    let handle = transport.handle();
    let table = TriggerTable::builder().terminate_on("done").build().unwrap();
    let mut session = session(table, transport);
    session.start().await.unwrap();

    let feeder = handle.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        feeder.push_chunk("step 1\n");
        tokio::time::sleep(Duration::from_millis(20)).await;
        feeder.push_chunk("done\n");
    });

    let report = tokio::time::timeout(Duration::from_secs(5), session.run_until_complete())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(report.lines, 2);
    assert_eq!(report.state, SessionState::Terminated);
}

#[tokio::test]
async fn report_carries_transport_kind_and_serializes() {
    let transport = ScriptedTransport::new()
        .line("hello")
        .kind(TransportKind::RemoteShell);
    let mut session = session(TriggerTable::new(), transport);
    session.start().await.unwrap();
    let report = session.run_until_complete().await.unwrap();

    assert_eq!(report.transport, TransportKind::RemoteShell);
    let json = report.to_json().unwrap();
    assert!(json.contains("\"remote_shell\""));
    assert!(json.contains("\"completed\""));
}

#[tokio::test]
async fn run_is_rejected_after_the_session_finished() {
    let mut session = session(TriggerTable::new(), ScriptedTransport::new());
    session.start().await.unwrap();
    session.run_until_complete().await.unwrap();

    let err = session.run_until_complete().await.unwrap_err();
    assert!(matches!(err, SessionError::InvalidState { operation: "run", .. }));
    assert_eq!(session.close().await.unwrap(), Some(ExitStatus::Exited(0)));
}

#[tokio::test]
async fn table_can_be_reused_after_reset() {
    let table = TriggerTable::builder().once("go", |_| Ok(())).build().unwrap();
    let mut first = session(table, ScriptedTransport::new().line("go"));
    first.start().await.unwrap();
    assert_eq!(first.run_until_complete().await.unwrap().fired(RuleId::new(0)), 1);

    let mut table = first.into_table();
    table.reset();
    let mut second = session(table, ScriptedTransport::new().line("go"));
    second.start().await.unwrap();
    assert_eq!(second.run_until_complete().await.unwrap().fired(RuleId::new(0)), 1);
}

#[derive(Clone, Default)]
struct LogBuffer(Arc<Mutex<Vec<u8>>>);

impl std::io::Write for LogBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[tokio::test]
async fn action_failures_are_logged_with_the_rule() {
    let logs = LogBuffer::default();
    let writer = logs.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(move || writer.clone())
        .with_ansi(false)
        .with_max_level(tracing::Level::WARN)
        .finish();
    let _guard = tracing::subscriber::set_default(subscriber);

    let table = TriggerTable::builder()
        .once("boom", |_| Err("exploded".into()))
        .named("detonator")
        .build()
        .unwrap();
    let mut session = session(table, ScriptedTransport::new().line("boom"));
    session.start().await.unwrap();
    session.run_until_complete().await.unwrap();

    let text = String::from_utf8(logs.0.lock().unwrap().clone()).unwrap();
    assert!(text.contains("trigger action failed"));
    assert!(text.contains("detonator"));
    assert!(text.contains("exploded"));
}
