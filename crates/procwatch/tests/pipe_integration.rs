//! Sessions over real child processes on plain pipes.

#![cfg(unix)]

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use procwatch::trigger::{RuleId, TriggerTable};
use procwatch::{
    CommandSpec, EndReason, ExitStatus, InteractiveSession, SessionConfig, SessionError,
    SessionState, TransportError,
};

fn shell(script: &str) -> CommandSpec {
    CommandSpec::builder(script).shell().build().unwrap()
}

fn quiet(spec: CommandSpec, table: TriggerTable) -> InteractiveSession {
    InteractiveSession::with_config(spec, table, SessionConfig::quiet())
}

#[tokio::test]
async fn missing_program_fails_start() {
    let spec = CommandSpec::new("definitely-not-a-real-program --flag").unwrap();
    let mut session = quiet(spec, TriggerTable::new());

    let err = session.start().await.unwrap_err();
    let SessionError::Transport { command, source } = &err else {
        panic!("expected a transport error, got {err:?}");
    };
    assert_eq!(command, "definitely-not-a-real-program --flag");
    assert!(matches!(source, TransportError::Spawn { .. }));
    assert!(err.to_string().contains("definitely-not-a-real-program"));
    assert_eq!(session.state(), SessionState::Failed);

    assert!(session.run_until_complete().await.is_err());
    assert_eq!(session.close().await.unwrap(), None);
}

#[tokio::test]
async fn termination_phrase_kills_a_chatty_command() {
    let spec = shell("echo Ready; echo 'Bye bye!'; while :; do echo spam; sleep 0.01; done");
    let table = TriggerTable::builder().terminate_on("Bye bye!").build().unwrap();

    let started = Instant::now();
    let report = InteractiveSession::run_with_config(spec, table, SessionConfig::quiet())
        .await
        .unwrap();

    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(report.state, SessionState::Terminated);
    assert_eq!(report.lines, 2);
    assert_eq!(
        report.exit_status().and_then(|s| s.signal()),
        Some(libc::SIGTERM)
    );
}

#[tokio::test]
async fn after_line_command_reaches_the_child() {
    let spec = shell("echo 'ready for input'; read cmd; echo \"got $cmd\"");
    let table = TriggerTable::builder()
        .after_line("ready for input", "start")
        .once(r"got (\w+)", |ctx| {
            let value = ctx.capture(1).unwrap_or_default().to_string();
            ctx.record("got", value);
            Ok(())
        })
        .build()
        .unwrap();

    let report = InteractiveSession::run_with_config(spec, table, SessionConfig::quiet())
        .await
        .unwrap();
    assert!(report.after_line_fired);
    assert_eq!(report.recorded("got"), Some("start"));
    assert_eq!(report.state, SessionState::Completed);
}

#[tokio::test]
async fn stderr_is_part_of_the_line_stream() {
    let spec = shell("echo out; echo err >&2");
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let table = TriggerTable::builder()
        .repeatable(".", move |ctx| {
            sink.lock().unwrap().push(ctx.line().to_string());
            Ok(())
        })
        .build()
        .unwrap();

    InteractiveSession::run_with_config(spec, table, SessionConfig::quiet())
        .await
        .unwrap();
    assert_eq!(*seen.lock().unwrap(), ["out\n", "err\n"]);
}

#[tokio::test]
async fn strict_mode_reports_the_exit_code() {
    let spec = shell("echo failing; exit 7");
    let config = SessionConfig::quiet().strict(true);
    let mut session = InteractiveSession::with_config(spec, TriggerTable::new(), config);
    session.start().await.unwrap();

    let err = session.run_until_complete().await.unwrap_err();
    let SessionError::AbnormalExit { command, code, report } = err else {
        panic!("expected an abnormal exit");
    };
    assert_eq!(command, "echo failing; exit 7");
    assert_eq!(code, 7);
    assert_eq!(report.lines, 1);
    assert_eq!(session.state(), SessionState::Failed);
    assert_eq!(session.wait_exit_status().await.unwrap(), Some(ExitStatus::Exited(7)));
}

#[tokio::test]
async fn closed_output_waits_for_the_real_exit() {
    let spec = shell("echo bye; exec >&- 2>&-; sleep 1; exit 0");
    let config = SessionConfig::quiet()
        .strict(true)
        .kill_grace(Duration::from_millis(300));
    let mut session = InteractiveSession::with_config(spec, TriggerTable::new(), config);
    session.start().await.unwrap();

    let report = session.run_until_complete().await.unwrap();
    assert_eq!(report.state, SessionState::Completed);
    assert_eq!(report.end_reason, Some(EndReason::EndOfStream));
    assert_eq!(report.exit_status(), Some(ExitStatus::Exited(0)));
}

#[tokio::test]
async fn cancel_while_waiting_for_exit_after_output_closed() {
    let spec = shell("exec >&- 2>&-; sleep 30");
    let config = SessionConfig::quiet().kill_grace(Duration::from_millis(200));
    let mut session = InteractiveSession::with_config(spec, TriggerTable::new(), config);
    session.start().await.unwrap();

    let cancel = session.cancel_handle();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(300)).await;
        cancel.cancel();
    });

    let started = Instant::now();
    let report = session.run_until_complete().await.unwrap();
    assert!(started.elapsed() < Duration::from_secs(10));
    assert_eq!(report.end_reason, Some(EndReason::Cancelled));
    assert_eq!(report.state, SessionState::Terminated);
    assert!(report.exit_status().is_some_and(|s| !s.success()));
}

#[tokio::test]
async fn direct_invocation_passes_quoted_arguments() {
    let spec = CommandSpec::new("printf '%s|%s\\n' 'two words' plain").unwrap();
    let table = TriggerTable::builder()
        .once(r"^two words\|plain\n$", |ctx| {
            ctx.record("ok", "yes");
            Ok(())
        })
        .build()
        .unwrap();

    let report = InteractiveSession::run_with_config(spec, table, SessionConfig::quiet())
        .await
        .unwrap();
    assert_eq!(report.recorded("ok"), Some("yes"));
}

#[tokio::test]
async fn environment_and_working_directory_apply() {
    let dir = std::env::temp_dir();
    let spec = CommandSpec::builder("echo \"$ROBOT\"; pwd")
        .shell()
        .env("ROBOT", "autobot01")
        .working_directory(&dir)
        .build()
        .unwrap();
    let lines = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&lines);
    let table = TriggerTable::builder()
        .repeatable(".", move |ctx| {
            sink.lock().unwrap().push(ctx.line().trim_end().to_string());
            Ok(())
        })
        .build()
        .unwrap();

    InteractiveSession::run_with_config(spec, table, SessionConfig::quiet())
        .await
        .unwrap();
    let lines = lines.lock().unwrap();
    assert_eq!(lines[0], "autobot01");
    let pwd = std::fs::canonicalize(&lines[1]).unwrap();
    assert_eq!(pwd, std::fs::canonicalize(&dir).unwrap());
}

#[tokio::test]
async fn cancel_stops_a_long_running_command() {
    let spec = shell("echo started; sleep 30");
    let mut session = quiet(spec, TriggerTable::new());
    session.start().await.unwrap();

    let cancel = session.cancel_handle();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        cancel.cancel();
    });

    let report = tokio::time::timeout(Duration::from_secs(10), session.run_until_complete())
        .await
        .expect("cancel should end the session")
        .unwrap();
    assert_eq!(report.end_reason, Some(EndReason::Cancelled));
    assert_eq!(report.state, SessionState::Terminated);
    assert_eq!(report.lines, 1);
}

#[tokio::test]
async fn close_kills_a_command_that_ignores_sigterm() {
    let spec = shell("trap '' TERM; echo armed; while :; do sleep 0.05; done");
    let config = SessionConfig::quiet().kill_grace(Duration::from_millis(200));
    let table = TriggerTable::builder()
        .once("armed", |ctx| {
            ctx.request_stop();
            Ok(())
        })
        .build()
        .unwrap();
    let mut session = InteractiveSession::with_config(spec, table, config);
    session.start().await.unwrap();

    let report = tokio::time::timeout(Duration::from_secs(10), session.run_until_complete())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(report.end_reason, Some(EndReason::StopRequested));
    assert_eq!(report.exit_status().and_then(|s| s.signal()), Some(libc::SIGKILL));
    assert_eq!(report.fired(RuleId::new(0)), 1);
}

#[tokio::test]
async fn echo_goes_to_the_configured_sink() {
    #[derive(Clone, Default)]
    struct Sink(Arc<Mutex<Vec<u8>>>);
    impl std::io::Write for Sink {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    let sink = Sink::default();
    let mut session = InteractiveSession::new(shell("echo one; printf two"), TriggerTable::new())
        .with_echo_sink(sink.clone());
    session.start().await.unwrap();
    session.run_until_complete().await.unwrap();

    assert_eq!(*sink.0.lock().unwrap(), b"one\ntwo");
}
