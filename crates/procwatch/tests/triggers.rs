//! Trigger table tests.

use std::sync::{Arc, Mutex};

use procwatch::ConfigError;
use procwatch::trigger::{Action, FirePolicy, RuleId, TriggerContext, TriggerTable};
use proptest::prelude::*;

type Seen = Arc<Mutex<Vec<String>>>;

fn noop() -> Action {
    Box::new(|_: &mut TriggerContext<'_>| Ok::<(), procwatch::ActionFailure>(()))
}

fn capture_into(
    seen: &Seen,
) -> impl FnMut(&mut TriggerContext<'_>) -> Result<(), procwatch::ActionFailure> + Send + 'static {
    let seen = Arc::clone(seen);
    move |ctx| {
        seen.lock().unwrap().push(ctx.line().to_string());
        Ok(())
    }
}

#[test]
fn once_rule_fires_a_single_time() {
    let seen = Seen::default();
    let mut table = TriggerTable::builder()
        .once(r"Log ID: (\S+)", capture_into(&seen))
        .build()
        .unwrap();

    let first = table.evaluate("Log ID: abc123\n");
    let second = table.evaluate("Log ID: abc123\n");

    assert_eq!(first.matched, [RuleId::new(0)]);
    assert!(second.matched.is_empty());
    assert_eq!(*seen.lock().unwrap(), ["Log ID: abc123\n"]);
    assert!(!table.rule(RuleId::new(0)).unwrap().is_enabled());
}

#[test]
fn repeatable_rule_fires_on_every_match() {
    let seen = Seen::default();
    let mut table = TriggerTable::builder()
        .repeatable("error", capture_into(&seen))
        .build()
        .unwrap();

    for line in ["error 1\n", "fine\n", "error 2\n"] {
        table.evaluate(line);
    }
    assert_eq!(*seen.lock().unwrap(), ["error 1\n", "error 2\n"]);
    assert_eq!(table.rule(RuleId::new(0)).unwrap().fire_count(), 2);
}

#[test]
fn termination_phrase_wins_over_rules() {
    let seen = Seen::default();
    let mut table = TriggerTable::builder()
        .repeatable("Bye", capture_into(&seen))
        .after_line("Bye", "never")
        .terminate_on("Bye bye!")
        .build()
        .unwrap();

    let eval = table.evaluate("Bye bye!\n");
    assert!(eval.terminate);
    assert_eq!(eval.termination_phrase.as_deref(), Some("Bye bye!"));
    assert!(eval.matched.is_empty());
    assert!(eval.input.is_empty());
    assert!(seen.lock().unwrap().is_empty());
}

#[test]
fn after_line_injects_once() {
    let mut table = TriggerTable::builder()
        .after_line("ready for input", "start")
        .build()
        .unwrap();

    let first = table.evaluate("...ready for input...\n");
    let second = table.evaluate("...ready for input...\n");
    assert!(first.after_line_fired);
    assert_eq!(first.input, b"start\n");
    assert!(!second.after_line_fired);
    assert!(second.input.is_empty());
}

#[test]
fn responses_precede_the_after_line_command() {
    let mut table = TriggerTable::builder()
        .once("ready", |ctx| {
            ctx.send_line("y");
            Ok(())
        })
        .after_line("ready", "start")
        .build()
        .unwrap();

    assert_eq!(table.evaluate("ready\n").input, b"y\nstart\n");
}

#[test]
fn failing_actions_are_isolated() {
    let seen = Seen::default();
    let mut table = TriggerTable::builder()
        .repeatable("x", |_| Err("boom".into()))
        .named("fails")
        .repeatable("x", |_| panic!("worse"))
        .repeatable("x", capture_into(&seen))
        .build()
        .unwrap();

    let eval = table.evaluate("x1\n");
    let next = table.evaluate("x2\n");

    assert_eq!(eval.action_errors.len(), 2);
    assert_eq!(eval.action_errors[0].rule_name.as_deref(), Some("fails"));
    assert_eq!(eval.action_errors[0].message, "boom");
    assert!(eval.action_errors[1].message.contains("worse"));
    assert_eq!(next.matched.len(), 3);
    assert_eq!(*seen.lock().unwrap(), ["x1\n", "x2\n"]);
}

#[test]
fn stop_request_skips_later_rules_and_after_line() {
    let seen = Seen::default();
    let mut table = TriggerTable::builder()
        .once("done", |ctx| {
            ctx.send_line("bye");
            ctx.request_stop();
            Ok(())
        })
        .repeatable("done", capture_into(&seen))
        .after_line("done", "more")
        .build()
        .unwrap();

    let eval = table.evaluate("done\n");
    assert!(eval.stop_requested);
    assert!(eval.should_stop());
    assert_eq!(eval.input, b"bye\n");
    assert!(!eval.after_line_fired);
    assert!(seen.lock().unwrap().is_empty());
}

#[test]
fn captures_are_available_by_index_and_name() {
    let mut table = TriggerTable::builder()
        .once(r"(?P<key>\w+)=(\d+)", |ctx| {
            let key = ctx.named("key").unwrap_or_default().to_string();
            let value = ctx.capture(2).unwrap_or_default().to_string();
            ctx.record(key, value);
            Ok(())
        })
        .build()
        .unwrap();

    let eval = table.evaluate("retries=3\n");
    assert_eq!(eval.recorded, [("retries".to_string(), "3".to_string())]);
}

#[test]
fn reset_rearms_once_rules_and_after_line() {
    let mut table = TriggerTable::builder()
        .once("a", |_| Ok(()))
        .after_line("a", "go")
        .build()
        .unwrap();
    table.evaluate("a\n");
    table.reset();

    let eval = table.evaluate("a\n");
    assert_eq!(eval.matched.len(), 1);
    assert!(eval.after_line_fired);
}

#[test]
fn disable_is_idempotent() {
    let mut table = TriggerTable::new();
    let id = table.add("a", FirePolicy::Repeatable, |_| Ok(())).unwrap();
    table.disable(id);
    table.disable(id);
    table.disable(RuleId::new(42));
    assert!(table.evaluate("a\n").matched.is_empty());
}

#[test]
fn reset_keeps_explicitly_disabled_rules_off() {
    let mut table = TriggerTable::new();
    let spent = table.add("a", FirePolicy::Once, |_| Ok(())).unwrap();
    let off = table.add("a", FirePolicy::Repeatable, |_| Ok(())).unwrap();
    table.disable(off);
    assert_eq!(table.evaluate("a\n").matched, vec![spent]);

    table.reset();
    assert_eq!(table.evaluate("a\n").matched, vec![spent]);

    table.enable(off);
    assert_eq!(table.evaluate("a\n").matched, vec![off]);
}

#[test]
fn parallel_lists_must_line_up() {
    let actions = vec![noop(), noop()];
    let err = TriggerTable::from_parallel(["a", "b"], actions, &[true]).unwrap_err();
    assert!(matches!(
        err,
        ConfigError::MismatchedRules { patterns: 2, actions: 2, policies: 1 }
    ));
}

#[test]
fn parallel_lists_build_rules_in_order() {
    let actions = vec![noop(), noop()];
    let mut table = TriggerTable::from_parallel(["a", "b"], actions, &[true, false]).unwrap();
    assert_eq!(table.rule(RuleId::new(0)).unwrap().policy(), FirePolicy::Once);
    assert_eq!(table.evaluate("ab\n").matched, [RuleId::new(0), RuleId::new(1)]);
    assert_eq!(table.evaluate("ab\n").matched, [RuleId::new(1)]);
}

#[test]
fn invalid_pattern_is_a_config_error() {
    let err = TriggerTable::builder().once("(", |_| Ok(())).build().unwrap_err();
    assert!(matches!(err, ConfigError::InvalidPattern { .. }));
}

#[test]
fn empty_termination_phrase_is_rejected() {
    assert!(TriggerTable::builder().terminate_on("").build().is_err());
}

proptest! {
    #[test]
    fn fire_counts_follow_the_policy(matches in prop::collection::vec(any::<bool>(), 1..40)) {
        let mut table = TriggerTable::builder()
            .once("hit", |_| Ok(()))
            .repeatable("hit", |_| Ok(()))
            .after_line("hit", "go")
            .build()
            .unwrap();

        let mut injected = 0;
        for &hit in &matches {
            let eval = table.evaluate(if hit { "hit\n" } else { "miss\n" });
            injected += usize::from(eval.after_line_fired);
        }

        let hits = matches.iter().filter(|&&h| h).count() as u64;
        prop_assert_eq!(table.rule(RuleId::new(0)).unwrap().fire_count(), hits.min(1));
        prop_assert_eq!(table.rule(RuleId::new(1)).unwrap().fire_count(), hits);
        prop_assert_eq!(injected as u64, hits.min(1));
    }
}
