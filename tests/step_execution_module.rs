use runbook::comm::{CommChannel, MessageKind, MessageQueue};
use runbook::context::{Context, VariableName, VariableValue};
use runbook::step::{ExecutionError, Step, StepType, Timeout};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

fn name(n: &str) -> VariableName {
    VariableName::new(n).expect("variable name")
}

fn names(list: &[&str]) -> BTreeSet<VariableName> {
    list.iter().map(|n| name(n)).collect()
}

fn action(script: &str, vars: &[&str]) -> Step {
    Step::new(StepType::Action)
        .with_script(script)
        .with_used_context_variable_names(names(vars))
}

#[test]
fn declared_variables_round_trip_through_the_script() {
    let mut context = Context::new();
    context.set(name("X"), VariableValue::Integer(0));

    let mut step = action("X = X + 1", &["X"]);
    step.execute(&mut context, None, 0).expect("execute");

    assert_eq!(context.get("X"), Some(&VariableValue::Integer(1)));
}

#[test]
fn untouched_integers_stay_integers() {
    let mut context = Context::new();
    context.set(name("x"), VariableValue::Integer(7));

    let mut step = action("return x", &["x"]);
    let result = step.execute(&mut context, None, 0).expect("execute");

    assert!(result);
    assert_eq!(context.get("x"), Some(&VariableValue::Integer(7)));
}

#[test]
fn floats_and_strings_keep_their_types() {
    let mut context = Context::new();
    context.set(name("f"), VariableValue::Float(1.5));
    context.set(name("s"), VariableValue::String("ab".to_string()));

    let mut step = action("f = f * 2\ns = s .. 'c'", &["f", "s"]);
    step.execute(&mut context, None, 0).expect("execute");

    assert_eq!(context.get("f"), Some(&VariableValue::Float(3.0)));
    assert_eq!(
        context.get("s"),
        Some(&VariableValue::String("abc".to_string()))
    );
}

#[test]
fn logical_result_of_the_final_value() {
    let cases = [
        ("return true", true),
        ("return false", false),
        ("return nil", false),
        ("return 0", false),
        ("return 1", true),
        ("return -1", true),
        ("return 0.0", false),
        ("return 0.5", true),
        ("return ''", false),
        ("return 'x'", true),
        ("", false),
        ("x = 1", false),
    ];
    for (script, expected) in cases {
        let mut context = Context::new();
        let mut step = action(script, &[]);
        let result = step.execute(&mut context, None, 0).expect(script);
        assert_eq!(result, expected, "script `{script}`");
    }
}

#[test]
fn undeclared_assignments_are_not_exported() {
    let mut context = Context::new();
    let mut step = action("y = 5", &[]);
    step.execute(&mut context, None, 0).expect("execute");
    assert_eq!(context.get("y"), None);
}

#[test]
fn booleans_are_silently_not_exported() {
    let mut context = Context::new();
    let mut step = action("b = true", &["b"]);
    step.execute(&mut context, None, 0).expect("execute");
    assert_eq!(context.get("b"), None);
}

#[test]
fn missing_context_variables_import_as_nil() {
    let mut context = Context::new();
    let mut step = action("return x == nil", &["x"]);
    let result = step.execute(&mut context, None, 0).expect("execute");
    assert!(result);
}

#[test]
fn script_errors_carry_the_diagnostic() {
    let mut context = Context::new();
    let mut step = action("error('boom')", &[]);
    let error = step.execute(&mut context, None, 0).expect_err("must fail");
    match error {
        ExecutionError::Script { message } => assert!(message.contains("boom"), "{message}"),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn syntax_errors_are_script_errors() {
    let mut context = Context::new();
    let mut step = action("not a lua program", &[]);
    assert!(matches!(
        step.execute(&mut context, None, 0),
        Err(ExecutionError::Script { .. })
    ));
}

#[test]
fn dangerous_facilities_are_absent() {
    let mut context = Context::new();
    let mut step = action(
        "return os == nil and io == nil and package == nil and debug == nil \
         and dofile == nil and loadfile == nil and require == nil",
        &[],
    );
    assert!(step.execute(&mut context, None, 0).expect("execute"));
}

#[test]
fn safe_libraries_are_present() {
    let mut context = Context::new();
    let mut step = action(
        "return string ~= nil and table ~= nil and math ~= nil and pcall ~= nil",
        &[],
    );
    assert!(step.execute(&mut context, None, 0).expect("execute"));
}

#[test]
fn print_posts_step_output_messages() {
    let (queue, receiver) = MessageQueue::bounded(16);
    let comm: Arc<dyn CommChannel> = queue;

    let mut context = Context::new();
    let mut step = action("print('hello', 42)", &[]);
    step.execute(&mut context, Some(&comm), 5).expect("execute");

    let output: Vec<_> = receiver
        .try_iter()
        .filter(|m| m.kind == MessageKind::StepOutput)
        .collect();
    assert_eq!(output.len(), 1);
    assert_eq!(output[0].text, "hello\t42");
    assert_eq!(output[0].step_index, Some(5));
}

#[test]
fn busy_loop_hits_the_timeout() {
    let mut context = Context::new();
    let mut step = action("while true do end", &[]).with_timeout(Timeout::from_millis(100));

    let started = Instant::now();
    let error = step.execute(&mut context, None, 0).expect_err("must abort");
    assert!(matches!(error, ExecutionError::Timeout { .. }));
    assert!(started.elapsed() < Duration::from_millis(300), "took too long");
    assert!(!step.is_running());
}

#[test]
fn sleep_respects_the_deadline() {
    let mut context = Context::new();
    let mut step = action("sleep(10000)", &[]).with_timeout(Timeout::from_millis(50));

    let started = Instant::now();
    let error = step.execute(&mut context, None, 0).expect_err("must abort");
    assert!(matches!(error, ExecutionError::Timeout { .. }));
    assert!(started.elapsed() < Duration::from_secs(1));
}

#[test]
fn terminate_sequence_stops_a_busy_loop() {
    let mut context = Context::new();
    let mut step = action("terminate_sequence() while true do end", &[]);

    let started = Instant::now();
    let error = step.execute(&mut context, None, 0).expect_err("must stop");
    assert!(matches!(error, ExecutionError::Terminated));
    assert!(started.elapsed() < Duration::from_secs(1));
}

#[test]
fn inbound_termination_request_stops_the_script() {
    let (queue, _receiver) = MessageQueue::bounded(16);
    queue.request_termination();
    let comm: Arc<dyn CommChannel> = queue;

    let mut context = Context::new();
    let mut step = action("while true do end", &[]);
    let error = step
        .execute(&mut context, Some(&comm), 0)
        .expect_err("must stop");
    assert!(matches!(error, ExecutionError::Terminated));
}

#[test]
fn execution_stamps_the_execution_time() {
    let mut context = Context::new();
    let mut step = action("return 1", &[]);
    assert!(step.time_of_last_execution().is_none());
    step.execute(&mut context, None, 0).expect("execute");
    assert!(step.time_of_last_execution().is_some());
}

#[test]
fn context_setup_hook_installs_extra_globals() {
    let mut context = Context::new();
    context.set_step_setup(|lua| lua.globals().set("answer", 42));

    let mut step = action("return answer == 42", &[]);
    assert!(step.execute(&mut context, None, 0).expect("execute"));
}

#[test]
fn step_messages_report_start_and_result() {
    let (queue, receiver) = MessageQueue::bounded(16);
    let comm: Arc<dyn CommChannel> = queue;

    let mut context = Context::new();
    let mut step = action("return true", &[]);
    step.execute(&mut context, Some(&comm), 2).expect("execute");

    let kinds: Vec<MessageKind> = receiver.try_iter().map(|m| m.kind).collect();
    assert_eq!(kinds, vec![MessageKind::StepStarted, MessageKind::StepStopped]);
}

#[test]
fn failing_steps_report_step_stopped_with_error() {
    let (queue, receiver) = MessageQueue::bounded(16);
    let comm: Arc<dyn CommChannel> = queue;

    let mut context = Context::new();
    let mut step = action("error('nope')", &[]);
    step.execute(&mut context, Some(&comm), 0)
        .expect_err("must fail");

    let kinds: Vec<MessageKind> = receiver.try_iter().map(|m| m.kind).collect();
    assert_eq!(
        kinds,
        vec![MessageKind::StepStarted, MessageKind::StepStoppedWithError]
    );
}
