//! Console execution state machine over the live channel.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::timeout;

use kernel_interop::protocol::{AsyncEvent, OutputStream};
use kernel_interop::repl::{Console, ConsoleError, ConsoleListener, ConsoleOutput, ExecutionState};

use crate::support::{mock_session, CallRecord, KernelHandle, WAIT};

#[derive(Default)]
struct RecordingOutput(Mutex<Vec<(String, OutputStream)>>);

impl ConsoleOutput for RecordingOutput {
    fn print(&self, text: &str, stream: OutputStream) {
        self.0.lock().unwrap().push((text.to_string(), stream));
    }
}

impl RecordingOutput {
    fn texts(&self) -> Vec<String> {
        self.0.lock().unwrap().iter().map(|(t, _)| t.clone()).collect()
    }
}

#[derive(Default)]
struct HookRecorder(Mutex<Vec<&'static str>>);

impl ConsoleListener for HookRecorder {
    fn before_execution(&self) {
        self.0.lock().unwrap().push("before_execution");
    }
    fn on_command_executed(&self) {
        self.0.lock().unwrap().push("command_executed");
    }
    fn on_busy(&self) {
        self.0.lock().unwrap().push("busy");
    }
    fn on_reset(&self) {
        self.0.lock().unwrap().push("reset");
    }
}

async fn wait_for_state(console: &Console, state: ExecutionState) {
    let mut rx = console.watch_state();
    timeout(WAIT, rx.wait_for(|s| *s == state))
        .await
        .expect("state wait timed out")
        .expect("state channel closed");
}

/// A kernel that answers `execute_code` by echoing a result line and
/// prompting again.
fn arithmetic_kernel(call: CallRecord, handle: &KernelHandle) {
    match call.method.as_str() {
        "execute_code" => {
            assert_eq!(call.payload["code"], "1+1");
            handle.event(AsyncEvent::Text {
                stream: OutputStream::Stdout,
                text: "[1] 2\n".to_string(),
            });
            handle.event(AsyncEvent::Prompt);
            handle.respond(call.id, serde_json::json!({}));
        }
        _ => handle.ok(call.id),
    }
}

// Scenario A: execute "1+1" and observe Busy -> Prompt plus the output.
#[tokio::test]
async fn execute_produces_output_and_returns_to_prompt() {
    let (session, handle) = mock_session(arithmetic_kernel);
    let output = Arc::new(RecordingOutput::default());
    let console = Console::new(session, output.clone());

    // Initial state is Busy until the kernel's first prompt.
    assert_eq!(console.state(), ExecutionState::Busy);
    handle.event(AsyncEvent::Prompt);
    wait_for_state(&console, ExecutionState::Prompt).await;

    let pending = console.execute_text("1+1").unwrap();
    assert_eq!(console.state(), ExecutionState::Busy);

    let outcome = timeout(WAIT, pending.recv()).await.unwrap().unwrap();
    assert!(outcome.exception.is_none());
    wait_for_state(&console, ExecutionState::Prompt).await;

    assert!(output.texts().iter().any(|t| t.contains('2')));
}

#[tokio::test]
async fn execute_is_rejected_while_busy_and_after_termination() {
    let (session, handle) = mock_session(|_call, _handle| {});
    let console = Console::new(session, Arc::new(RecordingOutput::default()));

    // Still Busy: never prompted.
    assert_eq!(console.execute_text("1").unwrap_err(), ConsoleError::Busy);

    handle.close();
    wait_for_state(&console, ExecutionState::Terminated).await;
    assert_eq!(
        console.execute_text("1").unwrap_err(),
        ConsoleError::Terminated
    );
}

#[tokio::test]
async fn interrupt_is_a_no_op_at_the_prompt() {
    let (session, handle, calls) = crate::support::recording_session();
    let console = Console::new(session, Arc::new(RecordingOutput::default()));
    handle.event(AsyncEvent::Prompt);
    wait_for_state(&console, ExecutionState::Prompt).await;

    assert_eq!(console.interrupt().unwrap(), false);
    tokio::task::yield_now().await;
    assert!(calls.lock().unwrap().is_empty());
}

// Scenario C: interrupt an infinite loop; the console returns to the
// prompt without terminating.
#[tokio::test]
async fn interrupt_brings_a_running_console_back_to_prompt() {
    let state = Arc::new(Mutex::new(None::<u64>));
    let state2 = Arc::clone(&state);
    let (session, handle) = mock_session(move |call, handle| match call.method.as_str() {
        "execute_code" => {
            // Never responds on its own: an infinite loop.
            *state2.lock().unwrap() = Some(call.id);
        }
        "interrupt" => {
            let execute_id = state2.lock().unwrap().take().expect("no execution running");
            handle.event(AsyncEvent::Exception {
                message: "interrupted".to_string(),
                stack: Vec::new(),
                interrupted: true,
            });
            handle.event(AsyncEvent::Prompt);
            handle.respond(execute_id, serde_json::json!({}));
            handle.ok(call.id);
        }
        _ => handle.ok(call.id),
    });
    let console = Console::new(session.clone(), Arc::new(RecordingOutput::default()));
    handle.event(AsyncEvent::Prompt);
    wait_for_state(&console, ExecutionState::Prompt).await;

    let pending = console.execute_text("while (TRUE) {}").unwrap();
    assert_eq!(console.state(), ExecutionState::Busy);

    assert_eq!(console.interrupt().unwrap(), true);
    wait_for_state(&console, ExecutionState::Prompt).await;
    assert!(session.is_alive());
    assert!(timeout(WAIT, pending.recv()).await.unwrap().is_ok());
}

#[tokio::test]
async fn read_line_request_routes_the_next_line_verbatim() {
    let seen = Arc::new(Mutex::new(Vec::<String>::new()));
    let seen2 = Arc::clone(&seen);
    let (session, handle) = mock_session(move |call, handle| {
        if call.method == "send_read_line" {
            seen2
                .lock()
                .unwrap()
                .push(call.payload["text"].as_str().unwrap().to_string());
            handle.event(AsyncEvent::Prompt);
        }
        handle.ok(call.id);
    });
    let output = Arc::new(RecordingOutput::default());
    let console = Console::new(session, output.clone());

    handle.event(AsyncEvent::ReadLineRequest {
        prompt: "name? ".to_string(),
    });
    wait_for_state(&console, ExecutionState::ReadLine).await;
    assert!(output.texts().iter().any(|t| t == "name? "));

    // Replies are rejected unless a read is pending.
    console.read_line_reply("  spaced input  ").unwrap();
    assert_eq!(console.state(), ExecutionState::Busy);
    wait_for_state(&console, ExecutionState::Prompt).await;
    assert_eq!(*seen.lock().unwrap(), vec!["  spaced input  ".to_string()]);

    assert_eq!(
        console.read_line_reply("again").unwrap_err(),
        ConsoleError::NotReadingLine
    );
}

#[tokio::test]
async fn hooks_fire_in_causal_order() {
    let (session, handle) = mock_session(arithmetic_kernel);
    let console = Console::new(session, Arc::new(RecordingOutput::default()));
    let hooks = Arc::new(HookRecorder::default());
    console.add_listener(hooks.clone());

    handle.event(AsyncEvent::Prompt);
    wait_for_state(&console, ExecutionState::Prompt).await;
    // The first prompt already fired command_executed once.
    hooks.0.lock().unwrap().clear();

    let pending = console.execute_text("1+1").unwrap();
    timeout(WAIT, pending.recv()).await.unwrap().unwrap();
    wait_for_state(&console, ExecutionState::Prompt).await;
    console.reset();

    assert_eq!(
        *hooks.0.lock().unwrap(),
        vec!["before_execution", "command_executed", "reset"]
    );
}

#[tokio::test]
async fn nested_busy_event_notifies_busy_hook() {
    let (session, handle) = mock_session(|call, handle| handle.ok(call.id));
    let console = Console::new(session, Arc::new(RecordingOutput::default()));
    let hooks = Arc::new(HookRecorder::default());
    console.add_listener(hooks.clone());

    handle.event(AsyncEvent::Prompt);
    wait_for_state(&console, ExecutionState::Prompt).await;

    // A busy event triggered by a nested call, not by user submission.
    handle.event(AsyncEvent::Busy);
    wait_for_state(&console, ExecutionState::Busy).await;
    assert!(hooks.0.lock().unwrap().contains(&"busy"));

    // Tolerate a busy event arriving after an interrupt appeared done.
    handle.event(AsyncEvent::Prompt);
    wait_for_state(&console, ExecutionState::Prompt).await;
    handle.event(AsyncEvent::Busy);
    wait_for_state(&console, ExecutionState::Busy).await;
}

#[tokio::test]
async fn termination_prints_a_system_line() {
    let (session, handle) = mock_session(|_call, _handle| {});
    let output = Arc::new(RecordingOutput::default());
    let console = Console::new(session, output.clone());

    handle.close();
    wait_for_state(&console, ExecutionState::Terminated).await;

    let printed = output.0.lock().unwrap();
    assert!(printed
        .iter()
        .any(|(t, s)| *s == OutputStream::System && t.contains("terminated")));

    // Interrupt after termination is a plain no-op.
    drop(printed);
    assert_eq!(console.interrupt().unwrap(), false);
}

#[tokio::test]
async fn stderr_output_is_printed_with_its_stream_tag() {
    let (session, handle) = mock_session(|_call, _handle| {});
    let output = Arc::new(RecordingOutput::default());
    let _console = Console::new(session, output.clone());

    handle.event(AsyncEvent::Text {
        stream: OutputStream::Stderr,
        text: "warning: NAs introduced\n".to_string(),
    });

    timeout(Duration::from_secs(5), async {
        loop {
            if !output.0.lock().unwrap().is_empty() {
                break;
            }
            tokio::task::yield_now().await;
        }
    })
    .await
    .unwrap();
    assert_eq!(
        output.0.lock().unwrap()[0],
        ("warning: NAs introduced\n".to_string(), OutputStream::Stderr)
    );
}
