//! Debug session protocol: stops, stacks, breakpoints.

use std::sync::{Arc, Mutex};

use tokio::time::timeout;

use kernel_interop::debugger::{BreakpointRequest, DebugSession};
use kernel_interop::protocol::{AsyncEvent, RefSpec, SourcePosition, StackFrameInfo};

use crate::support::{mock_session, recording_session, WAIT};

fn frame(function: Option<&str>, file: &str, line: u32, is_library: bool) -> StackFrameInfo {
    StackFrameInfo {
        function: function.map(str::to_string),
        position: Some(SourcePosition {
            file: file.to_string(),
            line,
        }),
        is_library,
    }
}

// Scenario B: a breakpoint inside a called function stops with a stack of
// two frames (caller plus breakpointed frame) before any stepping.
#[tokio::test]
async fn breakpoint_stop_delivers_the_full_stack() {
    let executing = Arc::new(Mutex::new(None::<u64>));
    let executing2 = Arc::clone(&executing);
    let (session, handle) = mock_session(move |call, handle| match call.method.as_str() {
        "execute_code" => {
            assert_eq!(call.payload["debug"], true);
            *executing2.lock().unwrap() = Some(call.id);
            handle.event(AsyncEvent::Busy);
            handle.event(AsyncEvent::DebugPrompt {
                stack: Some(vec![
                    frame(None, "script.txt", 4, false),
                    frame(Some("f"), "script.txt", 1, false),
                ]),
            });
        }
        _ => handle.ok(call.id),
    });
    let debugger = DebugSession::new(session.clone());

    debugger
        .set_breakpoint(BreakpointRequest::at("script.txt", 1))
        .await
        .unwrap();

    let _pending = session.execute_code("f()", true, true).unwrap();
    timeout(WAIT, debugger.wait_for_stop()).await.unwrap().unwrap();

    assert!(debugger.is_debugging());
    let stack = debugger.stack();
    assert_eq!(stack.len(), 2);
    assert_eq!(stack[0].function, None);
    assert_eq!(stack[1].function.as_deref(), Some("f"));
    assert_eq!(stack[0].environment, RefSpec::SysFrame { index: 0 });
    assert_eq!(
        stack[1].position,
        Some(SourcePosition {
            file: "script.txt".to_string(),
            line: 1
        })
    );
}

#[tokio::test]
async fn step_commands_reach_the_kernel() {
    let (session, handle, calls) = recording_session();
    let debugger = DebugSession::new(session);
    let _ = handle;

    timeout(WAIT, debugger.step_over()).await.unwrap().unwrap();
    timeout(WAIT, debugger.step_into()).await.unwrap().unwrap();
    timeout(WAIT, debugger.step_into_my_code()).await.unwrap().unwrap();
    timeout(WAIT, debugger.step_out()).await.unwrap().unwrap();
    timeout(WAIT, debugger.continue_execution()).await.unwrap().unwrap();
    timeout(WAIT, debugger.pause()).await.unwrap().unwrap();
    timeout(WAIT, debugger.stop()).await.unwrap().unwrap();
    timeout(WAIT, debugger.run_to_position("script.txt", 7))
        .await
        .unwrap()
        .unwrap();

    let seen = calls.lock().unwrap();
    let methods: Vec<&str> = seen.iter().map(|c| c.method.as_str()).collect();
    assert_eq!(
        methods,
        vec![
            "debug_step_over",
            "debug_step_into",
            "debug_step_into_my_code",
            "debug_step_out",
            "debug_continue",
            "debug_pause",
            "debug_stop",
            "debug_run_to_position",
        ]
    );
    assert_eq!(seen[7].payload["file"], "script.txt");
    assert_eq!(seen[7].payload["line"], 7);
}

#[tokio::test]
async fn unchanged_stack_is_kept_and_prompt_clears_it() {
    let (session, handle) = mock_session(|call, handle| handle.ok(call.id));
    let debugger = DebugSession::new(session);

    handle.event(AsyncEvent::DebugPrompt {
        stack: Some(vec![frame(Some("g"), "lib.txt", 10, true)]),
    });
    timeout(WAIT, debugger.wait_for_stop()).await.unwrap().unwrap();
    assert_eq!(debugger.stack().len(), 1);
    assert!(debugger.stack()[0].is_library);

    // A stop without a stack payload means "unchanged".
    handle.event(AsyncEvent::DebugPrompt { stack: None });
    timeout(WAIT, debugger.wait_for_stop()).await.unwrap().unwrap();
    assert_eq!(debugger.stack().len(), 1);

    // A plain prompt implies resume: debugging ends, the stack empties.
    handle.event(AsyncEvent::Prompt);
    timeout(WAIT, async {
        loop {
            if !debugger.is_debugging() {
                break;
            }
            tokio::task::yield_now().await;
        }
    })
    .await
    .unwrap();
    assert!(debugger.stack().is_empty());
}

#[tokio::test]
async fn exception_stack_is_retained_after_execution_moves_on() {
    let (session, handle) = mock_session(|call, handle| handle.ok(call.id));
    let debugger = DebugSession::new(session);

    handle.event(AsyncEvent::Exception {
        message: "object 'x' not found".to_string(),
        stack: vec![
            frame(None, "script.txt", 9, false),
            frame(Some("lookup"), "script.txt", 2, false),
        ],
        interrupted: false,
    });
    handle.event(AsyncEvent::Prompt);
    handle.event(AsyncEvent::Busy);
    handle.event(AsyncEvent::Prompt);

    timeout(WAIT, async {
        loop {
            if !debugger.last_error_stack().is_empty() {
                break;
            }
            tokio::task::yield_now().await;
        }
    })
    .await
    .unwrap();

    let stack = debugger.last_error_stack();
    assert_eq!(stack.len(), 2);
    assert_eq!(stack[0].environment, RefSpec::ErrorFrame { index: 0 });
    assert_eq!(stack[1].function.as_deref(), Some("lookup"));

    // An interrupt "exception" must not overwrite the retained stack.
    handle.event(AsyncEvent::Exception {
        message: "interrupted".to_string(),
        stack: Vec::new(),
        interrupted: true,
    });
    handle.event(AsyncEvent::Prompt);
    tokio::task::yield_now().await;
    assert_eq!(debugger.last_error_stack().len(), 2);
}

#[tokio::test]
async fn breakpoints_are_mirrored_and_removable() {
    let (session, _handle, calls) = recording_session();
    let debugger = DebugSession::new(session);

    let id = timeout(
        WAIT,
        debugger.set_breakpoint(BreakpointRequest {
            condition: Some("n > 100".to_string()),
            ..BreakpointRequest::at("model.txt", 12)
        }),
    )
    .await
    .unwrap()
    .unwrap();
    assert_eq!(debugger.breakpoints().len(), 1);

    timeout(WAIT, debugger.remove_breakpoint(id)).await.unwrap().unwrap();
    assert!(debugger.breakpoints().is_empty());

    let seen = calls.lock().unwrap();
    assert_eq!(seen[0].method, "debug_set_breakpoint");
    assert_eq!(seen[0].payload["condition"], "n > 100");
    assert_eq!(seen[0].payload["line"], 12);
    assert_eq!(seen[1].method, "debug_remove_breakpoint");
    assert_eq!(seen[1].payload["id"], id);
}

#[tokio::test]
async fn kernel_can_remove_one_shot_breakpoints() {
    let (session, handle) = mock_session(|call, handle| handle.ok(call.id));
    let debugger = DebugSession::new(session);

    let id = timeout(
        WAIT,
        debugger.set_breakpoint(BreakpointRequest {
            remove_after_hit: true,
            ..BreakpointRequest::at("script.txt", 3)
        }),
    )
    .await
    .unwrap()
    .unwrap();

    handle.event(AsyncEvent::RemoveBreakpoint { id });
    timeout(WAIT, async {
        loop {
            if debugger.breakpoints().is_empty() {
                break;
            }
            tokio::task::yield_now().await;
        }
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn mute_disables_without_removing() {
    let (session, _handle, calls) = recording_session();
    let debugger = DebugSession::new(session);

    timeout(
        WAIT,
        debugger.set_breakpoint(BreakpointRequest::at("a.txt", 1)),
    )
    .await
    .unwrap()
    .unwrap();
    timeout(WAIT, debugger.mute_breakpoints(true)).await.unwrap().unwrap();

    assert!(debugger.breakpoints_muted());
    assert_eq!(debugger.breakpoints().len(), 1);
    let seen = calls.lock().unwrap();
    assert_eq!(seen[1].method, "debug_mute_breakpoints");
    assert_eq!(seen[1].payload["muted"], true);
}

#[tokio::test]
async fn wait_for_stop_fails_when_the_session_dies() {
    let (session, handle) = mock_session(|_call, _handle| {});
    let debugger = DebugSession::new(session);

    let waiter = tokio::spawn(async move { debugger.wait_for_stop().await });
    tokio::task::yield_now().await;
    handle.close();

    let result = timeout(WAIT, waiter).await.unwrap().unwrap();
    assert!(result.is_err());
}
