//! A stand-in kernel speaking the interop protocol over stdio.
//!
//! Used for protocol development and end-to-end tests that need a real
//! subprocess: it answers the handshake, echoes executed code as output
//! events, and honors environment snapshot save/load with plain files.

use serde_json::json;

use kernel_interop::protocol::{
    AsyncEvent, Frame, FrameSink, FrameSource, FramedSink, FramedSource, OutputStream,
};

fn ok(id: u64) -> Frame {
    Frame::Response {
        id,
        result: None,
        error: None,
    }
}

fn event(event: AsyncEvent) -> Frame {
    Frame::Event { event }
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let mut source = FramedSource::new(tokio::io::stdin());
    let mut sink = FramedSink::new(tokio::io::stdout());

    while let Ok(Some(frame)) = source.recv().await {
        let Frame::Call { id, method, payload } = frame else {
            continue;
        };
        let result = match method.as_str() {
            "init" => match sink.send(ok(id)).await {
                Ok(()) => send_prompt(&mut sink).await,
                Err(e) => Err(e),
            },
            "execute_code" => {
                let code = payload["code"].as_str().unwrap_or_default();
                if code == "crash" {
                    // Simulates a native fault: no termination event, no
                    // quit handshake, just a dead process.
                    std::process::exit(70);
                }
                let text = format!("executed: {code}\n");
                let emit = sink
                    .send(event(AsyncEvent::Text {
                        stream: OutputStream::Stdout,
                        text,
                    }))
                    .await;
                match emit {
                    Ok(()) => {
                        let _ = send_prompt(&mut sink).await;
                        sink.send(Frame::Response {
                            id,
                            result: Some(json!({})),
                            error: None,
                        })
                        .await
                    }
                    Err(e) => Err(e),
                }
            }
            "save_environment" => {
                let path = payload["path"].as_str().unwrap_or_default();
                match std::fs::write(path, b"saved-environment\n") {
                    Ok(()) => sink.send(ok(id)).await,
                    Err(e) => {
                        sink.send(Frame::Response {
                            id,
                            result: None,
                            error: Some(e.to_string()),
                        })
                        .await
                    }
                }
            }
            "load_environment" => {
                let path = payload["path"].as_str().unwrap_or_default();
                if std::path::Path::new(path).exists() {
                    sink.send(ok(id)).await
                } else {
                    sink.send(Frame::Response {
                        id,
                        result: None,
                        error: Some(format!("no snapshot at {path}")),
                    })
                    .await
                }
            }
            "get_working_dir" => {
                let dir = std::env::current_dir()
                    .map(|d| d.to_string_lossy().into_owned())
                    .unwrap_or_default();
                sink.send(Frame::Response {
                    id,
                    result: Some(json!({ "dir": dir })),
                    error: None,
                })
                .await
            }
            "quit" => {
                let _ = sink.send(ok(id)).await;
                let _ = sink.send(event(AsyncEvent::Termination)).await;
                return;
            }
            _ => sink.send(ok(id)).await,
        };
        if result.is_err() {
            return;
        }
    }
}

async fn send_prompt(
    sink: &mut FramedSink<tokio::io::Stdout>,
) -> Result<(), kernel_interop::protocol::FrameError> {
    sink.send(event(AsyncEvent::Prompt)).await
}
