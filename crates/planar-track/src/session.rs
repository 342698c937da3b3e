//! Message protocol and the worker thread that owns a tracker.
//!
//! A host (UI thread, capture loop, web bridge) talks to the tracker only
//! through [`InMessage`]s and receives [`OutMessage`]s back. Messages are
//! handled strictly in arrival order, one at a time.

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SendError, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use planar_track_core::RgbaFrame;
use serde::{Deserialize, Serialize};

use crate::{TargetTracker, TrackResult};

/// Requests accepted by a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum InMessage {
    /// Load a template and set the processing resolution.
    #[serde(rename_all = "camelCase")]
    Init {
        target_url: String,
        proc_w: u32,
        proc_h: u32,
    },
    /// Change the processing resolution of later frames.
    #[serde(rename_all = "camelCase")]
    Resize { proc_w: u32, proc_h: u32 },
    /// Run one pipeline cycle.
    Frame { image: RgbaFrame },
}

/// Notifications emitted by a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum OutMessage {
    Ready,
    Log { msg: String },
    Error { msg: String },
    #[serde(rename_all = "camelCase")]
    TemplateReady { width: u32, height: u32 },
    Result(TrackResult),
}

/// Destination of outgoing messages.
pub trait OutboundSink {
    fn emit(&mut self, msg: OutMessage);
}

impl OutboundSink for Vec<OutMessage> {
    fn emit(&mut self, msg: OutMessage) {
        self.push(msg);
    }
}

impl OutboundSink for Sender<OutMessage> {
    fn emit(&mut self, msg: OutMessage) {
        if self.send(msg).is_err() {
            log::debug!("outbound receiver dropped, message discarded");
        }
    }
}

/// Turns incoming messages into tracker calls and outgoing messages.
pub struct Session {
    tracker: TargetTracker,
}

impl Session {
    pub fn new(tracker: TargetTracker) -> Self {
        Self { tracker }
    }

    pub fn tracker(&self) -> &TargetTracker {
        &self.tracker
    }

    pub fn handle(&mut self, msg: InMessage, out: &mut dyn OutboundSink) {
        match msg {
            InMessage::Init {
                target_url,
                proc_w,
                proc_h,
            } => match self.tracker.init(&target_url, proc_w, proc_h) {
                Ok(template) => {
                    let (width, height) = (template.width(), template.height());
                    out.emit(OutMessage::Log {
                        msg: format!(
                            "template {width}x{height} with {} keypoints",
                            template.features().len()
                        ),
                    });
                    out.emit(OutMessage::TemplateReady { width, height });
                }
                Err(e) => out.emit(OutMessage::Error { msg: e.to_string() }),
            },
            InMessage::Resize { proc_w, proc_h } => {
                if let Err(e) = self.tracker.resize(proc_w, proc_h) {
                    out.emit(OutMessage::Error { msg: e.to_string() });
                }
            }
            InMessage::Frame { image } => {
                let report = self.tracker.process_frame(&image);
                drop(image);
                for msg in report.diagnostics {
                    out.emit(OutMessage::Log { msg });
                }
                out.emit(OutMessage::Result(report.result));
            }
        }
    }
}

/// Handle to a tracker running on its own thread.
pub struct Worker {
    inbox: Sender<InMessage>,
    outbox: Receiver<OutMessage>,
    handle: JoinHandle<()>,
}

/// Move `tracker` onto a new thread. The worker emits
/// [`OutMessage::Ready`] first, then one batch of messages per request.
/// It exits once every [`Worker`] sender is gone.
pub fn spawn_worker(tracker: TargetTracker) -> std::io::Result<Worker> {
    let (inbox, requests) = mpsc::channel::<InMessage>();
    let (mut replies, outbox) = mpsc::channel::<OutMessage>();
    let handle = thread::Builder::new()
        .name("planar-track".to_string())
        .spawn(move || {
            let mut session = Session::new(tracker);
            replies.emit(OutMessage::Ready);
            for msg in requests {
                session.handle(msg, &mut replies);
            }
            log::debug!("worker inbox closed");
        })?;
    Ok(Worker {
        inbox,
        outbox,
        handle,
    })
}

impl Worker {
    pub fn send(&self, msg: InMessage) -> Result<(), SendError<InMessage>> {
        self.inbox.send(msg)
    }

    /// Block for the next message; `None` once the worker has exited.
    pub fn recv(&self) -> Option<OutMessage> {
        self.outbox.recv().ok()
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Option<OutMessage> {
        match self.outbox.recv_timeout(timeout) {
            Ok(msg) => Some(msg),
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Messages already queued, without blocking.
    pub fn drain(&self) -> Vec<OutMessage> {
        self.outbox.try_iter().collect()
    }

    /// Close the inbox and wait for the thread to finish.
    pub fn shutdown(self) -> thread::Result<()> {
        let Worker { inbox, handle, .. } = self;
        drop(inbox);
        handle.join()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Point2;

    #[test]
    fn messages_use_tagged_camel_case() {
        let init: InMessage = serde_json::from_str(
            r#"{ "type": "init", "targetUrl": "file:///tmp/t.png", "procW": 640, "procH": 480 }"#,
        )
        .expect("init");
        assert_eq!(
            init,
            InMessage::Init {
                target_url: "file:///tmp/t.png".into(),
                proc_w: 640,
                proc_h: 480,
            }
        );

        let frame: InMessage = serde_json::from_str(
            r#"{ "type": "frame", "image": { "width": 1, "height": 1, "data": [1, 2, 3, 255] } }"#,
        )
        .expect("frame");
        assert!(matches!(frame, InMessage::Frame { image } if image.data.len() == 4));

        let ready = serde_json::to_value(OutMessage::Ready).expect("ready");
        assert_eq!(ready, serde_json::json!({ "type": "ready" }));

        let tr = serde_json::to_value(OutMessage::TemplateReady {
            width: 320,
            height: 240,
        })
        .expect("templateReady");
        assert_eq!(
            tr,
            serde_json::json!({ "type": "templateReady", "width": 320, "height": 240 })
        );
    }

    #[test]
    fn result_message_is_flat() {
        let none = serde_json::to_value(OutMessage::Result(TrackResult::rejected(7, 2)))
            .expect("result");
        assert_eq!(
            none,
            serde_json::json!({ "type": "result", "matches": 7, "inliers": 2, "corners": null })
        );

        let quad = [
            Point2::new(1.0_f32, 2.0),
            Point2::new(3.0, 2.0),
            Point2::new(3.0, 4.0),
            Point2::new(1.0, 4.0),
        ];
        let msg = OutMessage::Result(TrackResult {
            matches: 30,
            inliers: 20,
            corners: Some(quad),
        });
        let v = serde_json::to_value(&msg).expect("result");
        assert_eq!(v["corners"][2], serde_json::json!([3.0, 4.0]));
        let back: OutMessage = serde_json::from_value(v).expect("back");
        assert_eq!(back, msg);
    }
}
