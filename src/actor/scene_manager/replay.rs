use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::SceneManager;
use crate::actor::move_drag::PointerId;
use crate::common::error::ErrorCode;
use crate::layout_engine::WindowLimits;
use crate::model::session::{PropertyKey, SessionConfig, SessionProperty};
use crate::model::{SessionId, SizeChangeReason};
use crate::sys::geometry::{Point, Rect};
use crate::sys::screen::{DisplayEvent, DisplayId};

/// One client or display request, as recorded and replayed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Request {
    CreateSession(SessionConfig),
    Connect(SessionId),
    Show(SessionId),
    Hide(SessionId),
    RequestFocus(SessionId),
    Raise(SessionId),
    UpdateRect {
        id: SessionId,
        rect: Rect,
        reason: SizeChangeReason,
    },
    UpdateRectOn {
        id: SessionId,
        rect: Rect,
        reason: SizeChangeReason,
        display: DisplayId,
    },
    SetAspectRatio {
        id: SessionId,
        ratio: f64,
    },
    SetLimits {
        id: SessionId,
        limits: WindowLimits,
    },
    SetProperty {
        id: SessionId,
        property: SessionProperty,
    },
    Property {
        id: SessionId,
        key: PropertyKey,
    },
    AddChild {
        parent: SessionId,
        child: SessionId,
    },
    RemoveChild {
        parent: SessionId,
        child: SessionId,
    },
    Reparent {
        child: SessionId,
        parent: Option<SessionId>,
    },
    PointerDown {
        id: SessionId,
        pointer: PointerId,
        point: Point,
    },
    PointerMove {
        id: SessionId,
        pointer: PointerId,
        point: Point,
    },
    PointerUp {
        id: SessionId,
        pointer: PointerId,
    },
    CancelGesture(SessionId),
    FirstFrame(SessionId),
    Display(DisplayEvent),
    Disconnect(SessionId),
    Destroy(SessionId),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Reply {
    Unit,
    Session(SessionId),
    Rect(Rect),
    MaybeRect(Option<Rect>),
    Bool(bool),
    Parent(Option<SessionId>),
    Property(SessionProperty),
}

/// Writes requests to a file, one RON value per line.
#[derive(Debug, Default)]
pub struct Record {
    file: Option<File>,
}

impl Record {
    pub fn new(path: Option<&Path>) -> anyhow::Result<Self> {
        Ok(Self {
            file: path.map(File::create).transpose()?,
        })
    }

    pub fn is_enabled(&self) -> bool { self.file.is_some() }

    pub fn on_request(&mut self, request: &Request) {
        let Some(file) = self.file.as_mut() else { return };
        let line = match ron::ser::to_string(request) {
            Ok(line) => line,
            Err(e) => {
                warn!(?e, ?request, "request could not be serialized");
                return;
            }
        };
        if let Err(e) = writeln!(file, "{line}") {
            warn!(?e, "writing the record file failed; recording stopped");
            self.file = None;
        }
    }
}

/// Runs every request in `path` against `manager`, in order. A request that
/// fails is logged and replay continues; the result code of each request is
/// returned.
pub fn replay(path: &Path, manager: &SceneManager) -> anyhow::Result<Vec<ErrorCode>> {
    let file = BufReader::new(File::open(path)?);
    let mut codes = Vec::new();
    for (n, line) in file.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let request: Request = ron::de::from_str(&line)?;
        let result = manager.dispatch(request);
        match &result {
            Ok(reply) => debug!(line = n + 1, ?reply, "replayed"),
            Err(e) => warn!(line = n + 1, %e, "replayed request failed"),
        }
        codes.push(ErrorCode::of(&result));
    }
    Ok(codes)
}
