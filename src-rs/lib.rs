//! Remote desktop automation driven by a vision-language action planner.
//!
//! The desktop's true resolution, the smaller resolution the planner sees, and
//! the planner's click coordinates are reconciled by [`scaling::Scaler`]; the
//! [`action_loop::ActionLoop`] runs one screenshot-verified action per planner
//! round trip.

pub mod action;
pub mod action_loop;
pub mod cancel;
pub mod config;
pub mod desktop;
pub mod error;
pub mod events;
pub mod executor;
pub mod planner;
pub mod registry;
pub mod scaling;
pub mod screenshot;

pub use action::{Action, MouseButton};
pub use action_loop::{ActionLoop, LoopOutcome, LoopState};
pub use cancel::{CancelToken, StopReason};
pub use config::{DesktopConfig, PilotConfig, PlannerConfig, ScaleBounds};
pub use desktop::{CommandDesktop, RemoteDesktop, ScrollDirection};
pub use error::{PilotError, PilotResult};
pub use events::{EventSink, JsonLinesSink, LoopEvent};
pub use executor::ActionExecutor;
pub use planner::{Planner, ResponsesPlanner};
pub use registry::{SessionLease, SessionRegistry};
pub use scaling::{Point, Resolution, Scaler};
pub use screenshot::{Frame, ScreenshotTranscoder};
