//! Reconnecting session.
//!
//! - [`SessionState`] / [`SharedSession`] - the used tube and watch list
//!   that a new connection has to be brought back to
//! - [`restore`] - replays that state on a fresh connection
//! - the supervisor task, which owns the connect/backoff/restore cycle and
//!   the [`WaitingGate`](crate::gate::WaitingGate) that parks commands issued
//!   while offline
//!
//! # Lifecycle
//!
//! ```text
//! Stopped ──connect──► Connecting ──ok──► Restoring ──ok──► Connected
//!    ▲                    │  ▲                │                 │
//!    │                  fail │             error/lost          lost
//!    │                    ▼  │                ▼                 │
//!    │                   Waiting ◄────────────┴─────────────────┘
//!    │                       │
//!    └──── disconnect ◄──────┘ (from any state)
//! ```

mod restore;
mod state;
pub(crate) mod supervisor;

pub use restore::restore;
pub use state::{SessionState, SharedSession, DEFAULT_TUBE};
pub use supervisor::{SessionEvent, SessionPhase, SessionStatus};
