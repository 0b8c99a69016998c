//! # Voice Session
//!
//! The realtime conversation session: one [`SessionController`] owning the
//! duplex channel, the microphone pipeline, the playback queue and the
//! transcript, driven by one runner task that applies every input in arrival
//! order.
//!
//! ## Lifecycle:
//! ```text
//! Idle ──start_call──► Connecting ──conversation_started──► Active
//!  ▲  ▲                    │  ▲                                │
//!  │  └──setup failed──────┘  └──transient drop / resumed──────┤
//!  │                                                           │
//!  └────────────end_call / server disconnect / gave up─────────┤
//!                                                              ▼
//!                                    conversation_ended ──► Ended
//! ```

pub mod controller;
pub mod events;
pub mod runner;
pub mod status;

#[cfg(test)]
pub(crate) mod testing;

pub use controller::SessionController;
pub use events::{CallEvents, SessionCommand, SessionEvent, SessionInbox};
pub use runner::{spawn_session, SessionHandle};
pub use status::{ConnectionStatus, SessionSnapshot};
