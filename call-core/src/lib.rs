//! Call setup for one-to-one audio calls between two browsers.
//!
//! The [`Coordinator`] owns at most one [`CallSession`] and is fed with
//! everything that happens: user intent, signals forwarded by the relay,
//! results of browser operations and timer ticks. It answers with
//! [`Command`]s for the platform driver. Nothing in here performs I/O, so the
//! whole state machine runs (and is tested) without a browser.
//!
//! Asynchronous results carry the [`AttemptId`] they were issued for.
//! Results of superseded attempts are dropped, which is how an in-flight
//! negotiation gets cancelled.

#[macro_use]
extern crate log;

mod candidates;
mod command;
mod config;
mod coordinator;
mod error;
mod health;
mod retry;
mod session;
mod status;

pub use command::{AttemptId, Command, EngineEvent, MediaStreamHandle, SdpKind};
pub use config::CallConfig;
pub use coordinator::Coordinator;
pub use error::{CallError, MediaError};
pub use health::PathState;
pub use retry::RetryPolicy;
pub use session::{CallPhase, CallSession, ConnectionHealth, Role, Termination};

pub use proto::{CandidateDescriptor, PeerId, SessionDescription, Signal};
