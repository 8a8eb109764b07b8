//! verigate kernel.
//!
//! Message-bus plumbing shared by the verification services:
//!
//! - **[`ipc`]** -- the [`MessageBus`] capability trait and [`IpcBus`], an
//!   in-process, topic-keyed publish/subscribe bus backed by
//!   [`tokio::sync::broadcast`].
//! - **[`error`]** -- bus error types via [`thiserror`].
//!
//! The bus is deliberately payload-agnostic: messages are opaque bytes and
//! decoding belongs to the subscriber.

pub mod error;
pub mod ipc;

pub use error::{BusError, BusResult};
pub use ipc::{BusConfig, BusMessage, IpcBus, MessageBus, Subscription};
