//! MOQ transport session: object codec plus the publisher and subscriber
//! control state machines.
//!
//! A [`Session`] wraps one connection that implements [`Transport`]. Control
//! messages travel as length-delimited frames on a single bidirectional
//! stream; every object travels on its own unidirectional stream, prefixed
//! by an [`ObjectHeader`].

#![forbid(unsafe_code)]

pub mod coding;
mod control;
mod error;
pub mod message;
mod object;
mod publisher;
mod queue;
mod session;
mod subscriber;
mod transport;

pub use crate::{
    control::{ControlReceiver, ControlSender},
    error::{AnnounceError, DecodeError, EncodeError, SessionError, SessionResult, SubscribeError},
    object::{ObjectHeader, Objects},
    publisher::{AnnounceSend, Publisher, SubscribeRecv},
    queue::Queue,
    session::{Session, SessionOptions},
    subscriber::{AnnounceRecv, ObjectStream, SubscribeSend, SubscribeStatus, Subscriber},
    transport::{RecvStream, SendStream, Transport},
};
