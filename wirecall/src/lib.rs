#![forbid(unsafe_code)]

extern crate self as wirecall;

pub use wirecall_macro::interface;

mod error;
pub use error::{Error, ErrorKind, Result};

pub mod msg;
pub use msg::{ErrorInfo, Id, Incoming, Message, Request, Response};

mod id;
pub use id::{IdGenerator, IdKind};

mod codec;
pub use codec::{Codec, Profile};

mod settings;
pub use settings::{ErrorHandler, Settings};

pub mod transport;
pub use transport::{FrameReader, HttpTransport, SocketTransport, StreamTransport, Transport};

mod responder;
pub use responder::{ChannelSink, OutputSink, Responder};

mod router;
pub use router::{Method, Router};

mod interface;
pub use interface::{MethodDescriptor, ParamReader};

mod waiter;
pub use waiter::{Waiter, WaiterCleaner};

mod receiver;
pub use receiver::Receiver;

mod task_supervisor;
pub use task_supervisor::{TaskSupervisor, TaskSupervisorGuard};

mod listener;
pub use listener::Listener;

mod client;
pub use client::Client;

mod server;
pub use server::Server;

#[doc(hidden)]
pub mod __private {
    pub use serde_json::Value;

    /// # Errors
    pub fn to_value<T: serde::Serialize + ?Sized>(value: &T) -> crate::Result<Value> {
        Ok(serde_json::to_value(value)?)
    }
}
