//! Background runtime: the result consumer and application lifecycle.

mod consumer;
mod handler;
mod lifecycle;

pub use consumer::ResultConsumer;
pub use handler::MessageHandler;
pub use lifecycle::{Application, shutdown_signal};
