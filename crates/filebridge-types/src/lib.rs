pub mod error;
pub mod handles;
pub mod message;
pub mod model;

pub use error::{DomainError, ErrorKind, FormatError};
pub use handles::{InboundHandler, MessageSender, SendError};
pub use message::Message;
pub use model::{
    ClientStatus, ClientView, Progress, RetryStats, SessionErrorView, SessionState, SessionView,
};
