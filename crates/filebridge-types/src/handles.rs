use crate::message::Message;

/// Implemented by the transport hub (C3). Lets the transfer manager (C4)
/// push messages to a peer without depending on the transport crate
/// directly, keeping the crate graph acyclic (design note in SPEC_FULL §2).
pub trait MessageSender: Send + Sync {
    fn send(&self, client_id: &str, message: Message) -> Result<(), SendError>;
}

#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("client {0} is not connected")]
    NotConnected(String),
    #[error("transport is shutting down")]
    Closed,
}

/// Implemented by the transfer manager (C4). Lets the transport hub (C3)
/// hand off inbound, session-scoped messages without the manager crate
/// depending on the transport crate.
pub trait InboundHandler: Send + Sync {
    fn handle_inbound(&self, client_id: &str, message: Message);
    fn client_disconnected(&self, client_id: &str);
}
