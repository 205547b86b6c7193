use std::fmt;

/// Where the handshake stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandshakeState {
    Idle,
    AwaitingDescribe,
    /// SETUP issued for the subsession at this index.
    AwaitingSetup(usize),
    AwaitingPlay,
    Streaming,
    ShuttingDown,
    Closed,
}

impl HandshakeState {
    pub fn is_closed(&self) -> bool {
        matches!(self, HandshakeState::Closed)
    }

    /// True once shutdown has started.
    pub fn is_terminal(&self) -> bool {
        matches!(self, HandshakeState::ShuttingDown | HandshakeState::Closed)
    }
}

impl Default for HandshakeState {
    fn default() -> Self {
        HandshakeState::Idle
    }
}

impl fmt::Display for HandshakeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandshakeState::Idle => write!(f, "idle"),
            HandshakeState::AwaitingDescribe => write!(f, "awaiting DESCRIBE"),
            HandshakeState::AwaitingSetup(i) => write!(f, "awaiting SETUP of subsession {}", i),
            HandshakeState::AwaitingPlay => write!(f, "awaiting PLAY"),
            HandshakeState::Streaming => write!(f, "streaming"),
            HandshakeState::ShuttingDown => write!(f, "shutting down"),
            HandshakeState::Closed => write!(f, "closed"),
        }
    }
}
