//! The typed setup-path and session-path errors of spec.md §6/§7. Data-path
//! failures (malformed bytes, queue overflow) never reach this type — they
//! are logged and dropped where they occur.

#[derive(Debug)]
pub enum TransportError {
    IllegalArgument(String),
    BindFailed { address: std::net::SocketAddr, attempts: u32 },
    NoBoundCandidate,
    Closed,
    Timeout,
    ConfigError(String),
}

impl std::error::Error for TransportError {}

impl std::fmt::Display for TransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::IllegalArgument(msg) => write!(f, "illegal argument: {msg}"),
            Self::BindFailed { address, attempts } => {
                write!(f, "bind failed: address={address}, attempts={attempts}")
            }
            Self::NoBoundCandidate => write!(f, "no bound candidate"),
            Self::Closed => write!(f, "socket is closed"),
            Self::Timeout => write!(f, "operation timed out"),
            Self::ConfigError(msg) => write!(f, "configuration error: {msg}"),
        }
    }
}
