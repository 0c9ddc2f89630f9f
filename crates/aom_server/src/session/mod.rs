mod core;
mod handlers;
mod manager;
mod transport;

pub use self::core::{default_uncaught_handler, Session, UncaughtHandler};
pub use manager::{SessionManager, ALL};
pub use transport::{TcpTransport, Transport};
