pub mod backpressure;
pub mod circuit_breaker;
pub mod error;
pub mod fragment_tracker;
pub mod models;
pub mod reconnection;
pub mod session;
pub mod transport;

pub use backpressure::BackpressureHandler;
pub use circuit_breaker::{BreakerState, CircuitBreaker, CircuitBreakerConfig};
pub use error::StsError;
pub use fragment_tracker::{FragmentTracker, InFlightFragment, TimeoutEvent};
pub use reconnection::{ReconnectOutcome, ReconnectionConfig, ReconnectionManager};
pub use session::{SendOutcome, SessionConfig, SessionEvent, SessionState, StreamConfigArgs, StsSession};
pub use transport::{InboundEvent, SocketIoTransport, StsTransport};
