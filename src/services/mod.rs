pub mod credentials;
pub mod encryption;
pub mod progress;
pub mod queue;
pub mod rate_limit;
