pub mod admission;
pub mod cancel;
pub mod error;
pub mod handler;
pub mod queue;
pub mod topics;
pub mod worker;
