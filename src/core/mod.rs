pub mod context;
pub mod discovery;
pub mod error;
pub mod lifecycle;
pub mod phase;
pub mod policy;
pub mod publisher;
pub mod reading;
pub mod state;
pub mod topics;

#[cfg(test)]
pub(crate) mod testing;
