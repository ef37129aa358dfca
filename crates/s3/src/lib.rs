//! bfs-s3: S3 transport engine for bucketfs
//!
//! This crate provides the implementation of the ObjectStore trait on top of
//! HMAC-SHA1 signed HTTP exchanges. It is the only crate that speaks HTTP:
//! - `signature` and `context` build and sign one exchange
//! - `transport` moves it over the wire with stall detection
//! - `scheduler` runs many exchanges with bounded concurrency and retries
//! - `multipart` and `upload` drive parallel multipart transfers

pub mod body;
pub mod checksum;
pub mod client;
pub mod context;
pub mod multipart;
pub mod scheduler;
pub mod signature;
pub mod transport;
pub mod upload;
pub mod xml;

#[cfg(test)]
mod testing;

pub use client::S3Client;
pub use context::{ExchangeKind, ExchangeState, HandleId, RequestContext, WorkKey};
pub use multipart::{EtagList, MultipartSession, PartDescriptor, PartPlan};
pub use scheduler::{CompletionHandler, Disposition, Scheduler, SchedulerStats};
pub use signature::Signer;
pub use transport::{HttpTransport, Transport};
pub use upload::MultipartTransfer;
