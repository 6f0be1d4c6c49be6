//! Chunked Upload Module
//!
//! Implements reliable large file uploads with:
//! - Sequential byte-range chunks reassembled in index order
//! - In-memory or on-disk chunk spooling behind a trait
//! - Exactly-once commit to blob storage and the file record
//!
//! Protocol Flow:
//! 1. Client begins an upload session with filename and total size
//! 2. Client sends chunks by absolute index; a resend overwrites
//! 3. The chunk flagged as last triggers reassembly and the two-step
//!    commit (blob put, then record update)
//! 4. Any finalize failure leaves the session retryable

pub mod chunk_store;
pub mod engine;
pub mod session;
pub mod types;

pub use chunk_store::{compute_hash, verify_hash, ChunkSpool, DiskSpool, MemorySpool};
pub use engine::{ReceiveOutcome, UploadEngine};
pub use session::{ChunkSession, SessionManager, SessionStatus};
pub use types::*;
