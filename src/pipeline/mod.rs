//! Pipeline stages for image analysis.
//!
//! Each submodule implements exactly one step so every stage can be tested
//! without the others, and the backend can be swapped without touching
//! retry, prompt or parsing logic.
//!
//! ## Data Flow
//!
//! ```text
//! credential ──▶ normalize ──▶ compose ──▶ retry(backend) ──▶ response
//! (user/env)     (JPEG ≤1024)  (parts)     (backoff)          (records)
//! ```
//!
//! 1. [`credential`]: pick the effective API key
//! 2. [`normalize`] : downscale and JPEG-encode on a blocking worker
//! 3. [`compose`]   : system instruction, few-shot example, target, closing
//! 4. [`retry`]     : classify failures, back off on quota/overload
//! 5. [`backend`]   : the only stage with network I/O
//! 6. [`response`]  : fence stripping, JSON parsing, array wrapping
//!
//! [`validate`] reuses the backend and classifier for a one-shot key probe.

pub mod backend;
pub mod compose;
pub mod credential;
pub mod normalize;
pub mod response;
pub mod retry;
pub mod validate;
