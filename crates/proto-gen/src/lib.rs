//! Generated Protocol Buffer code for the token verification service.
//!
//! This crate contains the compiled `proto/auth.proto` definitions shared by
//! the auth service and every client of it (including the interceptor).

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::doc_markdown)] // Generated code has various doc formatting

// Re-export prost traits for convenience
pub use prost::Message;

// Generated protobuf modules
pub mod auth {
    //! `auth.Auth` service and its `Token` message
    #![allow(clippy::pedantic)]
    include!("generated/auth.rs");
}
