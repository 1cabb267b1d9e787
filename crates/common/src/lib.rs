//! Common utilities and types shared by the auth service and its clients.

#![warn(clippy::pedantic)]

/// Module for the identity handed to callers after successful verification
pub mod identity;

/// Module for secret types that prevent accidental logging
pub mod secret;

/// Module for JWT utilities (size limits, unverified header inspection)
pub mod jwt;
