//! Live face-recognition scanning client for a memory-support backend.
//!
//! memlens keeps a WebSocket channel open to a recognition service, captures
//! a camera frame every couple of seconds while scanning is on, ships each
//! frame as a downscaled JPEG data URI, and speaks the name of whoever the
//! service recognises. A detection pauses scanning until the user continues.
//!
//! The scanning logic is a pure state machine ([`scanner::Scanner`]) that turns
//! inputs into [`scanner::Effect`]s; [`runtime::ScanRuntime`] executes those
//! effects on tokio.
//!
//! # Modules
//!
//! - [`config`]: Configuration loading from TOML files and environment variables
//! - [`protocol`]: JSON messages exchanged on the recognition channel
//! - [`scanner`]: Connection manager, capture throttle, detection state machine
//! - [`pipeline`]: Capture → downscale → JPEG → base64 data URI
//! - [`device`]: Camera, speech and alert collaborators
//! - [`runtime`]: Async driver for the WebSocket transport, timers and scan loop
//! - [`api`]: REST calls for profile, face registration and audio upload
//! - [`listening`]: Background listening window and recording job

pub mod api;
pub mod config;
pub mod device;
pub mod listening;
pub mod pipeline;
pub mod protocol;
pub mod runtime;
pub mod scanner;
