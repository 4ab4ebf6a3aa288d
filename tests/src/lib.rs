//! # Sparkgate Test Suite
//!
//! End-to-end flows through the full axum router, with a scripted daemon in
//! place of the unix socket.
//!
//! ## Structure
//!
//! ```text
//! tests/src/
//! ├── support.rs            # Fixtures: configs, scripted daemon, SSE reader
//! └── integration/
//!     ├── e2e_gateway.rs    # POST /rpc: auth, limits, errors, compression
//!     └── stream_fanout.rs  # GET /stream: fan-out, resume, cached state
//! ```
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test -p sg-tests
//! cargo test -p sg-tests integration::stream_fanout::
//! ```

pub mod integration;
pub mod support;
