//! Request/reply plumbing for quill.
//!
//! Requests go out over REST; replies stream back as fragments over one
//! shared duplex channel and are handed to a single [`session::FrameHandler`].

pub mod api;
pub mod frame;
pub mod http;
pub mod session;
