//! Client-side orchestration for streamed model replies.
//!
//! Controllers issue requests through a [`quill_channel::api::Backend`];
//! the [`router::FrameRouter`] hands the fragments that stream back to the
//! controller that asked, which folds them into typed state.

pub mod config;
pub mod conversation;
pub mod diff;
pub mod fingerprint;
pub mod partial_json;
pub mod prompts;
pub mod reassembler;
pub mod router;
pub mod structured;
pub mod table;
pub mod types;
pub mod ui;
pub mod watchdog;
