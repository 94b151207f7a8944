//! Duplex audio link to a Fay controller: microphone PCM goes up the socket,
//! hex-framed clips come down and are played while capture is paused.

pub mod audio;
pub mod clip_store;
pub mod config;
pub mod controller;
pub mod download;
pub mod error;
pub mod hex_codec;
pub mod net_link;
pub mod protocol;
pub mod session;
pub mod status_bridge;
pub mod upload;
