//! All integration tests for moqtail

mod common;
mod moqtail_abr;
mod moqtail_media;
mod moqtail_play;
mod moqtail_transport;
