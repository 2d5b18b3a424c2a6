#![doc = include_str!("../README.md")]
#![deny(
    rustdoc::broken_intra_doc_links,
    rustdoc::private_intra_doc_links,
    rustdoc::missing_crate_level_docs,
    rustdoc::invalid_codeblock_attributes,
    rustdoc::invalid_rust_codeblocks,
    rustdoc::bare_urls,
    rustdoc::invalid_html_tags
)]

pub mod beacon;
pub mod fake_server;
pub mod interfaces;
pub mod listener;
pub mod ping;
pub mod registry;

pub use beacon::{LanBeacon, MULTICAST_GROUP, MULTICAST_PORT};
pub use fake_server::FakeServer;
pub use ping::{probe_liveness, probe_status, ServerStatus};
pub use registry::{MinecraftServer, ServerRegistry};
