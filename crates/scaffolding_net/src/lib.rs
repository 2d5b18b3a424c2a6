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

pub mod client;
pub mod io;
mod roster;
pub mod server;

pub use client::{ScaffoldingClient, CONNECT_TIMEOUT};
pub use server::{ScaffoldingServer, DEFAULT_HEARTBEAT_TIMEOUT};
