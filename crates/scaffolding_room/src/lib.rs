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

mod boot;
pub mod controller;
mod guest;
mod host;
pub mod machine_id;
mod runtime;
pub mod state;
pub mod status;
mod vendor;

pub use controller::{ControllerOptions, RoomController};
pub use state::{RoomRole, RoomState};
pub use status::RoomStatus;
