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

pub use scaffolding_lan as lan;
pub use scaffolding_net as net;
pub use scaffolding_overlay as overlay;
pub use scaffolding_protocol as protocol;
pub use scaffolding_room as room;

pub use scaffolding_room::{ControllerOptions, RoomController, RoomRole, RoomState, RoomStatus};

#[cfg(test)]
mod testing;
