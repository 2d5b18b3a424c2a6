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

pub mod config;
pub mod node;
pub mod process;
pub mod relay;
pub mod supervise;

pub use config::OverlayConfig;
pub use node::{ForwardProtocol, NetworkNode, NodeInfo, OverlayLauncher, PeerInfo, PortSpec};
pub use process::OverlayProcessLauncher;
pub use relay::validate_relays;
pub use supervise::ProcessSupervisor;
