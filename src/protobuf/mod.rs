//! Generated protobuf modules
//!
//! Types generated from `protos/meshtastic/*.proto` when the `meshtastic-proto`
//! feature is enabled. Only the client API subset meshping talks is compiled.

#[cfg(feature = "meshtastic-proto")]
pub mod meshtastic_generated {
    //! Generated Meshtastic protobuf types (prost emits one `meshtastic.rs` per package).
    #[allow(dead_code, unused_imports, unused_variables, unused_mut, unused_macros)]
    #[allow(clippy::all)]
    #[allow(rustdoc::invalid_html_tags)]
    mod inner {
        include!(concat!(env!("OUT_DIR"), "/meshtastic.rs"));
    }
    pub use inner::*;
}

#[cfg(not(feature = "meshtastic-proto"))]
pub mod meshtastic_generated {
    //! Stub when protobufs are not compiled; the radio transport is unavailable.
    #[derive(Debug, Clone)]
    pub struct Placeholder {
        pub note: String,
    }
}
