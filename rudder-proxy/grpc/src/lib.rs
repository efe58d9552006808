#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

//! A passthrough for Helm's release module (Rudder) gRPC API.
//!
//! Messages are forwarded as raw protobuf so that fields unknown to this proxy survive the trip.
//! Only `InstallRelease` is inspected: its release manifest is rewritten before forwarding.

pub mod codec;
pub mod metrics;
mod method;
mod proxy;
pub mod release;

pub use self::{
    codec::RawCodec,
    method::{Method, SERVICE},
    proxy::{mutate_install, ReleaseModuleProxy},
};
