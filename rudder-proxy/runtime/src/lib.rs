#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub use rudder_proxy_core as core;
pub use rudder_proxy_grpc as grpc;

mod admin;
mod args;

pub use self::args::Args;
