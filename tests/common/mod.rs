//! Shared helpers for nbtls integration tests.

#![allow(unused)]

pub mod engine;
pub mod net;
pub mod reactor;

use std::net::SocketAddr;

pub use engine::{ToyEngine, ToySession};
pub use net::{Datagram, LoopNet, LoopUdp, PipeStream, Probe};
pub use reactor::LoopReactor;

pub fn init_log() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn addr(s: &str) -> SocketAddr {
    s.parse().unwrap()
}
