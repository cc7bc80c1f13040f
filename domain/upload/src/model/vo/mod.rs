mod artifact;
mod chunk;
mod hash_algo;
pub mod mime;
mod receipt;
mod sweep;

#[rustfmt::skip]
pub use {
    artifact::*,
    chunk::*,
    hash_algo::*,
    receipt::*,
    sweep::*,
};
