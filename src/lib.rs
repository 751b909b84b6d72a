#![deny(clippy::dbg_macro)]
#![deny(clippy::print_stderr)]
#![deny(clippy::print_stdout)]
#![deny(clippy::todo)]
#![deny(clippy::unimplemented)]

pub mod access;
pub mod blocks;
pub mod cli;
pub mod directplus;
pub mod endpoints;
pub mod error;
pub mod search;

mod render;
mod sources;
