// This file makes `texgen` into a rust library crate.

// It is useful for debugging and for driving the engine from tests or
// other tooling. The file `main.rs` still exists to make `texgen` into
// an executable.

pub mod backend;
pub mod bake;
pub mod baker;
pub mod compositor;
pub mod config;
pub mod controller;
pub mod generate;
pub mod mask;
pub mod mesh;
pub mod misc;
pub mod project;
pub mod projection;
pub mod state;
pub mod view;

pub use base;
