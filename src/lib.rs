pub mod animation;
pub mod app;
pub mod camera3d;
pub mod cli;
pub mod config;
pub mod environment;
pub mod input;
pub mod loader;
pub mod mesh;
pub mod model;
pub mod playback;
pub mod renderer;
pub mod scene;
pub mod time;

pub use app::{run, run_with_overrides, App};
