pub mod lifecycle;
pub mod models;
pub mod render;
pub mod scoring;
pub mod sequencing;
