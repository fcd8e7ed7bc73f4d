//! Chart import and scoring core for KSH laser rhythm charts.

pub mod config;
pub mod game;
