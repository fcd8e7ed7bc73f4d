pub mod chart;
pub mod effects;
pub mod judgment;
pub mod parsing;
pub mod playback;
pub mod scoring;
pub mod timing;
