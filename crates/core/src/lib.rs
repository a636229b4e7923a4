pub mod capture;
pub mod config;
pub mod emotion;
pub mod media;
pub mod playback;
pub mod present;
pub mod sampling;
pub mod single_shot;
pub mod tracks;

#[cfg(test)]
mod testing;
