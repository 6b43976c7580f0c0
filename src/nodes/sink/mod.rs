mod playback;

pub use playback::*;
