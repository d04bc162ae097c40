pub mod cli;
pub mod console;
pub mod error;
/// Stream synchronization: polling, seek sessions, request cancellation.
pub mod playback;
pub mod settings;
