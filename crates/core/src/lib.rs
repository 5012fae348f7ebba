//! Core library for turning long raw text into subtitles with a text model.
//!
//! Raw text is cut into chunks ([`chunk`]), each chunk is corrected into SRT
//! by a [`generate::Generator`] and the results are stitched into one
//! document ([`workflow::correction`]). Existing documents can be rewritten
//! in sub-batches ([`workflow::enhancement`]), restyled
//! ([`workflow::style`]) or repaired one block at a time
//! ([`workflow::regenerate`]).

pub mod chunk;
pub mod config;
pub mod error;
pub mod files;
pub mod generate;
pub mod progress;
pub mod range;
pub mod reconcile;
pub mod session;
pub mod srt;
pub mod workflow;
