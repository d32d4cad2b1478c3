//! Service, chat, serial and MIDI endpoints

pub mod input;
pub mod output;

pub use input::{DataInput, DataKind};
pub use output::{DataOutput, DataOutputStats};
