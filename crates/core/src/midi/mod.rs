pub mod command;
pub mod midi;
