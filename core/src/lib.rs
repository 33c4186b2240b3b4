pub mod audio_filter;
pub mod breakpoints;
pub mod bus;
pub mod chipset;
pub mod cpu;
pub mod emulator;
pub mod tickable;
pub mod types;
