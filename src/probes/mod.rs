//! Ready-made probes

pub mod process;

pub use process::ProcessProbe;
