//! Host implementations of the engine's platform traits.

pub mod headless;
