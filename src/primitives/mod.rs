//! Low-level durable containers the engine is built on.

pub mod ring;
