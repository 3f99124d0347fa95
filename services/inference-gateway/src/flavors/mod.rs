//! Built-in model flavors.

pub mod openai;
