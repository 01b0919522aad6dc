// src/types/mod.rs

pub mod chat;
pub mod model;
pub mod openai;

pub use chat::*;
pub use model::*;
pub use openai::*;
