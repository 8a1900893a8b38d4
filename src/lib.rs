#![forbid(unsafe_code)]
#![doc = include_str!("../README.md")]

pub mod builder;
mod encoder;
pub mod error;
pub mod models;
pub mod parser;
