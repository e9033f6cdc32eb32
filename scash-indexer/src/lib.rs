#[macro_use]
extern crate log;

pub mod btc;
pub mod config;
pub mod constants;
pub mod error;
pub mod index;
pub mod output;
pub mod service;
pub mod status;
pub mod storage;
pub mod tool;
