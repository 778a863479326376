#![feature(proc_macro_hygiene, decl_macro)]

pub mod config;
pub mod directory;
pub mod http;
pub mod pending;
pub mod service;
pub mod wire;
