pub mod adapters;
pub mod app;
pub mod authority;
pub mod cache;
pub mod config;
pub mod domain;
pub mod entity;
pub mod error;
pub mod fs_util;
pub mod kgx;
pub mod orchestrator;
pub mod output;
pub mod ratelimit;
pub mod resolver;
pub mod store;
