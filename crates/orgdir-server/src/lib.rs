pub mod audit;
pub mod bootstrap;
pub mod cli;
pub mod config;
pub mod error;
pub mod metrics;
pub mod middleware;
pub mod rest;
pub mod service;
