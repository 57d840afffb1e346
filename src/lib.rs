pub mod cli;
pub mod collection;
pub mod config;
pub mod geo;
pub mod parser;
pub mod query;
pub mod source;
pub mod storage;
pub mod web;
