#![recursion_limit = "512"]

pub mod authz;
pub mod config;
pub mod db;
pub mod domain;
pub mod error;
pub mod idempotency;
pub mod identity;
pub mod intent;
pub mod middleware;
pub mod outbox;
pub mod providers;
pub mod repository;
pub mod retention;
pub mod routes;
pub mod schemas;
pub mod services;
pub mod state;
pub mod tasks_dispatch;
