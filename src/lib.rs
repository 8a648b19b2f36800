//! followtrack
//!
//! Scrape-orchestration engine for social-graph collection: rate-governed
//! job execution over a dual-source fetch layer, follower delta tracking
//! between snapshots, a Redis-backed progress feed, and a daily scheduler
//! for bookmarked targets.

pub mod app_state;
pub mod config;
pub mod db;
pub mod models;
pub mod routes;
pub mod scrape;
pub mod services;
