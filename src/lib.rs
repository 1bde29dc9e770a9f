//! Library exports for the places service
//!
//! This module exposes internal components for testing and potential library usage.

pub mod auth;
pub mod config;
pub mod database;
pub mod error;
pub mod extract;
pub mod handler;
pub mod identity;
pub mod model;
pub mod places;
pub mod reconcile;
pub mod repository;
pub mod route;
pub mod state;
pub mod storage;
