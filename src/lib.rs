//! Entre Amigas - community platform backend
//!
//! Members, blog posts, events with RSVPs and a business directory, served
//! as a JSON API.

pub mod api;
pub mod config;
pub mod db;
pub mod models;
pub mod services;
