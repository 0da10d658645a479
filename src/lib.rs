pub mod commands;
pub mod cost_analysis;
pub mod google_api;
pub mod location;
pub mod place_types;
