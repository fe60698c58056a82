// Company profiles. Creating a company makes the creator its owner and the
// company the profile's active one.

pub mod handlers;
pub mod service;
