// Job postings of the active company.

pub mod handlers;
pub mod service;
