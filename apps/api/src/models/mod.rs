pub mod document;
pub mod search;
