pub mod archive;
pub mod clients;
pub mod extraction;
pub mod processor;
pub mod reconciler;
pub mod render;
pub mod review;
pub mod state;
pub mod store;
pub mod totals;
