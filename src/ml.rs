pub mod aggregate;
pub mod clustering;
pub mod correlation;
pub mod distance;
pub mod explore;
pub mod features;
pub mod hierarchy;
pub mod hypothesis;
pub mod output;
pub mod pipeline;
pub mod pivot;
pub mod profile;
pub mod stats;
