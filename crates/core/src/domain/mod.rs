pub mod activity;
pub mod agent;
pub mod call;
pub mod report;
