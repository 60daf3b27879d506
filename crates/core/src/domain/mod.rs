pub mod contract;
pub mod options;
pub mod portfolio;
pub mod post;
pub mod sentiment;
pub mod suggestion;
