pub mod activity;
pub mod feed;
pub mod permissions;
pub mod visibility;
