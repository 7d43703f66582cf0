pub mod accounts;
pub mod assets;
pub mod pages;
pub mod social;
