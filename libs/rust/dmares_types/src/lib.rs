#![no_std]

pub mod address;
pub mod bank;
pub mod domain;
pub mod error;
pub mod handle;
pub mod properties;
