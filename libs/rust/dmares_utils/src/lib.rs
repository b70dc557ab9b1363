#![no_std]

pub mod alignment;
pub mod endianness;
