#![cfg_attr(not(test), no_std)]

pub mod config;
pub mod ehcill;
pub mod gatt;
pub mod hal;
pub mod hci;
pub mod transport;
pub mod vendor;
