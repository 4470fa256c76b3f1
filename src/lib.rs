//! Storefront chat widget core: text and voice chat against the Voicero
//! backend, plus the page actions and order flows their answers trigger.

pub mod action;
pub mod api;
pub mod bus;
pub mod chat;
pub mod config;
pub mod customer;
pub mod dom;
pub mod error;
pub mod returns;
pub mod server;
pub mod storage;
pub mod store;
pub mod widget;

#[cfg(test)]
mod testing;
