//! Parsing, claim reconciliation and the scan loop behind `re-scanner`.

pub mod article;
pub mod claims;
pub mod config;
pub mod document;
pub mod error;
pub mod http;
pub mod ledger;
pub mod mediawiki;
pub mod petscan;
pub mod property;
pub mod scanner;
pub mod tables;
pub mod tasks;
pub mod template_finder;
pub mod template_handler;
pub mod wikidata;
