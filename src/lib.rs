//! This crate exposes the internal functionality of the `liveipfinder`
//! host discovery tool.
//!
//! `liveipfinder` classifies which hosts of a target population are reachable.
//! A quiet ICMP echo sweep runs first; only the hosts that stay silent are
//! probed again with TCP connects and protocol-aware UDP datagrams, so hosts
//! that already answered never see the noisier traffic.
//!
//! ## Architecture Overview
//!
//! The run is driven by [`Scanner`](crate::scanner::Scanner):
//!
//! 1. **Input Processing**: addresses and CIDR networks are expanded and
//!    deduplicated ([`address`]), options are validated into a
//!    [`ScanConfig`](crate::input::ScanConfig) ([`input`]).
//! 2. **ICMP sweep**: one echo work unit per target, at most `threads` in flight.
//! 3. **Rescue**: silent targets get a TCP and/or a UDP work unit
//!    ([`scanner::tcp`], [`scanner::udp`], payloads in [`scanner::payloads`]).
//! 4. **Aggregation**: the outcomes of each target are merged into one
//!    [`HostRecord`](crate::results::HostRecord) ([`results`]) and written out
//!    ([`output`]).
//!
//! ## Basic Usage Example
//!
//! ```rust,no_run
//! use std::net::IpAddr;
//!
//! use liveipfinder::input::ScanConfig;
//! use liveipfinder::scanner::Scanner;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let targets = vec!["192.168.1.1".parse::<IpAddr>()?, "192.168.1.2".parse()?];
//!
//!     let scanner = Scanner::new(targets, ScanConfig::default()).await?;
//!     let report = scanner.run().await;
//!
//!     for record in &report.records {
//!         println!("{record}");
//!     }
//!     Ok(())
//! }
//! ```
#![allow(clippy::needless_doctest_main)]

pub mod error;

pub mod input;

pub mod address;

pub mod port_strategy;

pub mod scanner;

pub mod results;

pub mod output;
