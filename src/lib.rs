// SPDX-License-Identifier: GPL-2.0-or-later

//! Request execution core for template driven protocol scanning. Given a
//! parsed template describing one or more network interactions (DNS
//! queries, raw TCP conversations, HTTP request sequences), this crate
//! compiles each interaction against a target, generates request variants
//! from payload iterators, dispatches them with bounded concurrency and
//! streams structured events for downstream matching and reporting.

pub mod auth;
pub mod generators;
pub mod models;
pub mod protocols;
pub mod runtime;
pub mod vars;
