// SPDX-License-Identifier: MIT
//! Hand-expanded OTLP protobuf types, trimmed to the trace signal.
//!
//! Message layouts and field tags follow the published
//! opentelemetry-proto definitions; only the messages this crate sends or
//! receives are kept. `rpc` carries the subset of `google.rpc` needed to
//! decode retry hints from `grpc-status-details-bin`.

pub mod collector;
pub mod common;
pub mod resource;
pub mod rpc;
pub mod trace;
