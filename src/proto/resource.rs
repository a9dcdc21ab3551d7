// SPDX-License-Identifier: MIT
//! `opentelemetry.proto.resource.v1`

use super::common::KeyValue;

/// The entity producing telemetry (e.g. the process), described by
/// attributes such as `service.name`.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Resource {
    #[prost(message, repeated, tag = "1")]
    pub attributes: ::prost::alloc::vec::Vec<KeyValue>,
    #[prost(uint32, tag = "2")]
    pub dropped_attributes_count: u32,
}
