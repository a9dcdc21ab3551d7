// SPDX-License-Identifier: MIT
//! The subset of `google.rpc` needed to read retry hints out of
//! `grpc-status-details-bin`.

/// `google.rpc.Status` - the rich error model carried in trailers.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Status {
    #[prost(int32, tag = "1")]
    pub code: i32,
    #[prost(string, tag = "2")]
    pub message: ::prost::alloc::string::String,
    #[prost(message, repeated, tag = "3")]
    pub details: ::prost::alloc::vec::Vec<::prost_types::Any>,
}

/// `google.rpc.RetryInfo` - when a server attaches this detail the client
/// may retry after the given delay.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RetryInfo {
    #[prost(message, optional, tag = "1")]
    pub retry_delay: ::core::option::Option<::prost_types::Duration>,
}

/// The `type_url` suffix identifying a packed [`RetryInfo`].
pub const RETRY_INFO_TYPE_URL: &str = "google.rpc.RetryInfo";
