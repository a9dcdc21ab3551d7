// SPDX-License-Identifier: MIT
//! The do-nothing transport for disabled mode.
//!
//! When no endpoint is configured the system must never fail or block, so
//! every method is a successful no-op.

use tracing::trace;

use crate::error::OtlpError;
use crate::proto::trace::ResourceSpans;
use crate::scope::ExportScope;

use super::OtlpClient;

pub struct NullClient;

#[async_trait::async_trait]
impl OtlpClient for NullClient {
    async fn start(&mut self, _scope: &mut ExportScope) -> Result<(), OtlpError> {
        Ok(())
    }

    async fn upload_traces(
        &mut self,
        _scope: &mut ExportScope,
        batch: Vec<ResourceSpans>,
    ) -> Result<(), OtlpError> {
        trace!(batches = batch.len(), "null transport dropped export");
        Ok(())
    }

    async fn stop(&mut self, _scope: &mut ExportScope) -> Result<(), OtlpError> {
        Ok(())
    }
}
