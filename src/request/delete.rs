//! Delete: find the blobbers holding the object, then delete on them

use super::list::ListRequest;
use super::{new_connection_id, RequestBase};
use crate::status::OpKind;
use crate::transport::RefQuery;
use crate::{Result, SdkError};
use tracing::info;

pub(crate) struct DeleteRequest {
    base: RequestBase,
    remote_path: String,
    connection_id: String,
}

impl DeleteRequest {
    pub fn new(base: RequestBase, remote_path: String) -> Self {
        Self {
            base,
            remote_path,
            connection_id: new_connection_id(),
        }
    }

    pub async fn process(&self) -> Result<()> {
        let query = RefQuery::path(&self.base.allocation_id, &self.remote_path);
        let list_mask = ListRequest::new(self.base.clone(), query)
            .file_consensus(self.base.full_mask())
            .await
            .found;

        if list_mask.is_empty() {
            return Err(SdkError::NotFound(self.remote_path.clone()));
        }

        let deleted = self
            .base
            .act_and_commit(OpKind::Delete, list_mask, &self.connection_id, |_, b| {
                self.base.transport.delete_object(
                    b,
                    &self.base.allocation_id,
                    &self.connection_id,
                    &self.remote_path,
                )
            })
            .await?;

        info!(allocation = %self.base.allocation_id, path = %self.remote_path, %deleted, "deleted");
        Ok(())
    }
}
