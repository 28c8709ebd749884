//! Copy an object into another directory

use super::list::ListRequest;
use super::{new_connection_id, RequestBase};
use crate::status::OpKind;
use crate::transport::RefQuery;
use crate::{Result, SdkError};
use tracing::info;

pub(crate) struct CopyRequest {
    base: RequestBase,
    remote_path: String,
    dest_dir: String,
    connection_id: String,
}

impl CopyRequest {
    pub fn new(base: RequestBase, remote_path: String, dest_dir: String) -> Self {
        Self {
            base,
            remote_path,
            dest_dir,
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

        self.base
            .act_and_commit(OpKind::Copy, list_mask, &self.connection_id, |_, b| {
                self.base.transport.copy_object(
                    b,
                    &self.base.allocation_id,
                    &self.connection_id,
                    &self.remote_path,
                    &self.dest_dir,
                )
            })
            .await?;

        info!(allocation = %self.base.allocation_id, from = %self.remote_path, to = %self.dest_dir, "copied");
        Ok(())
    }
}
