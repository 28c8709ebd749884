//! Rename an object inside its directory

use super::list::ListRequest;
use super::{new_connection_id, RequestBase};
use crate::status::OpKind;
use crate::transport::RefQuery;
use crate::{path, Result, SdkError};
use tracing::info;

pub(crate) struct RenameRequest {
    base: RequestBase,
    remote_path: String,
    new_name: String,
    connection_id: String,
}

impl RenameRequest {
    pub fn new(base: RequestBase, remote_path: String, new_name: String) -> Result<Self> {
        if new_name.is_empty() || new_name.contains(path::SEPARATOR) || new_name == "." || new_name == ".." {
            return Err(SdkError::InvalidPath(format!("invalid new name: {new_name:?}")));
        }

        Ok(Self {
            base,
            remote_path,
            new_name,
            connection_id: new_connection_id(),
        })
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
            .act_and_commit(OpKind::Rename, list_mask, &self.connection_id, |_, b| {
                self.base.transport.rename_object(
                    b,
                    &self.base.allocation_id,
                    &self.connection_id,
                    &self.remote_path,
                    &self.new_name,
                )
            })
            .await?;

        info!(allocation = %self.base.allocation_id, from = %self.remote_path, to = %self.new_name, "renamed");
        Ok(())
    }
}
