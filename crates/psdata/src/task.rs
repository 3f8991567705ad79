//! Off-thread serialization.

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::error::{DataError, DataResult};
use crate::protocol::DataSerializer;
use crate::tree::{DataTree, NodeId};

impl DataTree {
    /// Snapshot the subtree as a concatenated buffer, then replay it into
    /// `target` on the blocking pool and pass the result to `on_complete`.
    ///
    /// Only the buffer crosses threads; the tree may be mutated as soon as
    /// this returns. The conversion cannot be cancelled, so a callback that
    /// touches the node must check it still exists first.
    pub fn serialize_async<S, F>(
        &mut self,
        id: NodeId,
        target: S,
        on_complete: F,
    ) -> DataResult<JoinHandle<()>>
    where
        S: DataSerializer + Send + 'static,
        F: FnOnce(DataResult<S>) + Send + 'static,
    {
        let runtime = Handle::try_current().map_err(|e| DataError::Runtime(e.to_string()))?;
        let buffer = self.concatenate(id)?;
        debug!(node = %id, bytes = buffer.len(), "spawning serialization");
        Ok(runtime.spawn_blocking(move || on_complete(buffer.convert_into(target))))
    }
}
