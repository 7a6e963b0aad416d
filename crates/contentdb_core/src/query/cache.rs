use crate::query::{QueryHandle, QueryResult};
use log::debug;
use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};

/// Memoized query handles keyed by uid.
///
/// Built handles are inserted under the write lock, so two racing callers
/// still observe one handle per uid.
#[derive(Debug, Default)]
pub struct QueryCache {
    handles: RwLock<BTreeMap<String, Arc<QueryHandle>>>,
}

impl QueryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, uid: &str) -> Option<Arc<QueryHandle>> {
        self.handles
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(uid)
            .cloned()
    }

    /// Returns the cached handle for `uid`, building it with `build` on first use.
    pub fn get_or_try_insert_with(
        &self,
        uid: &str,
        build: impl FnOnce() -> QueryResult<QueryHandle>,
    ) -> QueryResult<Arc<QueryHandle>> {
        if let Some(handle) = self.get(uid) {
            return Ok(handle);
        }

        let mut handles = self.handles.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(handle) = handles.get(uid) {
            return Ok(Arc::clone(handle));
        }
        let handle = Arc::new(build()?);
        handles.insert(uid.to_string(), Arc::clone(&handle));
        debug!(
            "event=query_handle module=query status=ok uid={} connection={} cached={}",
            uid,
            handle.connection(),
            handles.len()
        );
        Ok(handle)
    }

    pub fn len(&self) -> usize {
        self.handles
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.handles
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}
