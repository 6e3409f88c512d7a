use std::sync::Arc;

use crate::services::revalidate::Revalidate;
use crate::store::Store;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub revalidator: Arc<dyn Revalidate>,
}

impl AppState {
    pub fn new(store: Arc<dyn Store>, revalidator: Arc<dyn Revalidate>) -> Self {
        Self { store, revalidator }
    }

    pub fn store(&self) -> &dyn Store {
        self.store.as_ref()
    }

    pub fn revalidate(&self, paths: &[&str]) {
        crate::services::revalidate::revalidate_all(self.revalidator.as_ref(), paths);
    }
}
