use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Handler run with the local path of a freshly available file.
pub type ReceiveCallback = Arc<dyn Fn(&Path) + Send + Sync>;

#[derive(Clone, Default)]
pub struct ReceiveRegistry {
    actions: Arc<RwLock<HashMap<String, ReceiveCallback>>>,
}

impl ReceiveRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register<F>(&self, id: impl Into<String>, callback: F)
    where
        F: Fn(&Path) + Send + Sync + 'static,
    {
        let id = id.into();
        info!("Registering receive action '{}'", id);
        self.actions.write().await.insert(id, Arc::new(callback));
    }

    pub async fn unregister(&self, id: &str) {
        if self.actions.write().await.remove(id).is_some() {
            info!("Unregistered receive action '{}'", id);
        }
    }

    /// Runs the callback for `id`. Nothing happens when no one listens.
    pub async fn dispatch(&self, id: &str, path: &Path) -> bool {
        let callback = self.actions.read().await.get(id).cloned();

        match callback {
            Some(callback) => {
                debug!("Dispatching '{}' with {:?}", id, path);
                callback(path);
                true
            }
            None => {
                debug!("No receive action '{}' registered for {:?}", id, path);
                false
            }
        }
    }

    pub async fn is_registered(&self, id: &str) -> bool {
        self.actions.read().await.contains_key(id)
    }

    pub async fn len(&self) -> usize {
        self.actions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.actions.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::Mutex;

    fn recorder() -> (Arc<Mutex<Vec<PathBuf>>>, impl Fn(&Path) + Send + Sync + 'static) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        (seen, move |path: &Path| {
            sink.lock().unwrap().push(path.to_path_buf())
        })
    }

    #[tokio::test]
    async fn test_dispatch_invokes_registered_callback() {
        let registry = ReceiveRegistry::new();
        let (seen, callback) = recorder();
        registry.register("onVideo", callback).await;

        assert!(registry.dispatch("onVideo", Path::new("/tmp/a.mp4")).await);
        assert_eq!(*seen.lock().unwrap(), vec![PathBuf::from("/tmp/a.mp4")]);
    }

    #[tokio::test]
    async fn test_dispatch_without_listener_is_noop() {
        let registry = ReceiveRegistry::new();
        assert!(!registry.dispatch("nobody", Path::new("/tmp/a.mp4")).await);
    }

    #[tokio::test]
    async fn test_register_overwrites_and_unregister_removes() {
        let registry = ReceiveRegistry::new();
        let (first, first_cb) = recorder();
        let (second, second_cb) = recorder();

        registry.register("onImage", first_cb).await;
        registry.register("onImage", second_cb).await;
        assert_eq!(registry.len().await, 1);

        registry.dispatch("onImage", Path::new("/tmp/x.png")).await;
        assert!(first.lock().unwrap().is_empty());
        assert_eq!(second.lock().unwrap().len(), 1);

        registry.unregister("onImage").await;
        registry.unregister("onImage").await;
        assert!(!registry.is_registered("onImage").await);
        assert!(registry.is_empty().await);
    }
}
