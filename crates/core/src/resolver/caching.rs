use super::{ModuleResolver, ResolveError};
use crate::module::ModuleHandle;
use metascope_image::ModuleIdentity;
use std::collections::HashMap;
use std::sync::RwLock;

/// Memoizes resolution outcomes, hits and misses alike, for one discovery pass.
pub struct CachingResolver<R> {
    inner: R,
    resolved: RwLock<HashMap<ModuleIdentity, Option<ModuleHandle>>>,
}

impl<R: ModuleResolver> CachingResolver<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            resolved: RwLock::new(HashMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.resolved.read().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<R: ModuleResolver> ModuleResolver for CachingResolver<R> {
    fn resolve(&self, identity: &ModuleIdentity) -> Result<ModuleHandle, ResolveError> {
        let cached = self
            .resolved
            .read()
            .ok()
            .and_then(|map| map.get(identity).cloned());
        if let Some(entry) = cached {
            return entry.ok_or_else(|| ResolveError::Unresolved(identity.clone()));
        }

        let result = self.inner.resolve(identity);
        if let Ok(mut map) = self.resolved.write() {
            map.insert(identity.clone(), result.as_ref().ok().cloned());
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::Module;
    use metascope_image::ModuleImage;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting {
        calls: AtomicUsize,
    }

    impl ModuleResolver for Counting {
        fn resolve(&self, identity: &ModuleIdentity) -> Result<ModuleHandle, ResolveError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if identity.name == "Known" {
                let image = ModuleImage::new(identity.clone());
                Ok(Arc::new(Module::from_image("/virtual/Known.dll", image)))
            } else {
                Err(ResolveError::Unresolved(identity.clone()))
            }
        }
    }

    #[test]
    fn test_hits_and_misses_are_memoized() {
        let resolver = CachingResolver::new(Counting {
            calls: AtomicUsize::new(0),
        });

        let known = ModuleIdentity::named("Known");
        let missing = ModuleIdentity::named("Missing");

        let a = resolver.resolve(&known).unwrap();
        let b = resolver.resolve(&known).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert!(resolver.resolve(&missing).is_err());
        assert!(resolver.resolve(&missing).is_err());

        assert_eq!(resolver.inner.calls.load(Ordering::SeqCst), 2);
        assert_eq!(resolver.len(), 2);
    }
}
