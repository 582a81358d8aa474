/*!
 * Monitor Registry
 *
 * Name-to-node table for one agent. Lookups take the read side of the lock;
 * creation re-checks under an upgradable read and only then upgrades to
 * write, creating any missing ancestors top-down. The exclusive strategy
 * replaces the reader/writer lock with a single mutex.
 */

use super::node::MonitorNode;
use crate::config::{RegistryLockStrategy, RuntimeFlags};
use crate::core::limits::ROOT_MONITOR_NAME;
use crate::core::ConfigError;
use ahash::RandomState;
use parking_lot::{Mutex, RwLock, RwLockUpgradableReadGuard};
use std::collections::HashMap;
use std::sync::Arc;

/// Called for every node created after the hook is installed
pub type CreationHook = dyn Fn(&Arc<MonitorNode>) + Send + Sync;

type NodeTable = HashMap<Arc<str>, Arc<MonitorNode>, RandomState>;

enum TableLock {
    ReadWrite(RwLock<NodeTable>),
    Exclusive(Mutex<NodeTable>),
}

pub struct MonitorRegistry {
    flags: RuntimeFlags,
    root: Arc<MonitorNode>,
    table: TableLock,
    on_create: RwLock<Option<Arc<CreationHook>>>,
}

impl std::fmt::Debug for MonitorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MonitorRegistry")
            .field("lock", &self.flags.registry_lock)
            .field("nodes", &self.len())
            .finish()
    }
}

impl MonitorRegistry {
    pub fn new(flags: RuntimeFlags) -> Self {
        let table = NodeTable::with_hasher(RandomState::new());
        let table = match flags.registry_lock {
            RegistryLockStrategy::ReadWrite => TableLock::ReadWrite(RwLock::new(table)),
            RegistryLockStrategy::Exclusive => TableLock::Exclusive(Mutex::new(table)),
        };
        Self {
            root: MonitorNode::new_root(&flags),
            flags,
            table,
            on_create: RwLock::new(None),
        }
    }

    pub fn flags(&self) -> &RuntimeFlags {
        &self.flags
    }

    pub fn root(&self) -> &Arc<MonitorNode> {
        &self.root
    }

    pub(crate) fn set_creation_hook(&self, hook: Option<Arc<CreationHook>>) {
        *self.on_create.write() = hook;
    }

    /// Existing node named `name`, never creating one
    pub fn get(&self, name: &str) -> Option<Arc<MonitorNode>> {
        let name = name.trim();
        if name.is_empty() || name == ROOT_MONITOR_NAME {
            return Some(Arc::clone(&self.root));
        }
        match &self.table {
            TableLock::ReadWrite(lock) => lock.read().get(name).cloned(),
            TableLock::Exclusive(lock) => lock.lock().get(name).cloned(),
        }
    }

    /// Node named `name`, creating it and any missing ancestors
    pub fn get_or_create(&self, name: &str) -> Result<Arc<MonitorNode>, ConfigError> {
        self.lookup(name, |_| true)
            .map(|node| node.unwrap_or_else(|| Arc::clone(&self.root)))
    }

    /// Like `get_or_create`, but a missing node is only created when `allow`
    /// accepts its name. `None` means the node does not exist and was not
    /// created.
    pub fn get_or_create_dynamic(
        &self,
        name: &str,
        allow: impl FnOnce(&str) -> bool,
    ) -> Result<Option<Arc<MonitorNode>>, ConfigError> {
        self.lookup(name, allow)
    }

    fn lookup(
        &self,
        name: &str,
        allow: impl FnOnce(&str) -> bool,
    ) -> Result<Option<Arc<MonitorNode>>, ConfigError> {
        let name = name.trim();
        if name.is_empty() || name == ROOT_MONITOR_NAME {
            return Ok(Some(Arc::clone(&self.root)));
        }
        validate_name(name)?;

        let mut created = Vec::new();
        let node = match &self.table {
            TableLock::ReadWrite(lock) => {
                if let Some(node) = lock.read().get(name) {
                    return Ok(Some(Arc::clone(node)));
                }
                let guard = lock.upgradable_read();
                if let Some(node) = guard.get(name) {
                    return Ok(Some(Arc::clone(node)));
                }
                if !allow(name) {
                    return Ok(None);
                }
                let mut table = RwLockUpgradableReadGuard::upgrade(guard);
                self.create_chain(&mut table, name, &mut created)
            }
            TableLock::Exclusive(lock) => {
                let mut table = lock.lock();
                if let Some(node) = table.get(name) {
                    return Ok(Some(Arc::clone(node)));
                }
                if !allow(name) {
                    return Ok(None);
                }
                self.create_chain(&mut table, name, &mut created)
            }
        };

        // Hook runs outside the table lock, parents before children
        if !created.is_empty() {
            let hook = self.on_create.read().clone();
            if let Some(hook) = hook {
                for node in &created {
                    hook(node);
                }
            }
        }
        Ok(Some(node))
    }

    fn create_chain(
        &self,
        table: &mut NodeTable,
        name: &str,
        created: &mut Vec<Arc<MonitorNode>>,
    ) -> Arc<MonitorNode> {
        let mut parent = Arc::clone(&self.root);
        for (end, _) in name
            .match_indices('.')
            .chain(std::iter::once((name.len(), "")))
        {
            let prefix = &name[..end];
            parent = match table.get(prefix) {
                Some(existing) => Arc::clone(existing),
                None => {
                    let node = MonitorNode::new_child(prefix, &parent, &self.flags);
                    table.insert(node.shared_name(), Arc::clone(&node));
                    created.push(Arc::clone(&node));
                    node
                }
            };
        }
        parent
    }

    /// Root followed by every node, sorted by name (parents before children)
    pub fn all_nodes(&self) -> Vec<Arc<MonitorNode>> {
        let mut nodes: Vec<Arc<MonitorNode>> = match &self.table {
            TableLock::ReadWrite(lock) => lock.read().values().cloned().collect(),
            TableLock::Exclusive(lock) => lock.lock().values().cloned().collect(),
        };
        nodes.sort_by(|a, b| a.name().cmp(b.name()));
        nodes.insert(0, Arc::clone(&self.root));
        nodes
    }

    /// Number of nodes, excluding the root
    pub fn len(&self) -> usize {
        match &self.table {
            TableLock::ReadWrite(lock) => lock.read().len(),
            TableLock::Exclusive(lock) => lock.lock().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Dotted names may not have empty segments or whitespace
pub fn validate_name(name: &str) -> Result<(), ConfigError> {
    let valid = !name.is_empty()
        && name
            .split('.')
            .all(|segment| !segment.is_empty() && !segment.chars().any(char::is_whitespace));
    if valid {
        Ok(())
    } else {
        Err(ConfigError::InvalidMonitorName(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn registries() -> Vec<MonitorRegistry> {
        vec![
            MonitorRegistry::new(RuntimeFlags::default()),
            MonitorRegistry::new(
                RuntimeFlags::default().with_registry_lock(RegistryLockStrategy::Exclusive),
            ),
        ]
    }

    #[test]
    fn test_creates_ancestors() {
        for registry in registries() {
            let node = registry.get_or_create("A.B.C").unwrap();
            assert_eq!(node.name(), "A.B.C");
            assert_eq!(node.simple_name(), "C");
            assert_eq!(registry.len(), 3);

            let parent = node.parent().unwrap();
            assert_eq!(parent.name(), "A.B");
            assert_eq!(parent.parent().unwrap().parent().unwrap().name(), ROOT_MONITOR_NAME);
            assert_eq!(registry.root().children().len(), 1);

            let again = registry.get_or_create("A.B.C").unwrap();
            assert!(Arc::ptr_eq(&node, &again));
        }
    }

    #[test]
    fn test_dynamic_suppression() {
        let registry = MonitorRegistry::new(RuntimeFlags::default());
        assert!(registry
            .get_or_create_dynamic("User.alice", |_| false)
            .unwrap()
            .is_none());
        assert!(registry.get("User.alice").is_none());
        assert!(registry.is_empty());

        let node = registry
            .get_or_create_dynamic("User.bob", |name| name.starts_with("User."))
            .unwrap()
            .unwrap();
        assert_eq!(node.name(), "User.bob");

        // Existing nodes are returned even when creation would be refused
        assert!(registry
            .get_or_create_dynamic("User", |_| false)
            .unwrap()
            .is_some());
    }

    #[test]
    fn test_invalid_names() {
        let registry = MonitorRegistry::new(RuntimeFlags::default());
        assert!(registry.get_or_create("A..B").is_err());
        assert!(registry.get_or_create(".A").is_err());
        assert!(registry.get_or_create("A B").is_err());
        assert!(registry.get_or_create("<ROOT>").unwrap().is_root());
    }

    #[test]
    fn test_creation_hook_order() {
        let registry = MonitorRegistry::new(RuntimeFlags::default());
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        registry.set_creation_hook(Some(Arc::new(move |node: &Arc<MonitorNode>| {
            sink.lock().push(node.name().to_string());
        })));

        registry.get_or_create("X.Y").unwrap();
        registry.get_or_create("X.Y").unwrap();
        assert_eq!(*seen.lock(), vec!["X", "X.Y"]);
    }

    #[test]
    fn test_concurrent_creation_single_node() {
        let registry = Arc::new(MonitorRegistry::new(RuntimeFlags::default()));
        let created = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&created);
        registry.set_creation_hook(Some(Arc::new(move |_: &Arc<MonitorNode>| {
            counter.fetch_add(1, Ordering::SeqCst);
        })));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || registry.get_or_create("Shared.Leaf").unwrap().id())
            })
            .collect();
        let ids: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert!(ids.windows(2).all(|w| w[0] == w[1]));
        assert_eq!(created.load(Ordering::SeqCst), 2);
    }
}
