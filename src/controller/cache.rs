//! Read cache of watched configuration objects.
//!
//! Maintained by the controller's intake from the event stream, read by the
//! worker when a work item is processed.

use dashmap::DashMap;
use std::collections::{HashMap, HashSet};

use crate::controller::source::ConfigObject;
use crate::routing::LabelSelector;

#[derive(Debug, Default)]
pub struct ObjectCache {
    objects: DashMap<String, ConfigObject>,
}

impl ObjectCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store the latest version of an object, returning the previous one.
    pub fn insert(&self, object: ConfigObject) -> Option<ConfigObject> {
        self.objects.insert(object.identity(), object)
    }

    pub fn remove(&self, identity: &str) -> Option<ConfigObject> {
        self.objects.remove(identity).map(|(_, object)| object)
    }

    pub fn get(&self, identity: &str) -> Option<ConfigObject> {
        self.objects.get(identity).map(|entry| entry.value().clone())
    }

    /// Replace the contents with a full listing, returning the previous contents.
    ///
    /// New versions are stored before vanished objects are dropped, so a
    /// concurrent reader never sees a listed object as missing.
    pub fn replace_all(&self, objects: Vec<ConfigObject>) -> HashMap<String, ConfigObject> {
        let mut previous = HashMap::new();
        let mut listed = HashSet::new();

        for object in objects {
            let identity = object.identity();
            listed.insert(identity.clone());
            if let Some(old) = self.objects.insert(identity.clone(), object) {
                previous.insert(identity, old);
            }
        }

        let vanished: Vec<String> = self
            .objects
            .iter()
            .filter(|entry| !listed.contains(entry.key()))
            .map(|entry| entry.key().clone())
            .collect();
        for identity in vanished {
            if let Some((identity, old)) = self.objects.remove(&identity) {
                previous.insert(identity, old);
            }
        }

        previous
    }

    /// Every cached object whose labels satisfy `selector`.
    pub fn matching(&self, selector: &LabelSelector) -> Vec<ConfigObject> {
        self.objects
            .iter()
            .filter(|entry| selector.matches(&entry.value().labels))
            .map(|entry| entry.value().clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}
