//! Module for the table of host objects exposed to clients by handle.
use crate::context::ClientId;
use crate::error::Error;
use log::debug;
use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

/// Maps host objects to the opaque 64-bit handles clients see.
///
/// Handles are allocated monotonically and never reused for the lifetime of
/// the store; handle `0` is reserved to mean null and is never allocated.
/// Adding the same object twice (by identity, not by value) returns the
/// existing handle. All access happens on the host tick thread.
pub struct ObjectStore {
    entries: HashMap<u64, Entry>,
    handles: HashMap<usize, u64>,
    next_handle: u64,
    track_owners: bool,
}

struct Entry {
    object: Rc<dyn Any>,
    owners: HashSet<ClientId>,
}

fn identity(object: &Rc<dyn Any>) -> usize {
    Rc::as_ptr(object) as *const () as usize
}

impl ObjectStore {
    /// Creates an empty store.
    ///
    /// When `track_owners` is set, every handle remembers which clients have
    /// seen it and [`reset_client`](ObjectStore::reset_client) evicts handles
    /// that only the departing client holds.
    pub fn new(track_owners: bool) -> ObjectStore {
        ObjectStore {
            entries: HashMap::new(),
            handles: HashMap::new(),
            next_handle: 1,
            track_owners,
        }
    }

    /// Adds an object and returns its handle.
    ///
    /// Idempotent per object identity: adding an object that is already in
    /// the store returns the handle it already has.
    pub fn add(&mut self, object: Rc<dyn Any>) -> u64 {
        let key = identity(&object);
        if let Some(handle) = self.handles.get(&key) {
            return *handle;
        }

        let handle = self.next_handle;
        self.next_handle += 1;
        self.handles.insert(key, handle);
        self.entries.insert(
            handle,
            Entry {
                object,
                owners: HashSet::new(),
            },
        );
        handle
    }

    /// Resolves a handle to the object it names.
    pub fn get(&self, handle: u64) -> Result<Rc<dyn Any>, Error> {
        self.entries
            .get(&handle)
            .map(|e| e.object.clone())
            .ok_or(Error::UnknownHandle(handle))
    }

    /// Removes a handle from the store. Removing an absent handle is a no-op.
    pub fn remove(&mut self, handle: u64) {
        if let Some(entry) = self.entries.remove(&handle) {
            self.handles.remove(&identity(&entry.object));
        }
    }

    /// Records that `client` has seen `handle`.
    pub fn mark_owner(&mut self, handle: u64, client: ClientId) {
        if !self.track_owners {
            return;
        }
        if let Some(entry) = self.entries.get_mut(&handle) {
            entry.owners.insert(client);
        }
    }

    /// Discards every handle held exclusively by `client`.
    ///
    /// Handles also seen by other clients merely forget the departing one.
    /// No-op when owner tracking is disabled.
    pub fn reset_client(&mut self, client: ClientId) {
        if !self.track_owners {
            return;
        }

        let exclusive: Vec<u64> = self
            .entries
            .iter()
            .filter(|(_, e)| e.owners.len() == 1 && e.owners.contains(&client))
            .map(|(handle, _)| *handle)
            .collect();

        for handle in &exclusive {
            self.remove(*handle);
        }
        for entry in self.entries.values_mut() {
            entry.owners.remove(&client);
        }

        if !exclusive.is_empty() {
            debug!("evicted {} handle(s) for {}", exclusive.len(), client);
        }
    }

    /// Gets the number of live handles.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns whether the store holds no handles.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
