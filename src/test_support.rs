//! Fakes shared by the unit tests: an in-memory resolver and a factory which counts what the cache asks of it.
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::*;

/// Resolves a location to a path with the same text, and knows a fixed set of paths.
pub struct MemoryResolver(HashSet<String>);

impl MemoryResolver {
    pub fn new(known: &[&str]) -> MemoryResolver {
        MemoryResolver(known.iter().map(|x| x.to_string()).collect())
    }
}

impl LocationResolver for MemoryResolver {
    fn resolve(&self, location: &Location) -> Option<ResolvedLocation> {
        Some(ResolvedLocation::new(location.clone(), location.as_str()))
    }

    fn exists(&self, location: &ResolvedLocation) -> bool {
        self.0.contains(&*location.path_text())
    }
}

#[derive(Debug)]
pub struct FakeAdaptor {
    /// Unique per open, so tests can tell instances apart.
    pub id: usize,
    pub location: String,
    cleaned: Arc<AtomicBool>,
    state: Arc<Mutex<FactoryState>>,
}

impl FakeAdaptor {
    pub fn is_cleaned_up(&self) -> bool {
        self.cleaned.load(Ordering::SeqCst)
    }
}

impl DatasetAdaptor for FakeAdaptor {
    fn cleanup(&mut self) {
        assert!(
            !self.cleaned.swap(true, Ordering::SeqCst),
            "Adaptor cleaned up twice"
        );
        let mut state = self.state.lock().unwrap();
        *state.cleanups.entry(self.location.clone()).or_default() += 1;
    }
}

#[derive(Debug, Default)]
struct FactoryState {
    next_id: usize,
    opens: HashMap<String, usize>,
    validations: HashMap<String, usize>,
    cleanups: HashMap<String, usize>,
    fail_validation: HashSet<String>,
    fail_open: HashSet<String>,
    open_delay: Option<Duration>,
}

/// An [AdaptorFactory] whose clones all share one set of counters.
#[derive(Clone, Default)]
pub struct FakeFactory(Arc<Mutex<FactoryState>>);

impl FakeFactory {
    pub fn new() -> FakeFactory {
        Default::default()
    }

    pub fn opens(&self, location: &str) -> usize {
        self.0.lock().unwrap().opens.get(location).cloned().unwrap_or(0)
    }

    pub fn validations(&self, location: &str) -> usize {
        self.0
            .lock()
            .unwrap()
            .validations
            .get(location)
            .cloned()
            .unwrap_or(0)
    }

    pub fn cleanups(&self, location: &str) -> usize {
        self.0
            .lock()
            .unwrap()
            .cleanups
            .get(location)
            .cloned()
            .unwrap_or(0)
    }

    /// Opened adaptors which haven't been cleaned up.
    pub fn live_adaptors(&self) -> usize {
        let state = self.0.lock().unwrap();
        let opened: usize = state.opens.values().sum();
        let cleaned: usize = state.cleanups.values().sum();
        opened - cleaned
    }

    pub fn fail_validation(&self, location: &str) {
        self.0
            .lock()
            .unwrap()
            .fail_validation
            .insert(location.to_string());
    }

    pub fn fail_open(&self, location: &str) {
        self.0.lock().unwrap().fail_open.insert(location.to_string());
    }

    /// Stop failing for a location.
    pub fn succeed(&self, location: &str) {
        let mut state = self.0.lock().unwrap();
        state.fail_validation.remove(location);
        state.fail_open.remove(location);
    }

    pub fn set_open_delay(&self, delay: Duration) {
        self.0.lock().unwrap().open_delay = Some(delay);
    }
}

impl AdaptorFactory<FakeAdaptor> for FakeFactory {
    fn pre_load_validation(&self, location: &ResolvedLocation) -> Result<(), AdaptorError> {
        let key = location.location().to_string();
        let mut state = self.0.lock().unwrap();
        *state.validations.entry(key.clone()).or_default() += 1;
        if state.fail_validation.contains(&key) {
            return Err(format!("{} is not a valid dataset", key).into());
        }
        Ok(())
    }

    fn open(&self, location: &ResolvedLocation, _config: &AppConfig) -> Result<FakeAdaptor, AdaptorError> {
        let key = location.location().to_string();
        let delay = self.0.lock().unwrap().open_delay;
        if let Some(d) = delay {
            std::thread::sleep(d);
        }

        let mut state = self.0.lock().unwrap();
        *state.opens.entry(key.clone()).or_default() += 1;
        if state.fail_open.contains(&key) {
            return Err(std::io::Error::new(std::io::ErrorKind::Other, "corrupt dataset").into());
        }
        state.next_id += 1;
        Ok(FakeAdaptor {
            id: state.next_id,
            location: key,
            cleaned: Default::default(),
            state: self.0.clone(),
        })
    }

    fn file_size(&self, location: &ResolvedLocation) -> Result<u64, AdaptorError> {
        Ok(location.path_text().len() as u64)
    }
}

/// A registry which sends both formats to the same factory.
pub fn counting_registry(factory: &FakeFactory) -> FormatRegistry<FakeAdaptor> {
    FormatRegistry::new()
        .with(MatrixFormat::H5ad, factory.clone())
        .with(MatrixFormat::Cxg, factory.clone())
}
