//! MapReduce over a store
//!
//! A job runs five stages on the calling thread:
//!
//! 1. `preprocess`: may emit pairs before the scan
//! 2. `map`: called once per record in ascending key order
//! 3. `midprocess`: after the scan, before any reduce
//! 4. `reduce`: once per emitted key, ascending, values in emission order
//! 5. `postprocess`
//!
//! Every stage returns `anyhow::Result<bool>`. `Ok(false)` stops the job
//! with `LOGIC`; `Err` stops it with `Error::Callback`.
//!
//! The map stage holds the store's shared lock for the whole scan unless
//! [`MapReduceOptions::no_lock`] is set, in which case the lock is taken
//! per record. Reduce and the later stages run with no store lock held, so
//! they may use the store.

use crate::Store;
use cellar_core::{Error, Result};
use std::collections::BTreeMap;
use tracing::debug;

/// Collects pairs emitted by the map and preprocess stages
#[derive(Debug, Default)]
pub struct Emitter {
    groups: BTreeMap<Vec<u8>, Vec<Vec<u8>>>,
    emitted: u64,
}

impl Emitter {
    /// Emit one intermediate pair
    pub fn emit(&mut self, key: impl AsRef<[u8]>, value: impl AsRef<[u8]>) {
        self.groups
            .entry(key.as_ref().to_vec())
            .or_default()
            .push(value.as_ref().to_vec());
        self.emitted += 1;
    }

    /// Number of pairs emitted so far
    pub fn emitted(&self) -> u64 {
        self.emitted
    }
}

/// Values emitted under one key, in emission order
#[derive(Debug, Clone)]
pub struct ValueIter<'a> {
    inner: std::slice::Iter<'a, Vec<u8>>,
}

impl<'a> Iterator for ValueIter<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<&'a [u8]> {
        self.inner.next().map(Vec::as_slice)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl ExactSizeIterator for ValueIter<'_> {}

/// User logic of a MapReduce job
pub trait MapReduce {
    /// Runs before the scan
    fn preprocess(&mut self, _emitter: &mut Emitter) -> anyhow::Result<bool> {
        Ok(true)
    }

    /// Called for every record
    fn map(&mut self, key: &[u8], value: &[u8], emitter: &mut Emitter) -> anyhow::Result<bool>;

    /// Runs between the scan and the first reduce
    fn midprocess(&mut self) -> anyhow::Result<bool> {
        Ok(true)
    }

    /// Called once per emitted key
    fn reduce(&mut self, key: &[u8], values: &mut ValueIter<'_>) -> anyhow::Result<bool>;

    /// Runs after the last reduce
    fn postprocess(&mut self) -> anyhow::Result<bool> {
        Ok(true)
    }
}

/// Job options
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MapReduceOptions {
    /// Take the store lock per record instead of for the whole scan
    pub no_lock: bool,
}

/// Driver for a MapReduce job
#[derive(Debug, Clone, Default)]
pub struct MapReduceJob {
    options: MapReduceOptions,
}

fn stage(name: &'static str, outcome: anyhow::Result<bool>) -> Result<()> {
    match outcome {
        Ok(true) => Ok(()),
        Ok(false) => Err(Error::logic(format!("mapreduce {} stage stopped the job", name))),
        Err(fault) => Err(Error::Callback(fault)),
    }
}

impl MapReduceJob {
    /// Create a job with the given options
    pub fn new(options: MapReduceOptions) -> Self {
        Self { options }
    }

    /// Run `mr` over `store`, returning the number of reduced keys
    pub fn execute<M: MapReduce + ?Sized>(&self, store: &Store, mr: &mut M) -> Result<u64> {
        let mut emitter = Emitter::default();
        let outcome = stage("preprocess", mr.preprocess(&mut emitter));
        store.shared.track("mapreduce", outcome)?;

        let mapped = store.with_open("mapreduce", |open| {
            let mut mapped = 0u64;
            if self.options.no_lock {
                let mut position: Option<Vec<u8>> = None;
                loop {
                    let records = open.records.read();
                    let next = match &position {
                        Some(key) => records.successor(key),
                        None => records.first(),
                    };
                    let Some((key, value)) = next else {
                        break;
                    };
                    stage("map", mr.map(key, value, &mut emitter))?;
                    position = Some(key.to_vec());
                    mapped += 1;
                }
            } else {
                let records = open.records.read();
                for (key, value) in records.iter() {
                    stage("map", mr.map(key, value, &mut emitter))?;
                    mapped += 1;
                }
            }
            Ok(mapped)
        })?;

        let reduced = store.shared.track("mapreduce", self.reduce_phase(mr, &emitter))?;
        debug!(
            target: "cellar::store",
            mapped,
            emitted = emitter.emitted(),
            reduced,
            "MapReduce finished"
        );
        Ok(reduced)
    }

    fn reduce_phase<M: MapReduce + ?Sized>(&self, mr: &mut M, emitter: &Emitter) -> Result<u64> {
        stage("midprocess", mr.midprocess())?;
        let mut reduced = 0;
        for (key, values) in &emitter.groups {
            let mut iter = ValueIter {
                inner: values.iter(),
            };
            stage("reduce", mr.reduce(key, &mut iter))?;
            reduced += 1;
        }
        stage("postprocess", mr.postprocess())?;
        Ok(reduced)
    }
}
